// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash. Root objects (instance, surface, device)
// clean up on Drop; everything created on top of the device registers its
// teardown with a DeletionQueue.

pub mod buffer;
pub mod command;
pub mod deletion;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::{AllocatedBuffer, ResourceAllocator};
pub use command::CommandContext;
pub use deletion::DeletionQueue;
pub use device::DeviceContext;
pub use instance::InstanceContext;
pub use pipeline::{BuiltPipeline, PipelineConfig, ShaderStage};
pub use surface::{SurfaceContext, SurfaceProvider};
pub use swapchain::Swapchain;
pub use sync::FrameSync;
