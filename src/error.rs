// Fatal error taxonomy
//
// Every error here aborts the engine. They are typed so setup code can
// report precisely what the machine is missing; everything is carried
// through anyhow on the way up to main.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error("No Vulkan-capable GPU found")]
    NoPhysicalDevice,

    #[error("No usable queue family (graphics: {graphics:?}, present: {present:?})")]
    MissingQueueFamily {
        graphics: Option<u32>,
        present: Option<u32>,
    },

    #[error("Required extension not available: {0}")]
    MissingExtension(String),

    #[error("Surface reports no formats")]
    NoSurfaceFormats,

    #[error("Surface reports no present modes")]
    NoPresentModes,

    #[error("Invalid shader bytecode in {path:?}: {reason}")]
    InvalidShaderBytecode { path: PathBuf, reason: String },

    #[error("Invalid pipeline configuration: {0}")]
    InvalidPipelineConfig(String),

    #[error("Unknown mesh: {0}")]
    UnknownMesh(String),

    #[error("Unknown material: {0}")]
    UnknownMaterial(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error(
        "Render targets out of step: {images} images, {image_views} views, {framebuffers} framebuffers"
    )]
    RenderTargetMismatch {
        images: usize,
        image_views: usize,
        framebuffers: usize,
    },

    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    #[error("Windowing platform was already initialized in this process")]
    PlatformAlreadyInitialized,

    #[error("Window closed before it could be used")]
    WindowClosed,
}
