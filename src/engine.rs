// =============================================================================
// ENGINE - GPU object lifecycle and the frame loop
// =============================================================================
//
// INIT ORDER (each step depends on the ones above it):
// ┌─────────────────────────────────────────────────────────────────┐
// │  Instance (+ debug messenger)                      RAII        │
// │    └── Surface                                     RAII        │
// │          └── Device + queues                       RAII        │
// │                └── Swapchain, image views          queue       │
// │                      └── Render pass, framebuffers queue       │
// │                            └── Command pool, sync  queue       │
// │                                  └── Pipeline      queue       │
// │                                        └── Allocator, buffers  │
// └─────────────────────────────────────────────────────────────────┘
//
// Teardown is the exact reverse: the deletion queue flushes first, then the
// device, surface and instance drop in that order.
//
// =============================================================================

mod frame;

use anyhow::{Context, Result};
use ash::vk;

use crate::backend::render_pass::{check_render_targets, create_framebuffers, create_render_pass};
use crate::backend::shader::load_spirv;
use crate::backend::{
    BuiltPipeline, CommandContext, DeletionQueue, DeviceContext, FrameSync, InstanceContext,
    PipelineConfig, ResourceAllocator, ShaderStage, SurfaceContext, SurfaceProvider, Swapchain,
};
use crate::config::Config;
use crate::scene::{
    grid_transforms, triangle_vertices, Camera, DrawItem, Mesh, MeshPushConstants, RenderObject,
    Scene, Vertex, DEFAULT_MATERIAL, DEFAULT_MESH,
};

/// Frame pacing and animation settings copied out of the config
#[derive(Debug, Clone, Copy)]
struct FrameSettings {
    timeout_ns: u64,
    dynamic_viewport: bool,
    spin_degrees_per_frame: f32,
}

/// Owns every GPU object plus the window they draw into.
///
/// IMPORTANT: Field order matters for Drop! The deletion queue must flush
/// before the device goes, and the window must outlive its surface.
pub struct Engine<W: SurfaceProvider> {
    // ─────────────────────────────────────────────────────────────────────────
    // FRAME STATE
    // ─────────────────────────────────────────────────────────────────────────
    frame_number: u64,
    suboptimal_reported: bool,
    settings: FrameSettings,
    /// Renderables resolved once at init; the scene never changes afterwards
    draw_list: Vec<DrawItem>,
    camera: Camera,

    // ─────────────────────────────────────────────────────────────────────────
    // QUEUE-OWNED HANDLES (destroyed by deletion_queue)
    // ─────────────────────────────────────────────────────────────────────────
    sync: FrameSync,
    command: CommandContext,
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    swapchain: Swapchain,
    deletion_queue: DeletionQueue,

    // ─────────────────────────────────────────────────────────────────────────
    // ROOT OBJECTS (dropped in this order)
    // ─────────────────────────────────────────────────────────────────────────
    device: DeviceContext,
    _surface: SurfaceContext,
    _instance: InstanceContext,
    window: W,
}

impl<W: SurfaceProvider> Engine<W> {
    /// Create every GPU object the frame loop needs.
    ///
    /// On failure, whatever was already created is destroyed before the
    /// error is returned.
    pub fn init(window: W, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        // Step 1: Instance, surface, device
        let instance = InstanceContext::new(
            &config.window.title,
            window.required_extensions()?,
            config.validation_enabled(),
        )?;
        let surface = SurfaceContext::new(&instance.entry, &instance.instance, &window)?;
        let device = DeviceContext::new(&instance.instance, &surface)?;

        // Everything below is torn down through the queue. Declared after the
        // roots, so on an early return it flushes before they drop.
        let mut deletion_queue = DeletionQueue::new();

        // Step 2: Swapchain and the render targets built on it
        let swapchain = Swapchain::new(
            &instance.instance,
            &device,
            &surface,
            window.framebuffer_size(),
            config.graphics.prefer_mailbox,
            &mut deletion_queue,
        )?;
        let render_pass = create_render_pass(&device.device, swapchain.format, &mut deletion_queue)?;
        let framebuffers = create_framebuffers(
            &device.device,
            &swapchain.image_views,
            render_pass,
            swapchain.extent,
            &mut deletion_queue,
        )?;
        check_render_targets(
            swapchain.images.len(),
            swapchain.image_views.len(),
            framebuffers.len(),
        )?;

        // Step 3: Command recording and frame sync
        let command = CommandContext::new(
            &device.device,
            device.graphics_queue_family,
            &mut deletion_queue,
        )?;
        let sync = FrameSync::new(&device.device, &mut deletion_queue)?;

        // Step 4: Pipeline and scene
        let pipeline = build_mesh_pipeline(
            &device.device,
            render_pass,
            swapchain.extent,
            config,
            &mut deletion_queue,
        )?;
        let scene = init_scene(&instance, &device, pipeline, config, &mut deletion_queue)?;
        let draw_list = scene.draw_list()?;

        log::info!(
            "Vulkan initialized successfully! ({} objects registered for teardown)",
            deletion_queue.len()
        );

        Ok(Self {
            frame_number: 0,
            suboptimal_reported: false,
            settings: FrameSettings {
                timeout_ns: config.graphics.frame_timeout_ns,
                dynamic_viewport: config.graphics.dynamic_viewport,
                spin_degrees_per_frame: config.scene.spin_degrees_per_frame,
            },
            draw_list,
            camera: Camera::from_config(&config.scene),
            sync,
            command,
            framebuffers,
            render_pass,
            swapchain,
            deletion_queue,
            device,
            _surface: surface,
            _instance: instance,
            window,
        })
    }

    /// Draw until the window asks to close. Any frame error ends the loop.
    pub fn run(&mut self) -> Result<()> {
        log::info!("Entering frame loop");

        while !self.window.should_close() {
            self.window.poll_events();
            self.draw()?;
            self.window.swap_buffers();
        }

        log::info!("Frame loop finished after {} frames", self.frame_number);
        Ok(())
    }

    /// Wait for the GPU, then destroy everything in reverse creation order
    pub fn cleanup(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.deletion_queue.is_empty() {
            return Ok(());
        }

        log::info!("Cleaning up Vulkan resources...");

        // Flush even if a wait fails: the device is going away regardless
        let waited = self
            .sync
            .wait(&self.device.device, self.settings.timeout_ns)
            .and_then(|()| self.device.wait_idle());
        self.deletion_queue.flush();

        waited.context("GPU did not go idle before cleanup")
    }
}

impl<W: SurfaceProvider> Drop for Engine<W> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("{:?}", e);
        }
        log::info!("Cleanup complete");
    }
}

/// Load the configured shaders and build the pipeline for vertex-colored meshes
fn build_mesh_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    config: &Config,
    deletion_queue: &mut DeletionQueue,
) -> Result<BuiltPipeline> {
    let vertex = load_spirv(&config.assets.vertex_shader_path())?;
    let fragment = load_spirv(&config.assets.fragment_shader_path())?;
    let (vertex_bindings, vertex_attributes) = Vertex::input_description();

    let mut pipeline_config = PipelineConfig::new(extent);
    pipeline_config.stages = vec![
        ShaderStage {
            stage: vk::ShaderStageFlags::VERTEX,
            code: vertex,
        },
        ShaderStage {
            stage: vk::ShaderStageFlags::FRAGMENT,
            code: fragment,
        },
    ];
    pipeline_config.vertex_bindings = vertex_bindings;
    pipeline_config.vertex_attributes = vertex_attributes;
    pipeline_config.dynamic_viewport = config.graphics.dynamic_viewport;
    pipeline_config.push_constant_ranges = vec![MeshPushConstants::range()];

    let pipeline = pipeline_config
        .build(device, render_pass, deletion_queue)
        .context("Failed to build mesh pipeline")?;

    log::info!("Created mesh pipeline");
    Ok(pipeline)
}

/// Upload the built-in mesh and lay out the triangle grid
fn init_scene(
    instance: &InstanceContext,
    device: &DeviceContext,
    pipeline: BuiltPipeline,
    config: &Config,
    deletion_queue: &mut DeletionQueue,
) -> Result<Scene> {
    let allocator = ResourceAllocator::new(
        &instance.instance,
        &device.device,
        device.physical_device,
        deletion_queue,
    )?;

    let mut scene = Scene::new();

    let mesh = Mesh::upload(&allocator, DEFAULT_MESH, triangle_vertices(), deletion_queue)?;
    scene.insert_mesh(DEFAULT_MESH, mesh);
    scene.create_material(DEFAULT_MATERIAL, pipeline.pipeline, pipeline.layout);

    for transform in grid_transforms(config.scene.grid_radius) {
        scene.add_renderable(RenderObject {
            mesh: DEFAULT_MESH.to_string(),
            material: DEFAULT_MATERIAL.to_string(),
            transform,
        })?;
    }

    log::info!("Scene ready: {} renderables", scene.renderables().len());
    Ok(scene)
}
