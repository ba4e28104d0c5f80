// Render pass and framebuffers
//
// One color attachment (the swapchain image), one subpass. Every swapchain
// image view gets exactly one framebuffer bound to this pass.

use anyhow::{Context, Result};
use ash::vk;

use super::deletion::DeletionQueue;
use crate::error::RendererError;

/// Create the single color-output render pass
pub fn create_render_pass(
    device: &ash::Device,
    format: vk::Format,
    deletion_queue: &mut DeletionQueue,
) -> Result<vk::RenderPass> {
    // Color attachment (the swapchain image): cleared on load, kept for present
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    // The layout transition must wait until the acquire semaphore has fired,
    // which the submit ties to COLOR_ATTACHMENT_OUTPUT
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    let render_pass = unsafe { device.create_render_pass(&render_pass_info, None) }
        .context("Failed to create render pass")?;

    let owner = device.clone();
    deletion_queue.push(move || unsafe {
        owner.destroy_render_pass(render_pass, None);
    });

    Ok(render_pass)
}

/// Create one framebuffer per swapchain image view.
///
/// The result is index-aligned with `image_views`.
pub fn create_framebuffers(
    device: &ash::Device,
    image_views: &[vk::ImageView],
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    deletion_queue: &mut DeletionQueue,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());

    for &image_view in image_views {
        let attachments = &[image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.create_framebuffer(&framebuffer_info, None) }
            .context("Failed to create framebuffer")?;

        let owner = device.clone();
        deletion_queue.push(move || unsafe {
            owner.destroy_framebuffer(framebuffer, None);
        });
        framebuffers.push(framebuffer);
    }

    log::info!("Created {} framebuffers", framebuffers.len());
    Ok(framebuffers)
}

/// Every swapchain image needs exactly one view and one framebuffer
pub fn check_render_targets(
    images: usize,
    image_views: usize,
    framebuffers: usize,
) -> Result<(), RendererError> {
    if images == image_views && image_views == framebuffers {
        return Ok(());
    }

    Err(RendererError::RenderTargetMismatch {
        images,
        image_views,
        framebuffers,
    })
}
