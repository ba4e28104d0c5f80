// Command pool and the single reusable command buffer
//
// The buffer is reset and re-recorded every frame. The in-flight fence is
// what makes that reset safe.

use anyhow::{Context, Result};
use ash::vk;

use super::deletion::DeletionQueue;

/// The pool itself is owned by the deletion queue
pub struct CommandContext {
    pub buffer: vk::CommandBuffer,
}

impl CommandContext {
    pub fn new(
        device: &ash::Device,
        queue_family: u32,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            // RESET: the one buffer is reset individually each frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        // Destroying the pool frees its buffers
        let owner = device.clone();
        deletion_queue.push(move || unsafe {
            owner.destroy_command_pool(pool, None);
        });

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffer")?[0];

        Ok(Self { buffer })
    }

    /// Reset and begin a one-time-submit recording
    pub fn begin(&self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device.reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(self.buffer, &begin_info)?;
        }

        Ok(self.buffer)
    }

    pub fn end(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.end_command_buffer(self.buffer) }?;
        Ok(())
    }
}
