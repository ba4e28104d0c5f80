// Synchronization primitives
//
// One fence for CPU-GPU sync, two semaphores for GPU-GPU ordering
// (acquire -> render -> present). A single set: one frame in flight.

use anyhow::Result;
use ash::vk;

use super::deletion::DeletionQueue;
use crate::error::RendererError;

/// Fence flags for the in-flight fence.
///
/// Created signaled so the first frame's wait returns immediately.
pub fn in_flight_fence_flags() -> vk::FenceCreateFlags {
    vk::FenceCreateFlags::SIGNALED
}

pub struct FrameSync {
    /// Signaled by image acquisition, waited on by the render submit
    pub image_available: vk::Semaphore,
    /// Signaled by the render submit, waited on by present
    pub render_finished: vk::Semaphore,
    /// Signaled when the GPU retires the frame's command buffer
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device, deletion_queue: &mut DeletionQueue) -> Result<Self> {
        let fence_info = vk::FenceCreateInfo::builder().flags(in_flight_fence_flags());
        let in_flight_fence = unsafe { device.create_fence(&fence_info, None) }?;

        let owner = device.clone();
        deletion_queue.push(move || unsafe {
            owner.destroy_fence(in_flight_fence, None);
        });

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let image_available = unsafe { device.create_semaphore(&semaphore_info, None) }?;
        let owner = device.clone();
        deletion_queue.push(move || unsafe {
            owner.destroy_semaphore(image_available, None);
        });

        let render_finished = unsafe { device.create_semaphore(&semaphore_info, None) }?;
        let owner = device.clone();
        deletion_queue.push(move || unsafe {
            owner.destroy_semaphore(render_finished, None);
        });

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    /// Block until the previous frame's GPU work has retired
    pub fn wait(&self, device: &ash::Device, timeout_ns: u64) -> Result<()> {
        match unsafe { device.wait_for_fences(&[self.in_flight_fence], true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RendererError::Timeout("in-flight fence").into()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.reset_fences(&[self.in_flight_fence]) }?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_starts_signaled() {
        assert!(in_flight_fence_flags().contains(vk::FenceCreateFlags::SIGNALED));
    }
}
