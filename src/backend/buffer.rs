// GPU buffer allocation
//
// Wraps gpu-allocator for the write-once vertex buffers the engine uploads.
// The allocator is shared with the deletion closures of every buffer it
// hands out, and is itself torn down after all of them.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::cell::RefCell;
use std::rc::Rc;

use super::deletion::DeletionQueue;

/// Handle to a buffer whose memory is owned by the deletion queue
#[derive(Debug, Clone, Copy)]
pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
}

pub struct ResourceAllocator {
    allocator: Option<Allocator>,
    device: ash::Device,
}

impl ResourceAllocator {
    /// Create the allocator and register its own shutdown.
    ///
    /// Buffers allocated later register their teardown after this, so they
    /// are all freed before the allocator goes away.
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Rc<RefCell<Self>>> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU allocator")?;

        let shared = Rc::new(RefCell::new(Self {
            allocator: Some(allocator),
            device: device.clone(),
        }));

        let owner = Rc::clone(&shared);
        deletion_queue.push(move || {
            log::debug!("Destroying GPU allocator");
            owner.borrow_mut().allocator = None;
        });

        Ok(shared)
    }

    fn allocator(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .context("GPU allocator used after shutdown")
    }

    /// Create a host-visible buffer holding a copy of `data`.
    ///
    /// The buffer and its memory are released through `deletion_queue`.
    pub fn upload<T: bytemuck::Pod>(
        this: &Rc<RefCell<Self>>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
        deletion_queue: &mut DeletionQueue,
    ) -> Result<AllocatedBuffer> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.is_empty() {
            anyhow::bail!("{} has no data to upload", name);
        }

        let (buffer, allocation) = this.borrow_mut().create_buffer(name, usage, bytes)?;
        let size = bytes.len() as vk::DeviceSize;

        let owner = Rc::clone(this);
        deletion_queue.push(move || owner.borrow_mut().destroy_buffer(buffer, allocation));

        log::debug!("Uploaded {} ({} bytes)", name, size);
        Ok(AllocatedBuffer { buffer })
    }

    fn create_buffer(
        &mut self,
        name: &str,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> Result<(vk::Buffer, Allocation)> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(bytes.len() as vk::DeviceSize)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocated = self.allocator()?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let mut allocation = match allocated {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e).context("Failed to allocate buffer memory");
            }
        };

        if let Err(e) = bind_and_write(&self.device, buffer, &mut allocation, bytes) {
            self.destroy_buffer(buffer, allocation);
            return Err(e);
        }

        Ok((buffer, allocation))
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer, allocation: Allocation) {
        unsafe { self.device.destroy_buffer(buffer, None) };

        match self.allocator() {
            Ok(allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    log::error!("Failed to free buffer memory: {:?}", e);
                }
            }
            Err(e) => log::error!("{:#}", e),
        }
    }
}

/// Bind memory, then copy through the persistent host mapping
fn bind_and_write(
    device: &ash::Device,
    buffer: vk::Buffer,
    allocation: &mut Allocation,
    bytes: &[u8],
) -> Result<()> {
    unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        .context("Failed to bind buffer memory")?;

    let mapped = allocation
        .mapped_slice_mut()
        .context("CpuToGpu allocation is not host mapped")?;
    mapped[..bytes.len()].copy_from_slice(bytes);

    Ok(())
}
