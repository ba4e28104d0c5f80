// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (prefer discrete GPU)
// - Graphics / present queue family discovery
// - Logical device + queue creation

use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::CStr;

use super::instance::missing_names;
use super::surface::SurfaceContext;
use crate::error::RendererError;

/// Queue family indices found on the selected GPU
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both roles filled, or a fatal setup error
    pub fn complete(self) -> Result<(u32, u32), RendererError> {
        match (self.graphics, self.present) {
            (Some(graphics), Some(present)) => Ok((graphics, present)),
            (graphics, present) => Err(RendererError::MissingQueueFamily { graphics, present }),
        }
    }
}

/// Distinct families among {graphics, present}: one queue create info each
pub fn unique_families(graphics: u32, present: u32) -> BTreeSet<u32> {
    [graphics, present].into_iter().collect()
}

/// Pick the first discrete GPU, or the first device if there is none
pub fn select_physical_device(device_types: &[vk::PhysicalDeviceType]) -> Option<usize> {
    device_types
        .iter()
        .position(|&ty| ty == vk::PhysicalDeviceType::DISCRETE_GPU)
        .or_else(|| (!device_types.is_empty()).then_some(0))
}

/// Scan families in index order; graphics and present are recorded independently
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> Result<QueueFamilyIndices>
where
    F: FnMut(u32) -> Result<bool>,
{
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;

        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(index);
        }
        if indices.present.is_none() && supports_present(index)? {
            indices.present = Some(index);
        }
        if indices.graphics.is_some() && indices.present.is_some() {
            break;
        }
    }

    Ok(indices)
}

/// Logical device and its queues. Outlives every other GPU object.
pub struct DeviceContext {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub present_queue: vk::Queue,
    pub present_queue_family: u32,
}

impl DeviceContext {
    pub fn new(instance: &ash::Instance, surface: &SurfaceContext) -> Result<Self> {
        // Step 1: Pick physical device (GPU)
        let physical_device = Self::pick_physical_device(instance)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!("Selected GPU: {}", device_name(&properties));
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // Step 2: Find graphics and present queue families
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let indices = find_queue_families(&families, |index| {
            surface.supports_present(physical_device, index)
        })?;
        let (graphics_family, present_family) = indices.complete()?;
        log::info!(
            "Queue families: graphics={}, present={}",
            graphics_family,
            present_family
        );

        // Step 3: Create logical device
        let device =
            Self::create_logical_device(instance, physical_device, graphics_family, present_family)?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        Ok(Self {
            device,
            physical_device,
            graphics_queue,
            graphics_queue_family: graphics_family,
            present_queue,
            present_queue_family: present_family,
        })
    }

    fn pick_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        let device_types: Vec<vk::PhysicalDeviceType> = devices
            .iter()
            .map(|&device| {
                let props = unsafe { instance.get_physical_device_properties(device) };
                log::info!("Available device: {} ({:?})", device_name(&props), props.device_type);
                props.device_type
            })
            .collect();

        let index = select_physical_device(&device_types).ok_or(RendererError::NoPhysicalDevice)?;
        Ok(devices[index])
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_family: u32,
        present_family: u32,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> =
            unique_families(graphics_family, present_family)
                .into_iter()
                .map(|family| {
                    vk::DeviceQueueCreateInfo::builder()
                        .queue_family_index(family)
                        .queue_priorities(&queue_priorities)
                        .build()
                })
                .collect();

        // Required device extensions
        let required = [ash::extensions::khr::Swapchain::name()];
        let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }?;
        let available: Vec<&CStr> = available
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();
        if let Some(missing) = missing_names(&required, &available).first() {
            return Err(
                RendererError::MissingExtension(missing.to_string_lossy().into_owned()).into(),
            );
        }

        let extensions: Vec<*const std::os::raw::c_char> =
            required.iter().map(|name| name.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = self.wait_idle() {
            log::error!("device_wait_idle failed during teardown: {:?}", e);
        }

        unsafe {
            self.device.destroy_device(None);
        }
    }
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::PhysicalDeviceType as Ty;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn first_discrete_gpu_wins() {
        let devices = [Ty::INTEGRATED_GPU, Ty::DISCRETE_GPU, Ty::DISCRETE_GPU];
        assert_eq!(select_physical_device(&devices), Some(1));
    }

    #[test]
    fn falls_back_to_first_device() {
        assert_eq!(select_physical_device(&[Ty::INTEGRATED_GPU]), Some(0));
        assert_eq!(select_physical_device(&[Ty::CPU, Ty::VIRTUAL_GPU]), Some(0));
    }

    #[test]
    fn no_devices_selects_nothing() {
        assert_eq!(select_physical_device(&[]), None);
    }

    #[test]
    fn selection_is_pure() {
        let devices = [Ty::OTHER, Ty::INTEGRATED_GPU, Ty::DISCRETE_GPU, Ty::CPU];
        let first = select_physical_device(&devices);
        for _ in 0..8 {
            assert_eq!(select_physical_device(&devices), first);
        }
        assert_eq!(first, Some(2));
    }

    #[test]
    fn graphics_and_present_can_differ() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];

        let indices = find_queue_families(&families, |index| Ok(index == 2)).unwrap();

        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));
        assert_eq!(indices.complete().unwrap(), (1, 2));
    }

    #[test]
    fn first_matching_family_is_kept() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];

        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();

        assert_eq!(indices, QueueFamilyIndices { graphics: Some(0), present: Some(0) });
    }

    #[test]
    fn missing_present_family_is_fatal() {
        let families = [family(vk::QueueFlags::GRAPHICS)];

        let indices = find_queue_families(&families, |_| Ok(false)).unwrap();

        assert!(matches!(
            indices.complete(),
            Err(RendererError::MissingQueueFamily { graphics: Some(0), present: None })
        ));
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = [family(vk::QueueFlags::GRAPHICS)];

        let result = find_queue_families(&families, |_| Err(vk::Result::ERROR_SURFACE_LOST_KHR.into()));

        assert!(result.is_err());
    }

    #[test]
    fn shared_family_creates_one_queue() {
        assert_eq!(unique_families(0, 0).len(), 1);
        assert_eq!(unique_families(0, 2).into_iter().collect::<Vec<_>>(), vec![0, 2]);
    }
}
