// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Format and present mode are negotiated once; a changed surface extent
// would need a new swapchain, which this engine does not do.

use anyhow::{Context, Result};
use ash::vk;

use super::deletion::DeletionQueue;
use super::device::DeviceContext;
use super::surface::SurfaceContext;
use crate::error::RendererError;

/// First format matching 8-bit BGRA sRGB, else whatever the surface lists first
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, RendererError> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .ok_or(RendererError::NoSurfaceFormats)
}

/// FIFO unless MAILBOX is offered and wanted.
///
/// MAILBOX never blocks the renderer, which costs power: battery-bound
/// targets should turn `prefer_mailbox` off.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    prefer_mailbox: bool,
) -> Result<vk::PresentModeKHR, RendererError> {
    if modes.is_empty() {
        return Err(RendererError::NoPresentModes);
    }

    if prefer_mailbox && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        Ok(vk::PresentModeKHR::MAILBOX)
    } else {
        Ok(vk::PresentModeKHR::FIFO) // FIFO is always supported
    }
}

/// Surface's current extent, or the framebuffer size clamped to its bounds
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: framebuffer
            .0
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: framebuffer
            .1
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum so we never wait on the driver; 0 max means unbounded
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create the swapchain and one view per image.
    ///
    /// Teardown for the swapchain and every view is pushed onto
    /// `deletion_queue` as soon as each one exists.
    pub fn new(
        instance: &ash::Instance,
        device: &DeviceContext,
        surface: &SurfaceContext,
        framebuffer_size: (u32, u32),
        prefer_mailbox: bool,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Self> {
        let physical_device = device.physical_device;

        // Query surface capabilities
        let caps = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(physical_device, surface.surface)
        }?;
        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(physical_device, surface.surface)
        }?;
        let present_modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(physical_device, surface.surface)
        }?;

        let surface_format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&present_modes, prefer_mailbox)?;
        let extent = choose_extent(&caps, framebuffer_size);
        let image_count = choose_image_count(&caps);

        log::info!(
            "Creating swapchain: {}x{} {:?} {:?}, {} images requested",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count
        );

        // Images are shared between the two families when they differ
        let family_indices = [device.graphics_queue_family, device.present_queue_family];
        let (sharing_mode, sharing_families): (vk::SharingMode, &[u32]) =
            if device.graphics_queue_family != device.present_queue_family {
                (vk::SharingMode::CONCURRENT, &family_indices)
            } else {
                (vk::SharingMode::EXCLUSIVE, &[])
            };

        let swapchain_loader = ash::extensions::khr::Swapchain::new(instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(sharing_families)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let loader = swapchain_loader.clone();
        deletion_queue.push(move || unsafe {
            loader.destroy_swapchain(swapchain, None);
        });

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }?;
        log::info!("Created swapchain with {} images", images.len());

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view = create_image_view(&device.device, image, surface_format.format)?;

            let device = device.device.clone();
            deletion_queue.push(move || unsafe {
                device.destroy_image_view(view, None);
            });
            image_views.push(view);
        }

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            format: surface_format.format,
            extent,
        })
    }

    /// Acquire next image for rendering, signalling `semaphore` once it is ready.
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> Result<(u32, bool)> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok(acquired) => Ok(acquired),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
                Err(RendererError::Timeout("swapchain image").into())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RendererError::SwapchainOutOfDate.into()),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen; returns whether it was suboptimal
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RendererError::SwapchainOutOfDate.into()),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }
}

fn create_image_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }.context("Failed to create image view")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D { width: 800, height: 600 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_bgra_srgb_nonlinear() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let chosen = choose_surface_format(&formats).unwrap();

        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn first_preferred_match_wins() {
        let formats = [
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn empty_format_list_is_fatal() {
        assert!(matches!(choose_surface_format(&[]), Err(RendererError::NoSurfaceFormats)));
    }

    #[test]
    fn fifo_when_mailbox_absent() {
        let mode = choose_present_mode(&[vk::PresentModeKHR::FIFO], true).unwrap();
        assert_eq!(mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn mailbox_when_offered() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true).unwrap(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn mailbox_can_be_declined() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, false).unwrap(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn empty_present_modes_are_fatal() {
        assert!(matches!(choose_present_mode(&[], true), Err(RendererError::NoPresentModes)));
    }

    #[test]
    fn current_extent_is_used_when_defined() {
        let extent = choose_extent(&caps(2, 3), (1700, 900));
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn undefined_extent_clamps_framebuffer_size() {
        let mut caps = caps(2, 3);
        caps.current_extent = vk::Extent2D { width: u32::MAX, height: u32::MAX };
        caps.max_image_extent = vk::Extent2D { width: 1024, height: 1024 };
        caps.min_image_extent = vk::Extent2D { width: 64, height: 64 };

        let extent = choose_extent(&caps, (1700, 32));

        assert_eq!((extent.width, extent.height), (1024, 64));
    }

    #[test]
    fn image_count_is_min_plus_one_within_bounds() {
        for min in 1..6 {
            for max in min..10 {
                let count = choose_image_count(&caps(min, max));
                assert!(count <= max);
                if min + 1 <= max {
                    assert_eq!(count, min + 1);
                } else {
                    assert_eq!(count, max);
                }
            }
        }
    }

    #[test]
    fn unbounded_max_gives_min_plus_one() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(7, 0)), 8);
    }
}
