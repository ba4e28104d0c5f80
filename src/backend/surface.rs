// Surface - the bridge between the window system and Vulkan
//
// The window lives outside the renderer. All the engine needs from it is
// captured by `SurfaceProvider`; the resulting VkSurfaceKHR is owned here.

use anyhow::Result;
use ash::{vk, Entry};
use std::os::raw::c_char;

/// What the renderer consumes from a native window
pub trait SurfaceProvider {
    /// Instance extensions the native surface type needs
    fn required_extensions(&self) -> Result<&'static [*const c_char]>;

    /// Create a drawable surface for this window.
    ///
    /// # Safety
    /// `instance` must have been created with `required_extensions` enabled,
    /// and the window must outlive the returned surface.
    unsafe fn create_surface(&self, entry: &Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR>;

    /// Framebuffer size in physical pixels
    fn framebuffer_size(&self) -> (u32, u32);

    /// Pump pending window events without blocking
    fn poll_events(&mut self);

    fn should_close(&self) -> bool;

    /// Post-present sync point with the native window system
    fn swap_buffers(&mut self);
}

/// Owned VkSurfaceKHR, destroyed before the instance that created it
pub struct SurfaceContext {
    pub loader: ash::extensions::khr::Surface,
    pub surface: vk::SurfaceKHR,
}

impl SurfaceContext {
    pub fn new<W: SurfaceProvider>(
        entry: &Entry,
        instance: &ash::Instance,
        window: &W,
    ) -> Result<Self> {
        let loader = ash::extensions::khr::Surface::new(entry, instance);
        let surface = unsafe { window.create_surface(entry, instance)? };

        log::info!("Created window surface");

        Ok(Self { loader, surface })
    }

    /// Whether queue family `index` can present to this surface
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, index: u32) -> Result<bool> {
        let supported = unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, index, self.surface)?
        };
        Ok(supported)
    }
}

impl Drop for SurfaceContext {
    fn drop(&mut self) {
        log::debug!("Destroying surface");
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
