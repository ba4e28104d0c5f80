// Vulkan Instance - root of every other API object
//
// Responsibilities:
// - Load the Vulkan library
// - Validate requested layers (optional) and extensions (required)
// - Debug messenger forwarding validation output to the log

use anyhow::{Context, Result};
use ash::{vk, Entry};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use crate::error::RendererError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance wrapper with automatic cleanup
pub struct InstanceContext {
    // Order matters for drop: instance must go before the loader
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    pub entry: Entry,
}

impl InstanceContext {
    /// Create the instance
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `surface_extensions` - Extensions the window surface requires
    /// * `enable_validation` - Request Khronos validation (skipped if absent)
    pub fn new(
        app_name: &str,
        surface_extensions: &[*const c_char],
        enable_validation: bool,
    ) -> Result<Self> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Layers: validation is a diagnostic, run without it if missing
        let available_layers = entry.enumerate_instance_layer_properties()?;
        let layer_names: Vec<&CStr> = available_layers
            .iter()
            .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
            .collect();
        log::debug!("{} instance layers available: {:?}", layer_names.len(), layer_names);

        let validation = enable_validation
            && missing_names(&[VALIDATION_LAYER], &layer_names).is_empty();
        if enable_validation && !validation {
            log::warn!(
                "{} requested but not installed, continuing without validation",
                VALIDATION_LAYER.to_string_lossy()
            );
        }

        // Extensions: everything the surface needs, plus debug utils
        let mut extensions: Vec<*const c_char> = surface_extensions.to_vec();
        if validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let available_extensions = entry.enumerate_instance_extension_properties(None)?;
        let extension_names: Vec<&CStr> = available_extensions
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();
        log::debug!(
            "{} instance extensions available: {:?}",
            extension_names.len(),
            extension_names
        );

        let required: Vec<&CStr> = extensions
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect();
        if let Some(missing) = missing_names(&required, &extension_names).first() {
            return Err(RendererError::MissingExtension(missing.to_string_lossy().into_owned()).into());
        }
        log::info!("Enabling instance extensions: {:?}", required);

        let layers: Vec<*const c_char> = if validation {
            log::info!("Enabling layer {}", VALIDATION_LAYER.to_string_lossy());
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"vk-engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        let debug_utils = if validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            debug_utils,
            instance,
            entry,
        })
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Names in `required` that do not appear in `available`, in request order
pub fn missing_names<'a>(required: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|name| !available.contains(name))
        .collect()
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_missing_when_all_present() {
        let available = [c"VK_KHR_surface", c"VK_KHR_xlib_surface", c"VK_EXT_debug_utils"];
        let required = [c"VK_KHR_surface", c"VK_EXT_debug_utils"];

        assert!(missing_names(&required, &available).is_empty());
    }

    #[test]
    fn reports_missing_in_request_order() {
        let available = [c"VK_KHR_surface"];
        let required = [c"VK_KHR_win32_surface", c"VK_KHR_surface", c"VK_EXT_debug_utils"];

        assert_eq!(
            missing_names(&required, &available),
            vec![c"VK_KHR_win32_surface", c"VK_EXT_debug_utils"]
        );
    }

    #[test]
    fn full_name_comparison_not_prefix() {
        // Names sharing a first character must not be confused
        let available = [c"VK_LAYER_LUNARG_monitor"];
        let required = [VALIDATION_LAYER];

        assert_eq!(missing_names(&required, &available), vec![VALIDATION_LAYER]);
    }
}
