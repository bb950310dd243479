//! Vulkan instance, validation layers, debug messenger and window surface

use std::ffi::{c_char, CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Surface;
use ash::{vk, Entry, Instance};

use crate::render::vulkan::{InitError, VulkanError};

/// Khronos validation layer requested when validation is on
pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Window system seam: everything initialization needs from a window
pub trait SurfaceProvider {
    /// Instance extensions the window system needs for presentation
    fn required_instance_extensions(&self) -> Result<Vec<String>, InitError>;

    /// Create a presentation surface for `instance`
    fn create_surface(&mut self, instance: vk::Instance) -> Result<vk::SurfaceKHR, InitError>;

    /// Current framebuffer size in pixels
    fn framebuffer_extent(&self) -> vk::Extent2D;
}

/// Names from `required` that are absent from `available`, in request order
pub fn missing_names(available: &[String], required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !available.contains(name))
        .cloned()
        .collect()
}

/// Read a fixed-size, NUL-terminated Vulkan name
pub(crate) fn vk_name(raw: &[c_char]) -> String {
    unsafe { CStr::from_ptr(raw.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

pub(crate) fn to_cstrings(names: &[String]) -> Result<Vec<CString>, InitError> {
    names
        .iter()
        .map(|name| {
            CString::new(name.as_str())
                .map_err(|_| InitError::Config(format!("name contains NUL: {name:?}")))
        })
        .collect()
}

/// Loaded entry points, the instance and the optional debug messenger
pub struct VulkanInstance {
    /// Loader entry points
    pub entry: Entry,
    /// Instance
    pub instance: Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    layers: Vec<CString>,
}

impl VulkanInstance {
    /// Create the instance after checking every extension and layer it needs
    pub fn new(
        provider: &dyn SurfaceProvider,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<Self, InitError> {
        let entry = unsafe { Entry::load() }.map_err(|e| InitError::Loader(e.to_string()))?;

        let mut extensions = provider.required_instance_extensions()?;
        if enable_validation {
            extensions.push(vk_name_of(DebugUtils::name()));
        }

        let available_extensions: Vec<String> = entry
            .enumerate_instance_extension_properties(None)
            .map_err(VulkanError::Api)?
            .iter()
            .map(|p| vk_name(&p.extension_name))
            .collect();
        if let Some(missing) = missing_names(&available_extensions, &extensions).into_iter().next() {
            return Err(InitError::MissingInstanceExtension(missing));
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.to_string()]
        } else {
            Vec::new()
        };
        if !layer_names.is_empty() {
            let available_layers: Vec<String> = entry
                .enumerate_instance_layer_properties()
                .map_err(VulkanError::Api)?
                .iter()
                .map(|p| vk_name(&p.layer_name))
                .collect();
            if let Some(missing) = missing_names(&available_layers, &layer_names).into_iter().next() {
                return Err(InitError::MissingValidationLayer(missing));
            }
        }

        let app_name = CString::new(app_name)
            .map_err(|_| InitError::Config("application name contains NUL".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"vk_engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let extension_names = to_cstrings(&extensions)?;
        let extension_ptrs: Vec<*const c_char> = extension_names.iter().map(|n| n.as_ptr()).collect();
        let layers = to_cstrings(&layer_names)?;
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|n| n.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(VulkanError::Api)?;

        let debug_utils = if enable_validation {
            let loader = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&loader) {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        log::info!(
            "Vulkan instance created ({} extensions, validation {})",
            extensions.len(),
            if enable_validation { "on" } else { "off" }
        );

        Ok(Self {
            entry,
            instance,
            debug_utils,
            layers,
        })
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> Result<vk::DebugUtilsMessengerEXT, VulkanError> {
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

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(VulkanError::Api)
    }

    /// Layers enabled on the instance; devices enable the same list
    pub fn layers(&self) -> &[CString] {
        &self.layers
    }

    /// Whether validation messages are being forwarded to the log
    pub fn validation_enabled(&self) -> bool {
        self.debug_utils.is_some()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("Vulkan instance destroyed");
    }
}

fn vk_name_of(name: &CStr) -> String {
    name.to_string_lossy().into_owned()
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::trace!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Presentation surface and its loader, destroyed on drop
///
/// Must be dropped before the [`VulkanInstance`] it was created from.
pub struct SurfaceHandle {
    /// `VK_KHR_surface` entry points
    pub loader: Surface,
    /// Surface handle
    pub surface: vk::SurfaceKHR,
}

impl SurfaceHandle {
    /// Ask the provider for a surface on `instance`
    pub fn new(instance: &VulkanInstance, provider: &mut dyn SurfaceProvider) -> Result<Self, InitError> {
        let surface = provider.create_surface(instance.instance.handle())?;
        let loader = Surface::new(&instance.entry, &instance.instance);
        Ok(Self { loader, surface })
    }
}

impl Drop for SurfaceHandle {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_names_preserves_request_order() {
        let available = names(&["VK_KHR_surface", "VK_KHR_xcb_surface"]);
        let required = names(&["VK_EXT_debug_utils", "VK_KHR_surface", "VK_KHR_wayland_surface"]);

        assert_eq!(
            missing_names(&available, &required),
            names(&["VK_EXT_debug_utils", "VK_KHR_wayland_surface"])
        );
    }

    #[test]
    fn test_nothing_missing() {
        let available = names(&["VK_KHR_surface", "VK_KHR_xcb_surface"]);
        assert!(missing_names(&available, &names(&["VK_KHR_surface"])).is_empty());
        assert!(missing_names(&available, &[]).is_empty());
    }

    #[test]
    fn test_vk_name_stops_at_nul() {
        let mut raw = [0 as c_char; 16];
        for (dst, src) in raw.iter_mut().zip(b"VK_KHR_surface") {
            *dst = *src as c_char;
        }
        assert_eq!(vk_name(&raw), "VK_KHR_surface");
    }

    #[test]
    fn test_interior_nul_rejected() {
        assert!(matches!(
            to_cstrings(&names(&["bad\0name"])),
            Err(InitError::Config(_))
        ));
    }
}
