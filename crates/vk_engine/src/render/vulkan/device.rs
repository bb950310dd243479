//! Physical device selection and logical device creation
//!
//! Selection walks the enumerated devices in order and takes the first one
//! with a graphics queue family, a family able to present to the surface,
//! every required device extension, and at least one surface format and
//! present mode. Queries go through [`DeviceProbe`] so the policy can be
//! exercised without a GPU.

use std::ffi::c_char;

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::render::vulkan::context::{to_cstrings, vk_name, SurfaceHandle, VulkanInstance};
use crate::render::vulkan::{InitError, VulkanError, VulkanResult};

/// What one queue family can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueFamilyCaps {
    /// Supports graphics commands
    pub graphics: bool,
    /// Can present to the target surface
    pub present: bool,
}

/// Queue families chosen for graphics and presentation; may be the same family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family receiving draw and transfer submissions
    pub graphics: u32,
    /// Family receiving present requests
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Whether one family serves both roles
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families, graphics first, for queue create infos
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// First graphics family and first present family, searched independently
///
/// Stops querying as soon as both are known.
pub fn find_queue_families<F>(family_count: u32, mut caps: F) -> VulkanResult<Option<QueueFamilyIndices>>
where
    F: FnMut(u32) -> VulkanResult<QueueFamilyCaps>,
{
    let mut graphics = None;
    let mut present = None;

    for index in 0..family_count {
        let family = caps(index)?;
        if family.graphics && graphics.is_none() {
            graphics = Some(index);
        }
        if family.present && present.is_none() {
            present = Some(index);
        }
        if let (Some(graphics), Some(present)) = (graphics, present) {
            return Ok(Some(QueueFamilyIndices { graphics, present }));
        }
    }

    Ok(None)
}

/// Surface support figures of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceSupport {
    /// Number of reported surface formats
    pub format_count: usize,
    /// Number of reported present modes
    pub present_mode_count: usize,
}

/// Device queries selection depends on
pub trait DeviceProbe {
    /// Physical devices in enumeration order
    fn physical_devices(&self) -> VulkanResult<Vec<vk::PhysicalDevice>>;

    /// Human-readable device name
    fn device_name(&self, device: vk::PhysicalDevice) -> String;

    /// Number of queue families
    fn queue_family_count(&self, device: vk::PhysicalDevice) -> u32;

    /// Capabilities of one queue family
    fn queue_family_caps(&self, device: vk::PhysicalDevice, family: u32) -> VulkanResult<QueueFamilyCaps>;

    /// Supported device extension names
    fn device_extensions(&self, device: vk::PhysicalDevice) -> VulkanResult<Vec<String>>;

    /// Surface formats and present modes available with this device
    fn surface_support(&self, device: vk::PhysicalDevice) -> VulkanResult<SurfaceSupport>;
}

/// The selected physical device; immutable once chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalDeviceChoice {
    /// Device handle
    pub device: vk::PhysicalDevice,
    /// Device name
    pub name: String,
    /// Chosen queue families
    pub queue_families: QueueFamilyIndices,
}

/// Swapchain support followed by `extra`, without duplicates
pub fn required_device_extensions(extra: &[String]) -> Vec<String> {
    let mut required = vec![SwapchainLoader::name().to_string_lossy().into_owned()];
    for name in extra {
        if !required.contains(name) {
            required.push(name.clone());
        }
    }
    required
}

fn evaluate(
    probe: &dyn DeviceProbe,
    device: vk::PhysicalDevice,
    required_extensions: &[String],
) -> VulkanResult<Result<QueueFamilyIndices, String>> {
    let Some(queue_families) = find_queue_families(probe.queue_family_count(device), |family| {
        probe.queue_family_caps(device, family)
    })?
    else {
        return Ok(Err("no graphics and present queue families".to_string()));
    };

    let available = probe.device_extensions(device)?;
    if let Some(missing) = required_extensions.iter().find(|name| !available.contains(name)) {
        return Ok(Err(format!("missing extension {missing}")));
    }

    let support = probe.surface_support(device)?;
    if support.format_count == 0 || support.present_mode_count == 0 {
        return Ok(Err("no surface formats or present modes".to_string()));
    }

    Ok(Ok(queue_families))
}

/// Pick the first suitable device
pub fn select_device(
    probe: &dyn DeviceProbe,
    required_extensions: &[String],
) -> Result<PhysicalDeviceChoice, InitError> {
    let devices = probe.physical_devices()?;

    for device in devices {
        let name = probe.device_name(device);
        match evaluate(probe, device, required_extensions) {
            Ok(Ok(queue_families)) => {
                log::info!(
                    "Selected GPU: {} (graphics family {}, present family {})",
                    name,
                    queue_families.graphics,
                    queue_families.present
                );
                return Ok(PhysicalDeviceChoice {
                    device,
                    name,
                    queue_families,
                });
            }
            Ok(Err(reason)) => log::debug!("Skipping GPU {}: {}", name, reason),
            Err(e) => log::warn!("Skipping GPU {}: query failed: {}", name, e),
        }
    }

    Err(InitError::NoSuitableDevice)
}

/// [`DeviceProbe`] backed by the instance and the window surface
pub struct SurfaceProbe<'a> {
    instance: &'a VulkanInstance,
    surface: &'a SurfaceHandle,
}

impl<'a> SurfaceProbe<'a> {
    /// Probe devices against `surface`
    pub fn new(instance: &'a VulkanInstance, surface: &'a SurfaceHandle) -> Self {
        Self { instance, surface }
    }
}

impl DeviceProbe for SurfaceProbe<'_> {
    fn physical_devices(&self) -> VulkanResult<Vec<vk::PhysicalDevice>> {
        unsafe { self.instance.instance.enumerate_physical_devices() }.map_err(VulkanError::Api)
    }

    fn device_name(&self, device: vk::PhysicalDevice) -> String {
        let properties = unsafe { self.instance.instance.get_physical_device_properties(device) };
        vk_name(&properties.device_name)
    }

    fn queue_family_count(&self, device: vk::PhysicalDevice) -> u32 {
        let families = unsafe {
            self.instance
                .instance
                .get_physical_device_queue_family_properties(device)
        };
        families.len() as u32
    }

    fn queue_family_caps(&self, device: vk::PhysicalDevice, family: u32) -> VulkanResult<QueueFamilyCaps> {
        let families = unsafe {
            self.instance
                .instance
                .get_physical_device_queue_family_properties(device)
        };
        let graphics = families
            .get(family as usize)
            .map_or(false, |f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS));
        let present = unsafe {
            self.surface
                .loader
                .get_physical_device_surface_support(device, family, self.surface.surface)
        }
        .map_err(VulkanError::Api)?;

        Ok(QueueFamilyCaps { graphics, present })
    }

    fn device_extensions(&self, device: vk::PhysicalDevice) -> VulkanResult<Vec<String>> {
        let properties = unsafe {
            self.instance
                .instance
                .enumerate_device_extension_properties(device)
        }
        .map_err(VulkanError::Api)?;

        Ok(properties.iter().map(|p| vk_name(&p.extension_name)).collect())
    }

    fn surface_support(&self, device: vk::PhysicalDevice) -> VulkanResult<SurfaceSupport> {
        let loader = &self.surface.loader;
        let surface = self.surface.surface;
        let formats = unsafe { loader.get_physical_device_surface_formats(device, surface) }
            .map_err(VulkanError::Api)?;
        let present_modes = unsafe { loader.get_physical_device_surface_present_modes(device, surface) }
            .map_err(VulkanError::Api)?;

        Ok(SurfaceSupport {
            format_count: formats.len(),
            present_mode_count: present_modes.len(),
        })
    }
}

/// Logical device with its graphics and present queues
///
/// Destroyed last among the GPU objects: every resource created from it must
/// already be gone when it drops.
pub struct LogicalDevice {
    /// Device entry points
    pub device: Device,
    /// Graphics queue
    pub graphics_queue: vk::Queue,
    /// Present queue; the same queue as `graphics_queue` when the family is shared
    pub present_queue: vk::Queue,
    /// Families the queues come from
    pub queue_families: QueueFamilyIndices,
    /// `VK_KHR_swapchain` entry points
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create the device with one queue per distinct family
    pub fn new(
        instance: &VulkanInstance,
        choice: &PhysicalDeviceChoice,
        extensions: &[String],
    ) -> Result<Self, InitError> {
        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = choice
            .queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_names = to_cstrings(extensions)?;
        let extension_ptrs: Vec<*const c_char> = extension_names.iter().map(|n| n.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = instance.layers().iter().map(|n| n.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(choice.device, &create_info, None)
        }
        .map_err(|e| InitError::DeviceCreation(VulkanError::Api(e)))?;

        let graphics_queue = unsafe { device.get_device_queue(choice.queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(choice.queue_families.present, 0) };
        let swapchain_loader = SwapchainLoader::new(&instance.instance, &device);

        log::info!(
            "Logical device created with {} queue famil{}",
            queue_infos.len(),
            if queue_infos.len() == 1 { "y" } else { "ies" }
        );

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            queue_families: choice.queue_families,
            swapchain_loader,
        })
    }

    /// Block until every queue is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(VulkanError::Api)
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("device_wait_idle failed during teardown: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        log::debug!("Logical device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn caps(graphics: bool, present: bool) -> QueueFamilyCaps {
        QueueFamilyCaps { graphics, present }
    }

    #[test]
    fn test_first_match_wins_per_capability() {
        let families = [caps(false, true), caps(true, false), caps(true, true)];
        let found = find_queue_families(3, |i| Ok(families[i as usize])).unwrap();

        assert_eq!(found, Some(QueueFamilyIndices { graphics: 1, present: 0 }));
    }

    #[test]
    fn test_search_stops_once_both_found() {
        let queried = Cell::new(0);
        let found = find_queue_families(8, |_| {
            queried.set(queried.get() + 1);
            Ok(caps(true, true))
        })
        .unwrap();

        assert_eq!(found, Some(QueueFamilyIndices { graphics: 0, present: 0 }));
        assert_eq!(queried.get(), 1);
    }

    #[test]
    fn test_missing_present_family() {
        let found = find_queue_families(2, |_| Ok(caps(true, false))).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_unique_families_deduplicated() {
        assert_eq!(QueueFamilyIndices { graphics: 2, present: 2 }.unique(), vec![2]);
        assert_eq!(QueueFamilyIndices { graphics: 0, present: 1 }.unique(), vec![0, 1]);
    }

    #[test]
    fn test_required_extensions_start_with_swapchain() {
        let required = required_device_extensions(&[
            "VK_KHR_swapchain".to_string(),
            "VK_KHR_maintenance1".to_string(),
        ]);
        assert_eq!(required, vec!["VK_KHR_swapchain".to_string(), "VK_KHR_maintenance1".to_string()]);
    }
}
