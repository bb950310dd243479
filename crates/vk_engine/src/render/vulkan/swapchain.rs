//! Swapchain negotiation and creation
//!
//! The negotiation policies are plain functions over the surface's reported
//! capabilities. The [`Swapchain`] itself is one unit: it is never patched,
//! only dropped whole and rebuilt.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::render::vulkan::{
    InitError, PhysicalDeviceChoice, QueueFamilyIndices, SurfaceHandle, VulkanError, VulkanResult,
};

/// Format used when the surface leaves the choice to the application
pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::R8G8B8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Pick the surface format
///
/// A single `UNDEFINED` entry (or no entry) means any format is allowed and
/// yields [`DEFAULT_SURFACE_FORMAT`]. Otherwise an 8-bit RGBA/BGRA format in
/// sRGB-nonlinear is preferred, then any sRGB-nonlinear entry, then the first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    match formats {
        [] => DEFAULT_SURFACE_FORMAT,
        [only] if only.format == vk::Format::UNDEFINED => DEFAULT_SURFACE_FORMAT,
        _ => formats
            .iter()
            .find(|f| {
                matches!(f.format, vk::Format::R8G8B8A8_UNORM | vk::Format::B8G8R8A8_UNORM)
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| {
                formats
                    .iter()
                    .find(|f| f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            })
            .copied()
            .unwrap_or(formats[0]),
    }
}

/// MAILBOX when offered, otherwise the always-available FIFO
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Fixed surface extent if reported, else the framebuffer size clamped to the limits
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, framebuffer: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: framebuffer.width.max(min.width).min(max.width),
        height: framebuffer.height.max(min.height).min(max.height),
    }
}

/// One more than the minimum, capped by a non-zero maximum
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// CONCURRENT across both families when they differ, EXCLUSIVE otherwise
pub fn choose_sharing_mode(families: &QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

/// Swapchain, its images and the views over them
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Negotiate and create the swapchain for `surface`
    pub fn new(
        device: Device,
        loader: SwapchainLoader,
        surface: &SurfaceHandle,
        choice: &PhysicalDeviceChoice,
        framebuffer: vk::Extent2D,
    ) -> Result<Self, InitError> {
        Self::create(device, loader, surface, choice, framebuffer).map_err(InitError::SwapchainCreation)
    }

    fn create(
        device: Device,
        loader: SwapchainLoader,
        surface: &SurfaceHandle,
        choice: &PhysicalDeviceChoice,
        framebuffer: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let (capabilities, formats, modes) = unsafe {
            (
                surface
                    .loader
                    .get_physical_device_surface_capabilities(choice.device, surface.surface)?,
                surface
                    .loader
                    .get_physical_device_surface_formats(choice.device, surface.surface)?,
                surface
                    .loader
                    .get_physical_device_surface_present_modes(choice.device, surface.surface)?,
            )
        };

        let format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&modes);
        let extent = choose_extent(&capabilities, framebuffer);
        let min_image_count = choose_image_count(&capabilities);
        let (sharing_mode, family_indices) = choose_sharing_mode(&choice.queue_families);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(min_image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }?;

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match create_color_view(&device, image, format.format) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    unsafe {
                        for view in image_views {
                            device.destroy_image_view(view, None);
                        }
                        loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(e);
                }
            }
        }

        log::info!(
            "Swapchain: {} images, {:?}/{:?}, {:?}, {}x{}",
            images.len(),
            format.format,
            format.color_space,
            present_mode,
            extent.width,
            extent.height
        );

        Ok(Self {
            device,
            loader,
            swapchain,
            images,
            image_views,
            format,
            extent,
        })
    }

    /// Raw handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Entry points for acquire and present
    pub fn loader(&self) -> &SwapchainLoader {
        &self.loader
    }

    /// Number of images actually created, at least the requested minimum
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// One colour view per image, in image index order
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Negotiated format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Negotiated extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            // Images belong to the swapchain and go with it
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

fn create_color_view(device: &Device, image: vk::Image, format: vk::Format) -> VulkanResult<vk::ImageView> {
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

    unsafe { device.create_image_view(&create_info, None) }.map_err(VulkanError::Api)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    const SRGB: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;
    const HDR: vk::ColorSpaceKHR = vk::ColorSpaceKHR::HDR10_ST2084_EXT;

    fn capabilities(min: (u32, u32), max: (u32, u32), current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            ..Default::default()
        }
    }

    #[test]
    fn test_single_undefined_format_yields_default() {
        let chosen = choose_surface_format(&[sf(vk::Format::UNDEFINED, SRGB)]);
        assert_eq!(chosen, DEFAULT_SURFACE_FORMAT);
        assert_eq!(choose_surface_format(&[]), DEFAULT_SURFACE_FORMAT);
    }

    #[test]
    fn test_exact_match_preferred() {
        let formats = [
            sf(vk::Format::A2B10G10R10_UNORM_PACK32, HDR),
            sf(vk::Format::B8G8R8A8_SRGB, SRGB),
            sf(vk::Format::B8G8R8A8_UNORM, SRGB),
        ];
        assert_eq!(choose_surface_format(&formats), sf(vk::Format::B8G8R8A8_UNORM, SRGB));
    }

    #[test]
    fn test_srgb_colorspace_chosen_whenever_present() {
        let lists: [&[vk::SurfaceFormatKHR]; 4] = [
            &[sf(vk::Format::A2B10G10R10_UNORM_PACK32, HDR), sf(vk::Format::B8G8R8A8_SRGB, SRGB)],
            &[sf(vk::Format::R16G16B16A16_SFLOAT, HDR), sf(vk::Format::R8G8B8A8_UNORM, SRGB)],
            &[sf(vk::Format::B8G8R8A8_SRGB, SRGB)],
            &[sf(vk::Format::R5G6B5_UNORM_PACK16, HDR), sf(vk::Format::R5G6B5_UNORM_PACK16, SRGB)],
        ];
        for formats in lists {
            assert_eq!(choose_surface_format(formats).color_space, SRGB, "{formats:?}");
        }
    }

    #[test]
    fn test_falls_back_to_first_format() {
        let formats = [sf(vk::Format::R16G16B16A16_SFLOAT, HDR), sf(vk::Format::B8G8R8A8_UNORM, HDR)];
        assert_eq!(choose_surface_format(&formats), formats[0]);
    }

    #[test]
    fn test_present_mode_prefers_mailbox() {
        use vk::PresentModeKHR as P;
        let with_mailbox: [&[P]; 3] = [
            &[P::MAILBOX],
            &[P::FIFO, P::MAILBOX],
            &[P::IMMEDIATE, P::FIFO_RELAXED, P::MAILBOX, P::FIFO],
        ];
        for modes in with_mailbox {
            assert_eq!(choose_present_mode(modes), P::MAILBOX);
        }

        let without: [&[P]; 3] = [&[P::FIFO], &[P::IMMEDIATE, P::FIFO], &[P::FIFO_RELAXED, P::FIFO]];
        for modes in without {
            assert_eq!(choose_present_mode(modes), P::FIFO);
        }
    }

    #[test]
    fn test_fixed_extent_used_verbatim() {
        let caps = capabilities((1, 1), (4096, 4096), (1280, 720));
        let extent = choose_extent(&caps, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(extent, vk::Extent2D { width: 1280, height: 720 });
    }

    #[test]
    fn test_extent_always_within_limits() {
        let mins = [(1, 1), (64, 32), (640, 480)];
        let maxs = [(640, 480), (1920, 1080), (4096, 4096)];
        let requests = [(0, 0), (1, 5000), (800, 600), (10_000, 10_000), (700, 100)];

        for &min in &mins {
            for &max in &maxs {
                let caps = capabilities(min, max, (u32::MAX, u32::MAX));
                for &(w, h) in &requests {
                    let extent = choose_extent(&caps, vk::Extent2D { width: w, height: h });
                    assert!(extent.width >= min.0 && extent.width <= max.0, "{min:?} {max:?} {w}");
                    assert!(extent.height >= min.1 && extent.height <= max.1, "{min:?} {max:?} {h}");
                }
            }
        }
    }

    #[test]
    fn test_image_count_policy() {
        let with = |min_image_count, max_image_count| vk::SurfaceCapabilitiesKHR {
            min_image_count,
            max_image_count,
            ..Default::default()
        };

        assert_eq!(choose_image_count(&with(2, 0)), 3);
        assert_eq!(choose_image_count(&with(2, 8)), 3);
        assert_eq!(choose_image_count(&with(3, 3)), 3);
        assert_eq!(choose_image_count(&with(1, 2)), 2);
    }

    #[test]
    fn test_sharing_mode_follows_families() {
        let (mode, indices) = choose_sharing_mode(&QueueFamilyIndices { graphics: 0, present: 0 });
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());

        let (mode, indices) = choose_sharing_mode(&QueueFamilyIndices { graphics: 0, present: 2 });
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, vec![0, 2]);
    }
}
