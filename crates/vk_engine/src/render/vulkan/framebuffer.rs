//! Framebuffers and the shared depth attachment

use ash::{vk, Device, Instance};
use crate::render::vulkan::{
    AllocatedImage, DeviceAllocator, GpuAllocator, ImageDesc, VulkanError, VulkanResult,
};

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate whose optimal-tiling features include `required`
pub fn choose_supported_format<F>(
    candidates: &[vk::Format],
    required: vk::FormatFeatureFlags,
    optimal_features: F,
) -> Option<vk::Format>
where
    F: Fn(vk::Format) -> vk::FormatFeatureFlags,
{
    candidates
        .iter()
        .copied()
        .find(|&format| optimal_features(format).contains(required))
}

/// Optimal-tiling feature flags the device reports for `format`
pub fn optimal_tiling_features(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    format: vk::Format,
) -> vk::FormatFeatureFlags {
    unsafe {
        instance
            .get_physical_device_format_properties(physical_device, format)
            .optimal_tiling_features
    }
}

/// Pick the depth attachment format for `physical_device`
pub fn choose_depth_format(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<vk::Format> {
    choose_supported_format(
        &DEPTH_FORMAT_CANDIDATES,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        |format| optimal_tiling_features(instance, physical_device, format),
    )
}

/// Framebuffer handle, destroyed on drop
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// Create a framebuffer over `attachments` for `render_pass`
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            device
                .create_framebuffer(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, framebuffer })
    }

    /// Raw handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

/// Depth image shared by every framebuffer
///
/// One image suffices: the depth contents are discarded at the end of the
/// pass and the subpass dependency orders consecutive uses.
pub struct DepthBuffer {
    allocator: DeviceAllocator,
    image: Option<AllocatedImage>,
}

impl DepthBuffer {
    /// Allocate a device-local depth image of `extent`
    pub fn new(
        allocator: DeviceAllocator,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let image = allocator.create_image(&ImageDesc {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        })?;

        Ok(Self {
            allocator,
            image: Some(image),
        })
    }

    /// View used as framebuffer attachment 1
    pub fn image_view(&self) -> vk::ImageView {
        self.image.as_ref().map_or_else(vk::ImageView::null, |i| i.view)
    }
}

impl Drop for DepthBuffer {
    fn drop(&mut self) {
        if let Some(image) = self.image.take() {
            self.allocator.destroy_image(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_first_supported_candidate() {
        let chosen = choose_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| {
                if format == vk::Format::D32_SFLOAT {
                    vk::FormatFeatureFlags::empty()
                } else {
                    vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                }
            },
        );

        assert_eq!(chosen, Some(vk::Format::D32_SFLOAT_S8_UINT));
    }

    #[test]
    fn test_no_supported_candidate() {
        let chosen = choose_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| vk::FormatFeatureFlags::SAMPLED_IMAGE,
        );

        assert_eq!(chosen, None);
    }
}
