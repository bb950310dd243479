//! Sampled 2D textures
//!
//! Pixels are RGBA8 in sRGB encoding, uploaded through a staging buffer into
//! a device-local optimal-tiling image that ends in
//! `SHADER_READ_ONLY_OPTIMAL`.

use ash::vk;

use crate::render::vulkan::{
    transfer, AllocatedImage, GpuAllocator, ImageDesc, ResourceUploadError, TransferOps,
};

/// Pixel format of every uploaded texture
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Bytes per texel of [`TEXTURE_FORMAT`]
pub const BYTES_PER_PIXEL: usize = 4;

/// Expected byte length of a `width` x `height` RGBA8 image
pub fn expected_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

/// Device-local texture image
pub struct Texture {
    image: Option<AllocatedImage>,
    extent: vk::Extent2D,
    descriptor_set: vk::DescriptorSet,
}

impl Texture {
    /// Upload tightly packed RGBA8 pixels
    pub fn upload(
        allocator: &dyn GpuAllocator,
        transfer: &dyn TransferOps,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Self, ResourceUploadError> {
        if width == 0 || height == 0 || pixels.is_empty() {
            return Err(ResourceUploadError::EmptyData);
        }
        let expected = expected_size(width, height);
        if pixels.len() != expected {
            return Err(ResourceUploadError::PixelSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        let staging = transfer::create_staging_buffer(allocator, pixels)?;
        let extent = vk::Extent2D { width, height };

        let image = match allocator.create_image(&ImageDesc {
            extent,
            format: TEXTURE_FORMAT,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        }) {
            Ok(image) => image,
            Err(e) => {
                allocator.destroy_buffer(staging);
                return Err(ResourceUploadError::ImageCreation(e));
            }
        };

        let copied = transfer.copy_buffer_to_image(staging.buffer, image.image, extent);
        allocator.destroy_buffer(staging);
        if let Err(e) = copied {
            allocator.destroy_image(image);
            return Err(ResourceUploadError::Transfer(e));
        }

        log::debug!("Uploaded {}x{} texture", width, height);

        Ok(Self {
            image: Some(image),
            extent,
            descriptor_set: vk::DescriptorSet::null(),
        })
    }

    /// Image view, null once destroyed
    pub fn view(&self) -> vk::ImageView {
        self.image.as_ref().map_or_else(vk::ImageView::null, |i| i.view)
    }

    /// Dimensions in pixels
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Descriptor set binding this texture with the shared sampler
    pub const fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    /// Attach the descriptor set written for this texture
    pub fn set_descriptor_set(&mut self, set: vk::DescriptorSet) {
        self.descriptor_set = set;
    }

    /// Release the image; later calls do nothing
    pub fn destroy(&mut self, allocator: &dyn GpuAllocator) {
        if let Some(image) = self.image.take() {
            allocator.destroy_image(image);
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if self.image.is_some() {
            log::warn!(
                "{}x{} texture dropped without destroy; GPU memory leaked",
                self.extent.width,
                self.extent.height
            );
        }
    }
}
