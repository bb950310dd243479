//! Device memory helpers
//!
//! Memory-type selection plus the [`GpuAllocator`] seam every buffer and image
//! allocation goes through. Allocations are plain move-only values: whoever
//! holds an [`AllocatedBuffer`] or [`AllocatedImage`] is the only one able to
//! hand it back, so a second free of the same allocation cannot be expressed.

use ash::{vk, Device, Instance};
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Find the first memory type allowed by `type_filter` that has all `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// A buffer together with the memory bound to it
#[derive(Debug, PartialEq, Eq)]
pub struct AllocatedBuffer {
    /// Buffer handle
    pub buffer: vk::Buffer,
    /// Backing memory
    pub memory: vk::DeviceMemory,
    /// Size requested at creation
    pub size: vk::DeviceSize,
}

/// A 2D image, its bound memory and its view
#[derive(Debug, PartialEq, Eq)]
pub struct AllocatedImage {
    /// Image handle
    pub image: vk::Image,
    /// Backing memory
    pub memory: vk::DeviceMemory,
    /// View over the whole image
    pub view: vk::ImageView,
    /// Pixel format
    pub format: vk::Format,
    /// Dimensions
    pub extent: vk::Extent2D,
}

/// Parameters of a 2D image allocation
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Dimensions
    pub extent: vk::Extent2D,
    /// Pixel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Aspect of the created view
    pub aspect: vk::ImageAspectFlags,
    /// Required memory properties
    pub properties: vk::MemoryPropertyFlags,
}

/// Buffer and image allocation, the seam between resources and the device
pub trait GpuAllocator {
    /// Create a buffer, allocate memory satisfying `properties` and bind it
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<AllocatedBuffer>;

    /// Map a host-visible buffer, copy `bytes` at `offset`, unmap
    fn write_buffer(&self, buffer: &AllocatedBuffer, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()>;

    /// Destroy the buffer and free its memory
    fn destroy_buffer(&self, buffer: AllocatedBuffer);

    /// Create an image, allocate and bind its memory, and create its view
    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<AllocatedImage>;

    /// Destroy the view and image and free the memory
    fn destroy_image(&self, image: AllocatedImage);
}

impl<A: GpuAllocator + ?Sized> GpuAllocator for &A {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<AllocatedBuffer> {
        (**self).create_buffer(size, usage, properties)
    }

    fn write_buffer(&self, buffer: &AllocatedBuffer, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        (**self).write_buffer(buffer, offset, bytes)
    }

    fn destroy_buffer(&self, buffer: AllocatedBuffer) {
        (**self).destroy_buffer(buffer)
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<AllocatedImage> {
        (**self).create_image(desc)
    }

    fn destroy_image(&self, image: AllocatedImage) {
        (**self).destroy_image(image)
    }
}

/// [`GpuAllocator`] backed by a logical device, one allocation per resource
#[derive(Clone)]
pub struct DeviceAllocator {
    device: Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceAllocator {
    /// Create an allocator for the given device
    pub fn new(instance: &Instance, physical_device: vk::PhysicalDevice, device: Device) -> Self {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        Self { device, memory_properties }
    }

    /// The logical device allocations are made on
    pub fn device(&self) -> &Device {
        &self.device
    }

    fn allocate(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        let memory_type_index =
            find_memory_type(&self.memory_properties, requirements.memory_type_bits, properties)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        unsafe { self.device.allocate_memory(&alloc_info, None) }.map_err(VulkanError::Api)
    }
}

impl GpuAllocator for DeviceAllocator {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<AllocatedBuffer> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(VulkanError::Api)?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let memory = match self.allocate(requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
            return Err(VulkanError::Api(e));
        }

        Ok(AllocatedBuffer { buffer, memory, size })
    }

    fn write_buffer(&self, buffer: &AllocatedBuffer, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        let len = bytes.len() as vk::DeviceSize;
        if offset + len > buffer.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {len} bytes at {offset} overflows buffer of {}", buffer.size),
            });
        }

        unsafe {
            let ptr = self
                .device
                .map_memory(buffer.memory, offset, len, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.device.unmap_memory(buffer.memory);
        }
        Ok(())
    }

    fn destroy_buffer(&self, buffer: AllocatedBuffer) {
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
            self.device.free_memory(buffer.memory, None);
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<AllocatedImage> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { self.device.create_image(&image_info, None) }.map_err(VulkanError::Api)?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let memory = match self.allocate(requirements, desc.properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view = unsafe { self.device.bind_image_memory(image, memory, 0) }
            .and_then(|()| {
                let view_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(desc.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: desc.aspect,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                unsafe { self.device.create_image_view(&view_info, None) }
            });

        match view {
            Ok(view) => Ok(AllocatedImage {
                image,
                memory,
                view,
                format: desc.format,
                extent: desc.extent,
            }),
            Err(e) => {
                unsafe {
                    self.device.destroy_image(image, None);
                    self.device.free_memory(memory, None);
                }
                Err(VulkanError::Api(e))
            }
        }
    }

    fn destroy_image(&self, image: AllocatedImage) {
        unsafe {
            self.device.destroy_image_view(image.view, None);
            self.device.destroy_image(image.image, None);
            self.device.free_memory(image.memory, None);
        }
    }
}
