//! Recording stand-ins for the GPU seams, used by unit tests

use ash::vk::{self, Handle};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use crate::render::vulkan::{
    AllocatedBuffer, AllocatedImage, GpuAllocator, ImageDesc, TransferOps, VulkanError, VulkanResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    CreateBuffer {
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    },
    Write {
        buffer: vk::Buffer,
        len: usize,
    },
    DestroyBuffer(vk::Buffer),
    CreateImage {
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    },
    DestroyImage(vk::Image),
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    CopyToImage {
        src: vk::Buffer,
        image: vk::Image,
    },
}

/// Allocation tracker: every memory handle must be freed exactly once
#[derive(Default)]
pub struct MockGpu {
    next_handle: Cell<u64>,
    live_memory: RefCell<HashSet<u64>>,
    events: RefCell<Vec<MockEvent>>,
    fail_transfers: Cell<bool>,
    fail_buffer_after: Cell<Option<usize>>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.events.borrow().clone()
    }

    pub fn live_allocations(&self) -> usize {
        self.live_memory.borrow().len()
    }

    pub fn fail_transfers(&self, fail: bool) {
        self.fail_transfers.set(fail);
    }

    /// Let `count` more buffer creations succeed, then fail
    pub fn fail_buffers_after(&self, count: usize) {
        self.fail_buffer_after.set(Some(count));
    }

    fn handle(&self) -> u64 {
        let next = self.next_handle.get() + 1;
        self.next_handle.set(next);
        next
    }

    fn allocate_memory(&self) -> vk::DeviceMemory {
        let raw = self.handle();
        self.live_memory.borrow_mut().insert(raw);
        vk::DeviceMemory::from_raw(raw)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        assert!(
            self.live_memory.borrow_mut().remove(&memory.as_raw()),
            "memory {memory:?} freed twice or never allocated"
        );
    }
}

impl GpuAllocator for MockGpu {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        _properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<AllocatedBuffer> {
        if let Some(remaining) = self.fail_buffer_after.get() {
            if remaining == 0 {
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            self.fail_buffer_after.set(Some(remaining - 1));
        }

        let buffer = vk::Buffer::from_raw(self.handle());
        let memory = self.allocate_memory();
        self.events.borrow_mut().push(MockEvent::CreateBuffer { buffer, size, usage });
        Ok(AllocatedBuffer { buffer, memory, size })
    }

    fn write_buffer(&self, buffer: &AllocatedBuffer, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        assert!(offset + bytes.len() as vk::DeviceSize <= buffer.size);
        self.events.borrow_mut().push(MockEvent::Write {
            buffer: buffer.buffer,
            len: bytes.len(),
        });
        Ok(())
    }

    fn destroy_buffer(&self, buffer: AllocatedBuffer) {
        self.free_memory(buffer.memory);
        self.events.borrow_mut().push(MockEvent::DestroyBuffer(buffer.buffer));
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<AllocatedImage> {
        let image = vk::Image::from_raw(self.handle());
        let view = vk::ImageView::from_raw(self.handle());
        let memory = self.allocate_memory();
        self.events.borrow_mut().push(MockEvent::CreateImage {
            image,
            format: desc.format,
            extent: desc.extent,
        });
        Ok(AllocatedImage {
            image,
            memory,
            view,
            format: desc.format,
            extent: desc.extent,
        })
    }

    fn destroy_image(&self, image: AllocatedImage) {
        self.free_memory(image.memory);
        self.events.borrow_mut().push(MockEvent::DestroyImage(image.image));
    }
}

impl TransferOps for MockGpu {
    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VulkanResult<()> {
        if self.fail_transfers.get() {
            return Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST));
        }
        self.events.borrow_mut().push(MockEvent::CopyBuffer { src, dst, size });
        Ok(())
    }

    fn copy_buffer_to_image(&self, src: vk::Buffer, image: vk::Image, _extent: vk::Extent2D) -> VulkanResult<()> {
        if self.fail_transfers.get() {
            return Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST));
        }
        self.events.borrow_mut().push(MockEvent::CopyToImage { src, image });
        Ok(())
    }
}
