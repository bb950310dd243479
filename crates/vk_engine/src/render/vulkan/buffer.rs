//! Host-visible uniform buffers

use std::marker::PhantomData;

use ash::vk;
use bytemuck::Pod;
use crate::render::vulkan::{AllocatedBuffer, DeviceAllocator, GpuAllocator, VulkanResult};

/// Uniform buffer holding exactly one `T`, written directly from the CPU
///
/// Writes map, copy and unmap; the memory is host-coherent so no flush is
/// needed. Callers must know the GPU is no longer reading the buffer.
pub struct UniformBuffer<T: Pod, A: GpuAllocator = DeviceAllocator> {
    allocator: A,
    buffer: AllocatedBuffer,
    _marker: PhantomData<T>,
}

impl<T: Pod, A: GpuAllocator> UniformBuffer<T, A> {
    /// Allocate a buffer sized for one `T`, initialised to `initial`
    pub fn new(allocator: A, initial: &T) -> VulkanResult<Self> {
        let buffer = allocator.create_buffer(
            std::mem::size_of::<T>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let uniform = Self {
            allocator,
            buffer,
            _marker: PhantomData,
        };
        uniform.write(initial)?;
        Ok(uniform)
    }

    /// Overwrite the contents
    pub fn write(&self, value: &T) -> VulkanResult<()> {
        self.allocator
            .write_buffer(&self.buffer, 0, bytemuck::bytes_of(value))
    }

    /// Raw handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.buffer
    }

    /// Size of `T` in bytes
    pub fn size(&self) -> vk::DeviceSize {
        std::mem::size_of::<T>() as vk::DeviceSize
    }
}

impl<T: Pod, A: GpuAllocator> Drop for UniformBuffer<T, A> {
    fn drop(&mut self) {
        let buffer = std::mem::replace(
            &mut self.buffer,
            AllocatedBuffer {
                buffer: vk::Buffer::null(),
                memory: vk::DeviceMemory::null(),
                size: 0,
            },
        );
        self.allocator.destroy_buffer(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::testing::{MockEvent, MockGpu};

    #[test]
    fn test_new_writes_initial_value() {
        let gpu = MockGpu::new();
        let uniform = UniformBuffer::new(&gpu, &[1.0f32; 16]).unwrap();

        assert_eq!(uniform.size(), 64);
        let writes: Vec<_> = gpu
            .events()
            .into_iter()
            .filter(|e| matches!(e, MockEvent::Write { .. }))
            .collect();
        assert_eq!(
            writes,
            vec![MockEvent::Write {
                buffer: uniform.handle(),
                len: 64
            }]
        );
    }

    #[test]
    fn test_every_write_reaches_the_buffer() {
        let gpu = MockGpu::new();
        let uniform = UniformBuffer::new(&gpu, &0u32).unwrap();
        uniform.write(&7u32).unwrap();

        let count = gpu
            .events()
            .iter()
            .filter(|e| matches!(e, MockEvent::Write { buffer, .. } if *buffer == uniform.handle()))
            .count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_drop_frees_buffer() {
        let gpu = MockGpu::new();
        let uniform = UniformBuffer::new(&gpu, &0u32).unwrap();
        assert_eq!(gpu.live_allocations(), 1);

        drop(uniform);
        assert_eq!(gpu.live_allocations(), 0);
    }

    #[test]
    fn test_failed_creation_allocates_nothing() {
        let gpu = MockGpu::new();
        gpu.fail_buffers_after(0);

        assert!(UniformBuffer::new(&gpu, &0u32).is_err());
        assert_eq!(gpu.live_allocations(), 0);
    }
}
