//! Three frames of a textured quad through the frame orchestrator, with
//! allocation and the GPU replaced by in-memory fakes

use std::cell::{Cell, RefCell};

use ash::vk::{self, Handle};
use vk_engine::foundation::math::{translation, Mat4, Vec3};
use vk_engine::render::camera::{Camera, ViewProjection};
use vk_engine::render::mesh::{Mesh, Vertex};
use vk_engine::render::texture::{expected_size, Texture};
use vk_engine::render::vulkan::{
    AllocatedBuffer, AllocatedImage, DrawCommand, FrameDevice, FrameOrchestrator, GpuAllocator,
    ImageDesc, SlotState, TransferOps, VulkanResult,
};

#[derive(Default)]
struct HostMemory {
    next_handle: Cell<u64>,
    live: Cell<usize>,
    copies: RefCell<Vec<vk::DeviceSize>>,
}

impl HostMemory {
    fn handle(&self) -> u64 {
        self.next_handle.set(self.next_handle.get() + 1);
        self.next_handle.get()
    }
}

impl GpuAllocator for HostMemory {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        _properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<AllocatedBuffer> {
        self.live.set(self.live.get() + 1);
        Ok(AllocatedBuffer {
            buffer: vk::Buffer::from_raw(self.handle()),
            memory: vk::DeviceMemory::from_raw(self.handle()),
            size,
        })
    }

    fn write_buffer(&self, buffer: &AllocatedBuffer, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        assert!(offset + bytes.len() as vk::DeviceSize <= buffer.size);
        Ok(())
    }

    fn destroy_buffer(&self, _buffer: AllocatedBuffer) {
        self.live.set(self.live.get() - 1);
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<AllocatedImage> {
        self.live.set(self.live.get() + 1);
        Ok(AllocatedImage {
            image: vk::Image::from_raw(self.handle()),
            memory: vk::DeviceMemory::from_raw(self.handle()),
            view: vk::ImageView::from_raw(self.handle()),
            format: desc.format,
            extent: desc.extent,
        })
    }

    fn destroy_image(&self, _image: AllocatedImage) {
        self.live.set(self.live.get() - 1);
    }
}

impl TransferOps for HostMemory {
    fn copy_buffer(&self, _src: vk::Buffer, _dst: vk::Buffer, size: vk::DeviceSize) -> VulkanResult<()> {
        self.copies.borrow_mut().push(size);
        Ok(())
    }

    fn copy_buffer_to_image(&self, _src: vk::Buffer, _image: vk::Image, extent: vk::Extent2D) -> VulkanResult<()> {
        self.copies
            .borrow_mut()
            .push(expected_size(extent.width, extent.height) as vk::DeviceSize);
        Ok(())
    }
}

/// Swapchain that hands out images round-robin and completes work on wait
struct RoundRobinGpu {
    image_count: u32,
    next_image: u32,
    fence_signaled: Vec<bool>,
    recorded: Vec<(u32, Vec<DrawCommand>)>,
    uniforms: Vec<Option<ViewProjection>>,
    presented: Vec<u32>,
}

impl RoundRobinGpu {
    fn new(frames_in_flight: usize, image_count: u32) -> Self {
        Self {
            image_count,
            next_image: 0,
            fence_signaled: vec![true; frames_in_flight],
            recorded: Vec::new(),
            uniforms: vec![None; image_count as usize],
            presented: Vec::new(),
        }
    }
}

impl FrameDevice for RoundRobinGpu {
    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()> {
        self.fence_signaled[slot] = true;
        Ok(())
    }

    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
        assert!(self.fence_signaled[slot], "reset before the wait completed");
        self.fence_signaled[slot] = false;
        Ok(())
    }

    fn acquire_image(&mut self, _slot: usize) -> VulkanResult<u32> {
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(image)
    }

    fn record(&mut self, image_index: u32, draws: &[DrawCommand]) -> VulkanResult<()> {
        self.recorded.push((image_index, draws.to_vec()));
        Ok(())
    }

    fn update_uniforms(&mut self, image_index: u32, view_projection: &ViewProjection) -> VulkanResult<()> {
        self.uniforms[image_index as usize] = Some(*view_projection);
        Ok(())
    }

    fn submit(&mut self, slot: usize, _image_index: u32) -> VulkanResult<()> {
        assert!(!self.fence_signaled[slot], "submitted with a signaled fence");
        Ok(())
    }

    fn present(&mut self, _slot: usize, image_index: u32) -> VulkanResult<()> {
        self.presented.push(image_index);
        Ok(())
    }
}

#[test]
fn test_textured_quad_over_three_frames() {
    let memory = HostMemory::default();

    let mut quad = Mesh::upload(&memory, &memory, &Vertex::quad(), &[0, 1, 2, 2, 3, 0]).unwrap();
    let mut texture = Texture::upload(&memory, &memory, &[255u8; 16], 2, 2).unwrap();
    texture.set_descriptor_set(vk::DescriptorSet::from_raw(0xD5));
    quad.set_model(translation(0.0, 0.0, -2.0));

    assert_eq!(*memory.copies.borrow(), vec![128, 24, 16]);

    let camera = Camera::perspective(Vec3::new(0.0, 0.0, 2.0), 60.0, 4.0 / 3.0, 0.1, 100.0);
    let view_projection = camera.view_projection();

    let draws = [DrawCommand {
        vertex_buffer: quad.vertex_buffer(),
        index_buffer: quad.index_buffer(),
        index_count: quad.index_count(),
        model: *quad.model(),
        texture_set: texture.descriptor_set(),
    }];

    let mut orchestrator = FrameOrchestrator::new(2, 3);
    let mut gpu = RoundRobinGpu::new(2, 3);

    let mut current_after = Vec::new();
    for _ in 0..3 {
        orchestrator.draw_frame(&mut gpu, &draws, &view_projection).unwrap();
        current_after.push(orchestrator.current_frame());
    }

    assert_eq!(current_after, vec![1, 0, 1]);
    assert_eq!(gpu.presented, vec![0, 1, 2]);

    let images: Vec<u32> = gpu.recorded.iter().map(|(image, _)| *image).collect();
    assert_eq!(images, vec![0, 1, 2]);
    for (_, recorded) in &gpu.recorded {
        assert_eq!(recorded.as_slice(), &draws);
        assert_eq!(recorded[0].index_count, 6);
    }
    assert!(gpu.uniforms.iter().all(|u| *u == Some(view_projection)));

    assert_eq!(orchestrator.image_owner(0), Some(0));
    assert_eq!(orchestrator.image_owner(1), Some(1));
    assert_eq!(orchestrator.image_owner(2), Some(0));
    assert_eq!(orchestrator.slot_state(0), Some(SlotState::Idle));
    assert_eq!(orchestrator.frames_drawn(), 3);

    quad.destroy_buffers(&memory);
    texture.destroy(&memory);
    assert_eq!(memory.live.get(), 0);
}

#[test]
fn test_empty_scene_still_presents() {
    let mut orchestrator = FrameOrchestrator::new(2, 2);
    let mut gpu = RoundRobinGpu::new(2, 2);

    orchestrator
        .draw_frame(&mut gpu, &[], &ViewProjection::new(&Mat4::identity(), &Mat4::identity()))
        .unwrap();

    assert_eq!(gpu.presented, vec![0]);
    assert!(gpu.recorded[0].1.is_empty());
}
