//! Frame orchestration across frames in flight
//!
//! Two index spaces meet here and are never mixed up:
//!
//! * the frame-in-flight **slot** (`0..F`) selects the semaphores and fence;
//! * the swapchain **image index** (`0..N`, chosen by acquisition) selects the
//!   command buffer, uniform buffer and uniform descriptor set.
//!
//! Each call to [`FrameOrchestrator::draw_frame`] runs one slot through
//! `Idle → Recording → Submitted → Presenting → Idle`, then advances the
//! slot. All GPU work goes through [`FrameDevice`].

use ash::vk;

use crate::foundation::math::Mat4;
use crate::render::camera::ViewProjection;
use crate::render::vulkan::{FrameError, VulkanResult};

/// Where a frame-in-flight slot is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free for a new frame once its fence is signaled
    Idle,
    /// Command buffer and uniforms being written
    Recording,
    /// Submitted to the graphics queue
    Submitted,
    /// Present request queued
    Presenting,
}

/// One indexed draw recorded into the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    /// Device-local vertex buffer
    pub vertex_buffer: vk::Buffer,
    /// Device-local 32-bit index buffer
    pub index_buffer: vk::Buffer,
    /// Indices to draw
    pub index_count: u32,
    /// Model transform pushed as a constant
    pub model: Mat4,
    /// Texture descriptor set bound at set 1
    pub texture_set: vk::DescriptorSet,
}

/// GPU operations of one frame, in the order the orchestrator issues them
pub trait FrameDevice {
    /// Block until `slot`'s in-flight fence is signaled
    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()>;

    /// Unsignal `slot`'s in-flight fence
    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()>;

    /// Acquire the next image, signaling `slot`'s image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> VulkanResult<u32>;

    /// Re-record the command buffer of `image_index`
    fn record(&mut self, image_index: u32, draws: &[DrawCommand]) -> VulkanResult<()>;

    /// Write the uniform buffer of `image_index`
    fn update_uniforms(&mut self, image_index: u32, view_projection: &ViewProjection) -> VulkanResult<()>;

    /// Submit the command buffer of `image_index` with `slot`'s semaphores and fence
    fn submit(&mut self, slot: usize, image_index: u32) -> VulkanResult<()>;

    /// Present `image_index` once `slot`'s render-finished semaphore is signaled
    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<()>;
}

/// Frame-in-flight bookkeeping
#[derive(Debug)]
pub struct FrameOrchestrator {
    current_frame: usize,
    slots: Vec<SlotState>,
    image_owners: Vec<Option<usize>>,
    frames_drawn: u64,
}

impl FrameOrchestrator {
    /// Track `frames_in_flight` slots over `image_count` swapchain images
    ///
    /// Both are raised to at least one; callers clamp `frames_in_flight` to
    /// the image count beforehand.
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            current_frame: 0,
            slots: vec![SlotState::Idle; frames_in_flight.max(1)],
            image_owners: vec![None; image_count.max(1)],
            frames_drawn: 0,
        }
    }

    /// Slot the next frame will use
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// State of `slot`
    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).copied()
    }

    /// Slot that last submitted work for `image_index`
    pub fn image_owner(&self, image_index: u32) -> Option<usize> {
        self.image_owners.get(image_index as usize).copied().flatten()
    }

    /// Frames completed since creation
    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Produce one frame and return the image index it rendered to
    pub fn draw_frame<D>(
        &mut self,
        device: &mut D,
        draws: &[DrawCommand],
        view_projection: &ViewProjection,
    ) -> Result<u32, FrameError>
    where
        D: FrameDevice + ?Sized,
    {
        let slot = self.current_frame;

        device.wait_for_slot(slot).map_err(FrameError::FenceWait)?;
        device.reset_slot_fence(slot).map_err(FrameError::FenceWait)?;

        let image_index = device.acquire_image(slot).map_err(FrameError::Acquire)?;
        let image = image_index as usize;
        if image >= self.image_owners.len() {
            self.image_owners.resize(image + 1, None);
        }

        // The image's command buffer and uniforms may still be in use by
        // another slot's submission
        if let Some(owner) = self.image_owners[image] {
            if owner != slot {
                log::trace!("Image {} still owned by slot {}, waiting", image_index, owner);
                device.wait_for_slot(owner).map_err(FrameError::FenceWait)?;
            }
        }

        self.slots[slot] = SlotState::Recording;
        device.record(image_index, draws).map_err(FrameError::Recording)?;
        device
            .update_uniforms(image_index, view_projection)
            .map_err(FrameError::UniformUpdate)?;

        device.submit(slot, image_index).map_err(FrameError::Submission)?;
        self.slots[slot] = SlotState::Submitted;
        self.image_owners[image] = Some(slot);

        self.slots[slot] = SlotState::Presenting;
        device.present(slot, image_index).map_err(FrameError::Presentation)?;
        self.slots[slot] = SlotState::Idle;

        log::trace!("Frame {} drawn: slot {}, image {}", self.frames_drawn, slot, image_index);
        self.frames_drawn += 1;
        self.current_frame = (self.current_frame + 1) % self.slots.len();

        Ok(image_index)
    }
}
