//! Semaphores, fences and the per-slot synchronization set
//!
//! Semaphores order GPU work against GPU work (acquire → render → present);
//! fences are the only primitive the CPU can observe. Each frame-in-flight
//! slot owns one [`FrameSync`].

use ash::{vk, Device};
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Binary semaphore, destroyed on drop
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create an unsignaled semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Raw handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence, destroyed on drop
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signaled
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Block until signaled or `timeout` nanoseconds pass
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    /// Return to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Raw handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects of one frame-in-flight slot
///
/// The fence starts signaled so the first wait on a fresh slot returns at once.
pub struct FrameSync {
    /// Signaled by acquisition once the swapchain image is ready
    pub image_available: Semaphore,
    /// Signaled when the slot's submission finishes, gates presentation
    pub render_finished: Semaphore,
    /// Signaled when the slot's submission finishes, waited by the CPU
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create the three objects for one slot
    pub fn new(device: Device) -> VulkanResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// One set per frame-in-flight slot
    pub fn create_slots(device: &Device, frames_in_flight: usize) -> VulkanResult<Vec<Self>> {
        (0..frames_in_flight)
            .map(|_| Self::new(device.clone()))
            .collect()
    }
}
