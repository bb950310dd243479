//! Vulkan backend
//!
//! Layered bottom-up: error types and memory helpers, RAII wrappers for the
//! individual Vulkan objects, device and swapchain negotiation, the frame
//! orchestrator, and finally the [`VulkanRenderer`] facade tying them together.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod framebuffer;
pub mod memory;
pub mod render_pass;
pub mod renderer;
pub mod resources;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod transfer;
pub mod vertex_layout;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::UniformBuffer;
pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder};
pub use context::{SurfaceHandle, SurfaceProvider, VulkanInstance};
pub use descriptor::{
    DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter, Sampler,
};
pub use device::{
    select_device, DeviceProbe, LogicalDevice, PhysicalDeviceChoice, QueueFamilyCaps,
    QueueFamilyIndices, SurfaceProbe, SurfaceSupport,
};
pub use error::{FrameError, InitError, ResourceUploadError, VulkanError, VulkanResult};
pub use frame::{DrawCommand, FrameDevice, FrameOrchestrator, SlotState};
pub use framebuffer::{DepthBuffer, Framebuffer};
pub use memory::{AllocatedBuffer, AllocatedImage, DeviceAllocator, GpuAllocator, ImageDesc};
pub use render_pass::RenderPass;
pub use renderer::{MeshHandle, ModelHandle, TextureHandle, VulkanRenderer};
pub use resources::ResourceRegistry;
pub use shader::{GraphicsPipeline, ShaderModule};
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameSync, Semaphore};
pub use transfer::{OneShotTransfer, TransferOps};
pub use window::{Window, WindowError};
