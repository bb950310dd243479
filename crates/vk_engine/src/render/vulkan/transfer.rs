//! One-shot transfer submissions
//!
//! Load-time uploads go CPU → host-visible staging buffer → device-local
//! resource through a single-use command buffer, then block on
//! `queue_wait_idle`. Uploads are therefore fully serialized; this path is
//! never used per frame.

use ash::{vk, Device};
use crate::render::vulkan::{
    AllocatedBuffer, GpuAllocator, ResourceUploadError, VulkanError, VulkanResult,
};

/// Copies into device-local resources
pub trait TransferOps {
    /// Copy `size` bytes from `src` to `dst` and wait for completion
    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VulkanResult<()>;

    /// Copy a tightly packed buffer into `image`, transitioning it
    /// UNDEFINED → TRANSFER_DST_OPTIMAL before and
    /// TRANSFER_DST_OPTIMAL → SHADER_READ_ONLY_OPTIMAL after, then wait
    fn copy_buffer_to_image(&self, src: vk::Buffer, image: vk::Image, extent: vk::Extent2D) -> VulkanResult<()>;
}

/// Access masks and pipeline stages bracketing an image layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Accesses that must complete before the transition
    pub src_access: vk::AccessFlags,
    /// Accesses that wait for the transition
    pub dst_access: vk::AccessFlags,
    /// Stage producing the source accesses
    pub src_stage: vk::PipelineStageFlags,
    /// Stage consuming the destination accesses
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier parameters for the transitions the upload path performs
pub fn layout_transition(old: vk::ImageLayout, new: vk::ImageLayout) -> Option<LayoutTransition> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Some(LayoutTransition {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Some(LayoutTransition {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        _ => None,
    }
}

/// [`TransferOps`] submitting single-use command buffers to one queue
pub struct OneShotTransfer {
    device: Device,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
}

impl OneShotTransfer {
    /// Create a transfer helper over a queue and a pool created for its family
    pub fn new(device: Device, queue: vk::Queue, command_pool: vk::CommandPool) -> Self {
        Self { device, queue, command_pool }
    }

    /// Record with `record`, submit, block until the queue is idle, free the buffer
    fn submit_one_shot<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer) -> VulkanResult<()>,
    {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.command_pool)
            .command_buffer_count(1);

        let command_buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(VulkanError::Api)?[0];

        let result = (|| {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }?;

            record(&self.device, command_buffer)?;

            unsafe { self.device.end_command_buffer(command_buffer) }?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            unsafe {
                self.device
                    .queue_submit(self.queue, &[submit_info.build()], vk::Fence::null())?;
                self.device.queue_wait_idle(self.queue)?;
            }
            Ok(())
        })();

        unsafe { self.device.free_command_buffers(self.command_pool, &[command_buffer]) };
        result
    }

    fn record_transition(
        device: &Device,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> VulkanResult<()> {
        let transition = layout_transition(old, new).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("unsupported layout transition {old:?} -> {new:?}"),
        })?;

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access);

        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                transition.src_stage,
                transition.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier.build()],
            );
        }
        Ok(())
    }
}

impl TransferOps for OneShotTransfer {
    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VulkanResult<()> {
        self.submit_one_shot(|device, command_buffer| {
            let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
            unsafe { device.cmd_copy_buffer(command_buffer, src, dst, &[region]) };
            Ok(())
        })
    }

    fn copy_buffer_to_image(&self, src: vk::Buffer, image: vk::Image, extent: vk::Extent2D) -> VulkanResult<()> {
        self.submit_one_shot(|device, command_buffer| {
            Self::record_transition(
                device,
                command_buffer,
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;

            let region = vk::BufferImageCopy::builder()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });

            unsafe {
                device.cmd_copy_buffer_to_image(
                    command_buffer,
                    src,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region.build()],
                );
            }

            Self::record_transition(
                device,
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })
    }
}

/// Fill a host-visible staging buffer with `bytes`
///
/// The caller owns the returned buffer and must destroy it once the copy out
/// of it has completed.
pub fn create_staging_buffer(
    allocator: &dyn GpuAllocator,
    bytes: &[u8],
) -> Result<AllocatedBuffer, ResourceUploadError> {
    let staging = allocator
        .create_buffer(
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .map_err(ResourceUploadError::BufferCreation)?;

    if let Err(e) = allocator.write_buffer(&staging, 0, bytes) {
        allocator.destroy_buffer(staging);
        return Err(ResourceUploadError::BufferCreation(e));
    }
    Ok(staging)
}

/// Upload `bytes` into a new device-local buffer with `usage | TRANSFER_DST`
///
/// The returned buffer is fully populated: the copy has completed before this
/// returns. The staging buffer is released on every path.
pub fn upload_device_local_buffer(
    allocator: &dyn GpuAllocator,
    transfer: &dyn TransferOps,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<AllocatedBuffer, ResourceUploadError> {
    if bytes.is_empty() {
        return Err(ResourceUploadError::EmptyData);
    }

    let staging = create_staging_buffer(allocator, bytes)?;

    let target = match allocator.create_buffer(
        staging.size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    ) {
        Ok(target) => target,
        Err(e) => {
            allocator.destroy_buffer(staging);
            return Err(ResourceUploadError::BufferCreation(e));
        }
    };

    let copied = transfer.copy_buffer(staging.buffer, target.buffer, staging.size);
    allocator.destroy_buffer(staging);

    match copied {
        Ok(()) => Ok(target),
        Err(e) => {
            allocator.destroy_buffer(target);
            Err(ResourceUploadError::Transfer(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::testing::{MockGpu, MockEvent};

    #[test]
    fn test_supported_transitions() {
        let to_dst = layout_transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_dst.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);

        let to_read = layout_transition(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_unsupported_transition() {
        assert!(layout_transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::PRESENT_SRC_KHR).is_none());
    }

    #[test]
    fn test_upload_copies_then_frees_staging() {
        let gpu = MockGpu::new();
        let bytes = [1u8, 2, 3, 4, 5, 6, 7, 8];

        let buffer = upload_device_local_buffer(&gpu, &gpu, &bytes, vk::BufferUsageFlags::VERTEX_BUFFER).unwrap();

        let events = gpu.events();
        let staging = match &events[0] {
            MockEvent::CreateBuffer { buffer, usage, .. } => {
                assert_eq!(*usage, vk::BufferUsageFlags::TRANSFER_SRC);
                *buffer
            }
            other => panic!("unexpected first event {other:?}"),
        };
        assert_eq!(events[1], MockEvent::Write { buffer: staging, len: 8 });
        assert!(matches!(
            events[2],
            MockEvent::CreateBuffer { usage, .. }
                if usage == vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        ));
        assert_eq!(events[3], MockEvent::CopyBuffer { src: staging, dst: buffer.buffer, size: 8 });
        assert_eq!(events[4], MockEvent::DestroyBuffer(staging));
        assert_eq!(gpu.live_allocations(), 1);

        gpu.destroy_buffer(buffer);
        assert_eq!(gpu.live_allocations(), 0);
    }

    #[test]
    fn test_failed_copy_releases_everything() {
        let gpu = MockGpu::new();
        gpu.fail_transfers(true);

        let result = upload_device_local_buffer(&gpu, &gpu, &[0u8; 16], vk::BufferUsageFlags::INDEX_BUFFER);

        assert!(matches!(result, Err(ResourceUploadError::Transfer(_))));
        assert_eq!(gpu.live_allocations(), 0);
    }

    #[test]
    fn test_empty_upload_rejected() {
        let gpu = MockGpu::new();
        let result = upload_device_local_buffer(&gpu, &gpu, &[], vk::BufferUsageFlags::VERTEX_BUFFER);

        assert_eq!(result, Err(ResourceUploadError::EmptyData));
        assert!(gpu.events().is_empty());
    }
}
