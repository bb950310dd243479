//! Mesh data and GPU mesh resources
//!
//! A [`Mesh`] exclusively owns one device-local vertex buffer and one
//! device-local index buffer, filled through a staged upload. Release is
//! explicit: call [`Mesh::destroy_buffers`] with the device idle before the
//! logical device goes away.

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::foundation::math::Mat4;
use crate::render::vulkan::{
    transfer, AllocatedBuffer, GpuAllocator, ResourceUploadError, TextureHandle, TransferOps,
};

/// Interleaved vertex: position, colour, texture coordinates
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Vertex colour, multiplied with the sampled texel
    pub color: [f32; 3],
    /// Texture coordinates
    pub uv: [f32; 2],
}

impl Vertex {
    /// Create a vertex
    pub const fn new(position: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, color, uv }
    }

    /// Unit quad in the XY plane, counter-clockwise when seen from +Z
    ///
    /// Pair with indices `[0, 1, 2, 2, 3, 0]`.
    pub fn quad() -> [Self; 4] {
        [
            Self::new([-0.5, -0.5, 0.0], [1.0, 1.0, 1.0], [0.0, 1.0]),
            Self::new([0.5, -0.5, 0.0], [1.0, 1.0, 1.0], [1.0, 1.0]),
            Self::new([0.5, 0.5, 0.0], [1.0, 1.0, 1.0], [1.0, 0.0]),
            Self::new([-0.5, 0.5, 0.0], [1.0, 1.0, 1.0], [0.0, 0.0]),
        ]
    }
}

/// Device-local mesh with its model transform
pub struct Mesh {
    vertex_buffer: Option<AllocatedBuffer>,
    index_buffer: Option<AllocatedBuffer>,
    vertex_count: u32,
    index_count: u32,
    model: Mat4,
    texture: Option<TextureHandle>,
}

impl Mesh {
    /// Upload vertices and indices into device-local buffers
    ///
    /// Each buffer goes through its own staging buffer and one-shot copy. If
    /// the index upload fails the already uploaded vertex buffer is released.
    /// Every index must address one of `vertices`.
    pub fn upload(
        allocator: &dyn GpuAllocator,
        transfer: &dyn TransferOps,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<Self, ResourceUploadError> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(ResourceUploadError::EmptyData);
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(ResourceUploadError::IndexOutOfRange {
                index,
                vertex_count: vertices.len(),
            });
        }

        let vertex_buffer = transfer::upload_device_local_buffer(
            allocator,
            transfer,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;

        let index_buffer = match transfer::upload_device_local_buffer(
            allocator,
            transfer,
            bytemuck::cast_slice(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                allocator.destroy_buffer(vertex_buffer);
                return Err(e);
            }
        };

        log::debug!("Uploaded mesh: {} vertices, {} indices", vertices.len(), indices.len());

        Ok(Self {
            vertex_buffer: Some(vertex_buffer),
            index_buffer: Some(index_buffer),
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
            model: Mat4::identity(),
            texture: None,
        })
    }

    /// Release both buffers; later calls do nothing
    pub fn destroy_buffers(&mut self, allocator: &dyn GpuAllocator) {
        if let Some(buffer) = self.vertex_buffer.take() {
            allocator.destroy_buffer(buffer);
        }
        if let Some(buffer) = self.index_buffer.take() {
            allocator.destroy_buffer(buffer);
        }
    }

    /// Whether the GPU buffers are still held
    pub const fn is_resident(&self) -> bool {
        self.vertex_buffer.is_some() && self.index_buffer.is_some()
    }

    /// Number of uploaded vertices
    pub const fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of uploaded indices
    pub const fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Vertex buffer handle, null once destroyed
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.as_ref().map_or_else(vk::Buffer::null, |b| b.buffer)
    }

    /// Index buffer handle, null once destroyed
    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.as_ref().map_or_else(vk::Buffer::null, |b| b.buffer)
    }

    /// Current model transform
    pub const fn model(&self) -> &Mat4 {
        &self.model
    }

    /// Replace the model transform
    pub fn set_model(&mut self, model: Mat4) {
        self.model = model;
    }

    /// Texture sampled when drawing, if any
    pub const fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    /// Assign the texture sampled when drawing
    pub fn set_texture(&mut self, texture: Option<TextureHandle>) {
        self.texture = texture;
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        if self.vertex_buffer.is_some() || self.index_buffer.is_some() {
            log::warn!(
                "Mesh with {} vertices dropped without destroy_buffers; GPU memory leaked",
                self.vertex_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::testing::{MockEvent, MockGpu};

    const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

    #[test]
    fn test_vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(bytemuck::cast_slice::<Vertex, u8>(&Vertex::quad()).len(), 128);
    }

    #[test]
    fn test_upload_reports_counts() {
        let gpu = MockGpu::new();
        let mut mesh = Mesh::upload(&gpu, &gpu, &Vertex::quad(), &QUAD_INDICES).unwrap();

        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.index_count(), 6);
        assert!(mesh.is_resident());
        assert_eq!(*mesh.model(), Mat4::identity());
        // Two device-local buffers remain, both staging buffers are gone
        assert_eq!(gpu.live_allocations(), 2);

        mesh.destroy_buffers(&gpu);
    }

    #[test]
    fn test_out_of_range_index_rejected_before_allocation() {
        let gpu = MockGpu::new();
        let result = Mesh::upload(&gpu, &gpu, &Vertex::quad(), &[0, 1, 2, 2, 4, 0]);

        assert!(matches!(
            result,
            Err(ResourceUploadError::IndexOutOfRange { index: 4, vertex_count: 4 })
        ));
        assert!(gpu.events().is_empty());
    }

    #[test]
    fn test_upload_sizes_match_data() {
        let gpu = MockGpu::new();
        let mut mesh = Mesh::upload(&gpu, &gpu, &Vertex::quad(), &QUAD_INDICES).unwrap();

        let copies: Vec<_> = gpu
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::CopyBuffer { size, .. } => Some(size),
                _ => None,
            })
            .collect();
        assert_eq!(copies, vec![128, 24]);

        mesh.destroy_buffers(&gpu);
    }

    #[test]
    fn test_destroy_twice_frees_once() {
        let gpu = MockGpu::new();
        let mut mesh = Mesh::upload(&gpu, &gpu, &Vertex::quad(), &QUAD_INDICES).unwrap();

        mesh.destroy_buffers(&gpu);
        assert_eq!(gpu.live_allocations(), 0);
        assert!(!mesh.is_resident());
        assert_eq!(mesh.vertex_buffer(), vk::Buffer::null());

        // The tracker panics on a second free of the same memory
        mesh.destroy_buffers(&gpu);
        assert_eq!(gpu.live_allocations(), 0);

        let frees = gpu
            .events()
            .iter()
            .filter(|e| matches!(e, MockEvent::DestroyBuffer(_)))
            .count();
        // Two staging buffers plus two device-local buffers
        assert_eq!(frees, 4);
    }

    #[test]
    fn test_failed_index_upload_releases_vertex_buffer() {
        let gpu = MockGpu::new();
        // Vertex staging and vertex target succeed, index staging fails
        gpu.fail_buffers_after(2);

        let result = Mesh::upload(&gpu, &gpu, &Vertex::quad(), &QUAD_INDICES);

        assert!(matches!(result, Err(ResourceUploadError::BufferCreation(_))));
        assert_eq!(gpu.live_allocations(), 0);
    }

    #[test]
    fn test_empty_mesh_rejected() {
        let gpu = MockGpu::new();
        assert!(matches!(
            Mesh::upload(&gpu, &gpu, &[], &QUAD_INDICES),
            Err(ResourceUploadError::EmptyData)
        ));
        assert!(matches!(
            Mesh::upload(&gpu, &gpu, &Vertex::quad(), &[]),
            Err(ResourceUploadError::EmptyData)
        ));
    }

    #[test]
    fn test_transform_and_texture_assignment() {
        let gpu = MockGpu::new();
        let mut mesh = Mesh::upload(&gpu, &gpu, &Vertex::quad(), &QUAD_INDICES).unwrap();
        let model = crate::foundation::math::translation(1.0, 0.0, -2.0);

        mesh.set_model(model);
        assert_eq!(*mesh.model(), model);
        assert_eq!(mesh.texture(), None);

        mesh.destroy_buffers(&gpu);
    }
}
