//! Resource bookkeeping
//!
//! [`ResourceRegistry`] owns every loaded mesh, texture and model together
//! with the capacity limits. It never touches the device itself: uploads and
//! frees go through the [`GpuAllocator`] and [`TransferOps`] handed in by the
//! caller, and descriptor set allocation through a caller-supplied binder.

use ash::vk;
use slotmap::SlotMap;

use crate::foundation::math::Mat4;
use crate::render::mesh::{Mesh, Vertex};
use crate::render::model::MeshModel;
use crate::render::texture::Texture;
use crate::render::vulkan::{
    DrawCommand, GpuAllocator, MeshHandle, ModelHandle, ResourceUploadError, TextureHandle,
    TransferOps,
};

/// Fail with `CapacityExceeded` when `used + adding` would pass `limit`
pub fn check_capacity(
    kind: &'static str,
    used: usize,
    adding: usize,
    limit: u32,
) -> Result<(), ResourceUploadError> {
    if used + adding > limit as usize {
        Err(ResourceUploadError::CapacityExceeded { kind, limit })
    } else {
        Ok(())
    }
}

/// Loaded meshes, models and textures
pub struct ResourceRegistry {
    meshes: SlotMap<MeshHandle, Mesh>,
    models: SlotMap<ModelHandle, MeshModel>,
    textures: SlotMap<TextureHandle, Texture>,
    default_texture: Option<TextureHandle>,
    max_objects: u32,
    max_textures: u32,
}

impl ResourceRegistry {
    /// Empty registry holding at most `max_objects` meshes and
    /// `max_textures` user textures
    pub fn new(max_objects: u32, max_textures: u32) -> Self {
        Self {
            meshes: SlotMap::with_key(),
            models: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            default_texture: None,
            max_objects,
            max_textures,
        }
    }

    fn user_texture_count(&self) -> usize {
        self.textures.len() - usize::from(self.default_texture.is_some())
    }

    fn insert_texture<F>(
        &mut self,
        allocator: &dyn GpuAllocator,
        transfer: &dyn TransferOps,
        pixels: &[u8],
        size: (u32, u32),
        bind: F,
    ) -> Result<TextureHandle, ResourceUploadError>
    where
        F: FnOnce(&Texture) -> Result<vk::DescriptorSet, ResourceUploadError>,
    {
        let mut texture = Texture::upload(allocator, transfer, pixels, size.0, size.1)?;
        match bind(&texture) {
            Ok(set) => {
                texture.set_descriptor_set(set);
                Ok(self.textures.insert(texture))
            }
            Err(e) => {
                texture.destroy(allocator);
                Err(e)
            }
        }
    }

    /// Upload the 1×1 white texture sampled by meshes without their own
    ///
    /// It does not count against the texture limit.
    pub fn load_default_texture<F>(
        &mut self,
        allocator: &dyn GpuAllocator,
        transfer: &dyn TransferOps,
        bind: F,
    ) -> Result<TextureHandle, ResourceUploadError>
    where
        F: FnOnce(&Texture) -> Result<vk::DescriptorSet, ResourceUploadError>,
    {
        let handle = self.insert_texture(allocator, transfer, &[255, 255, 255, 255], (1, 1), bind)?;
        if let Some(mut old) = self.default_texture.replace(handle).and_then(|h| self.textures.remove(h)) {
            old.destroy(allocator);
        }
        Ok(handle)
    }

    /// Upload a texture; `bind` allocates and writes its descriptor set
    pub fn load_texture<F>(
        &mut self,
        allocator: &dyn GpuAllocator,
        transfer: &dyn TransferOps,
        pixels: &[u8],
        width: u32,
        height: u32,
        bind: F,
    ) -> Result<TextureHandle, ResourceUploadError>
    where
        F: FnOnce(&Texture) -> Result<vk::DescriptorSet, ResourceUploadError>,
    {
        check_capacity("textures", self.user_texture_count(), 1, self.max_textures)?;
        self.insert_texture(allocator, transfer, pixels, (width, height), bind)
    }

    /// Upload one mesh
    pub fn load_mesh(
        &mut self,
        allocator: &dyn GpuAllocator,
        transfer: &dyn TransferOps,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<MeshHandle, ResourceUploadError> {
        check_capacity("meshes", self.meshes.len(), 1, self.max_objects)?;

        let mesh = Mesh::upload(allocator, transfer, vertices, indices)?;
        Ok(self.meshes.insert(mesh))
    }

    /// Upload several meshes as one model; either every part is kept or none
    pub fn load_model(
        &mut self,
        allocator: &dyn GpuAllocator,
        transfer: &dyn TransferOps,
        parts: &[(Vec<Vertex>, Vec<u32>)],
    ) -> Result<ModelHandle, ResourceUploadError> {
        if parts.is_empty() {
            return Err(ResourceUploadError::EmptyData);
        }
        check_capacity("meshes", self.meshes.len(), parts.len(), self.max_objects)?;

        let mut uploaded = Vec::with_capacity(parts.len());
        for (vertices, indices) in parts {
            match Mesh::upload(allocator, transfer, vertices, indices) {
                Ok(mesh) => uploaded.push(mesh),
                Err(e) => {
                    for mut mesh in uploaded {
                        mesh.destroy_buffers(allocator);
                    }
                    return Err(e);
                }
            }
        }

        let handles = uploaded.into_iter().map(|mesh| self.meshes.insert(mesh)).collect();
        log::debug!("Loaded model with {} meshes", parts.len());
        Ok(self.models.insert(MeshModel::new(handles)))
    }

    /// Replace a mesh's model transform
    pub fn set_transform(&mut self, mesh: MeshHandle, transform: Mat4) -> Result<(), ResourceUploadError> {
        self.meshes
            .get_mut(mesh)
            .ok_or(ResourceUploadError::UnknownHandle)?
            .set_model(transform);
        Ok(())
    }

    /// Sample `texture` when drawing `mesh`
    pub fn set_mesh_texture(&mut self, mesh: MeshHandle, texture: TextureHandle) -> Result<(), ResourceUploadError> {
        if !self.textures.contains_key(texture) {
            return Err(ResourceUploadError::UnknownHandle);
        }
        self.meshes
            .get_mut(mesh)
            .ok_or(ResourceUploadError::UnknownHandle)?
            .set_texture(Some(texture));
        Ok(())
    }

    /// Replace the transform shared by every mesh of a model
    pub fn set_model_transform(&mut self, model: ModelHandle, transform: Mat4) -> Result<(), ResourceUploadError> {
        let model = self.models.get_mut(model).ok_or(ResourceUploadError::UnknownHandle)?;
        model.set_model(transform);
        for &handle in model.meshes() {
            if let Some(mesh) = self.meshes.get_mut(handle) {
                mesh.set_model(transform);
            }
        }
        Ok(())
    }

    /// Whether `mesh` is loaded
    pub fn contains_mesh(&self, mesh: MeshHandle) -> bool {
        self.meshes.contains_key(mesh)
    }

    /// Whether `model` is loaded
    pub fn contains_model(&self, model: ModelHandle) -> bool {
        self.models.contains_key(model)
    }

    /// Free a mesh and drop it from any model it belongs to
    ///
    /// The GPU must no longer be using it.
    pub fn destroy_mesh(&mut self, allocator: &dyn GpuAllocator, mesh: MeshHandle) -> Result<(), ResourceUploadError> {
        let mut removed = self.meshes.remove(mesh).ok_or(ResourceUploadError::UnknownHandle)?;
        removed.destroy_buffers(allocator);
        for model in self.models.values_mut() {
            model.remove_mesh(mesh);
        }
        Ok(())
    }

    /// Free a model and all of its meshes
    ///
    /// The GPU must no longer be using them.
    pub fn destroy_model(&mut self, allocator: &dyn GpuAllocator, model: ModelHandle) -> Result<(), ResourceUploadError> {
        let removed = self.models.remove(model).ok_or(ResourceUploadError::UnknownHandle)?;
        for handle in removed.into_meshes() {
            if let Some(mut mesh) = self.meshes.remove(handle) {
                mesh.destroy_buffers(allocator);
            }
        }
        Ok(())
    }

    /// One draw per resident mesh; meshes without a texture use the default
    pub fn draw_commands(&self) -> Vec<DrawCommand> {
        let default_set = self
            .default_texture
            .and_then(|t| self.textures.get(t))
            .map_or_else(vk::DescriptorSet::null, Texture::descriptor_set);

        self.meshes
            .values()
            .filter(|mesh| mesh.is_resident())
            .map(|mesh| DrawCommand {
                vertex_buffer: mesh.vertex_buffer(),
                index_buffer: mesh.index_buffer(),
                index_count: mesh.index_count(),
                model: *mesh.model(),
                texture_set: mesh
                    .texture()
                    .and_then(|t| self.textures.get(t))
                    .map_or(default_set, Texture::descriptor_set),
            })
            .collect()
    }

    /// A loaded mesh
    pub fn mesh(&self, mesh: MeshHandle) -> Option<&Mesh> {
        self.meshes.get(mesh)
    }

    /// Meshes of a loaded model
    pub fn model_meshes(&self, model: ModelHandle) -> Option<&[MeshHandle]> {
        self.models.get(model).map(MeshModel::meshes)
    }

    /// Number of loaded meshes, including model members
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Number of loaded textures, excluding the default one
    pub fn texture_count(&self) -> usize {
        self.user_texture_count()
    }

    /// Free everything; the GPU must be idle
    pub fn release_all(&mut self, allocator: &dyn GpuAllocator) {
        for (_, mut mesh) in self.meshes.drain() {
            mesh.destroy_buffers(allocator);
        }
        for (_, mut texture) in self.textures.drain() {
            texture.destroy(allocator);
        }
        self.models.clear();
        self.default_texture = None;
    }
}
