//! Multi-mesh models sharing one transform

use crate::foundation::math::Mat4;
use crate::render::vulkan::MeshHandle;

/// A group of meshes placed together in the world
///
/// The model does not own GPU memory itself: it names meshes held by the
/// renderer, which destroys them together with the model.
#[derive(Debug, Clone)]
pub struct MeshModel {
    meshes: Vec<MeshHandle>,
    model: Mat4,
}

impl MeshModel {
    /// Group the given meshes under an identity transform
    pub fn new(meshes: Vec<MeshHandle>) -> Self {
        Self {
            meshes,
            model: Mat4::identity(),
        }
    }

    /// Meshes in this model, in load order
    pub fn meshes(&self) -> &[MeshHandle] {
        &self.meshes
    }

    /// Number of meshes
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Shared model transform
    pub const fn model(&self) -> &Mat4 {
        &self.model
    }

    /// Replace the shared model transform
    pub fn set_model(&mut self, model: Mat4) {
        self.model = model;
    }

    /// Forget a mesh destroyed on its own; returns whether it was a member
    pub fn remove_mesh(&mut self, mesh: MeshHandle) -> bool {
        let before = self.meshes.len();
        self.meshes.retain(|&m| m != mesh);
        self.meshes.len() != before
    }

    /// Consume the model, yielding its meshes
    pub fn into_meshes(self) -> Vec<MeshHandle> {
        self.meshes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_model_keeps_mesh_order() {
        let mut handles: SlotMap<MeshHandle, ()> = SlotMap::with_key();
        let a = handles.insert(());
        let b = handles.insert(());

        let mut model = MeshModel::new(vec![a, b]);
        assert_eq!(model.meshes(), &[a, b]);
        assert_eq!(model.mesh_count(), 2);
        assert_eq!(*model.model(), Mat4::identity());

        let moved = crate::foundation::math::translation(0.0, 2.0, 0.0);
        model.set_model(moved);
        assert_eq!(*model.model(), moved);
        assert!(model.remove_mesh(a));
        assert!(!model.remove_mesh(a));
        assert_eq!(model.into_meshes(), vec![b]);
    }
}
