//! Rendering module
//!
//! Backend-agnostic scene data (meshes, textures, models, camera uniforms)
//! and the Vulkan backend that uploads and draws it.

pub mod camera;
pub mod mesh;
pub mod model;
pub mod texture;
pub mod vulkan;
