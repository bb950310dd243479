//! Math utilities and types
//!
//! Thin aliases over nalgebra plus the conversions needed to hand matrices
//! to shaders.

pub use nalgebra::{Matrix4, Point3, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Column-major array form of a matrix, as GLSL `mat4` expects it
pub fn to_cols_array(matrix: &Mat4) -> [[f32; 4]; 4] {
    let mut cols = [[0.0; 4]; 4];
    for (c, col) in cols.iter_mut().enumerate() {
        for (r, value) in col.iter_mut().enumerate() {
            *value = matrix[(r, c)];
        }
    }
    cols
}

/// Rotation about the Z axis
///
/// Spins geometry in the XY plane, so a quad facing the camera never shows
/// its back face.
pub fn rotation_z(angle: f32) -> Mat4 {
    Mat4::from_axis_angle(&Vector3::z_axis(), angle)
}

/// Translation matrix
pub fn translation(x: f32, y: f32, z: f32) -> Mat4 {
    Mat4::new_translation(&Vec3::new(x, y, z))
}
