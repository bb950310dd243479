//! Camera and view/projection uniform data
//!
//! World space is right-handed with +Y up. Projection targets Vulkan clip
//! space: depth in `[0, 1]` and Y pointing down, so the projection flips Y.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{to_cols_array, Mat4, Point3, Vec3};

/// Uniform block shared by every draw in a frame (set 0, binding 0)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewProjection {
    /// World to view transform, column-major
    pub view: [[f32; 4]; 4],
    /// View to clip transform, column-major
    pub projection: [[f32; 4]; 4],
}

impl ViewProjection {
    /// Pack two matrices for upload
    pub fn new(view: &Mat4, projection: &Mat4) -> Self {
        Self {
            view: to_cols_array(view),
            projection: to_cols_array(projection),
        }
    }
}

impl Default for ViewProjection {
    fn default() -> Self {
        Self::new(&Mat4::identity(), &Mat4::identity())
    }
}

/// Perspective camera looking at a target point
#[derive(Debug, Clone)]
pub struct Camera {
    /// Eye position in world space
    pub position: Vec3,
    /// Point looked at
    pub target: Vec3,
    /// Up direction
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov: f32,
    /// Width over height
    pub aspect: f32,
    /// Near plane distance
    pub near: f32,
    /// Far plane distance
    pub far: f32,
}

impl Camera {
    /// Perspective camera at `position` looking at the origin
    pub fn perspective(position: Vec3, fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            target: Vec3::zeros(),
            up: Vec3::new(0.0, 1.0, 0.0),
            fov: fov_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    /// Move the eye
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        log::trace!("Camera position updated to: {:?}", position);
    }

    /// Point the camera at `target`
    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    /// Track a viewport size change
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// World to view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(
            &Point3::from(self.position),
            &Point3::from(self.target),
            &self.up,
        )
    }

    /// View to Vulkan clip space, depth mapped to `[0, 1]`
    pub fn projection_matrix(&self) -> Mat4 {
        perspective_vk(self.fov, self.aspect, self.near, self.far)
    }

    /// Both matrices packed for the uniform buffer
    pub fn view_projection(&self) -> ViewProjection {
        ViewProjection::new(&self.view_matrix(), &self.projection_matrix())
    }
}

/// Right-handed perspective projection for Vulkan clip space
///
/// Points on the near plane map to depth 0, on the far plane to depth 1;
/// +Y in view space maps to -Y in clip space.
pub fn perspective_vk(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = 1.0 / (fov_y / 2.0).tan();
    let mut m = Mat4::zeros();
    m[(0, 0)] = f / aspect;
    m[(1, 1)] = -f;
    m[(2, 2)] = far / (near - far);
    m[(2, 3)] = (near * far) / (near - far);
    m[(3, 2)] = -1.0;
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    fn project(m: &Mat4, x: f32, y: f32, z: f32) -> Vector4<f32> {
        let clip = m * Vector4::new(x, y, z, 1.0);
        clip / clip.w
    }

    #[test]
    fn test_projection_depth_range() {
        let m = perspective_vk(60f32.to_radians(), 1.0, 0.1, 100.0);

        assert_relative_eq!(project(&m, 0.0, 0.0, -0.1).z, 0.0, epsilon = 1e-5);
        assert_relative_eq!(project(&m, 0.0, 0.0, -100.0).z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_projection_flips_y() {
        let m = perspective_vk(90f32.to_radians(), 1.0, 0.1, 10.0);
        let p = project(&m, 0.0, 1.0, -1.0);

        assert_relative_eq!(p.y, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_view_moves_eye_to_origin() {
        let camera = Camera::perspective(Vec3::new(0.0, 0.0, 5.0), 45.0, 16.0 / 9.0, 0.1, 100.0);
        let view = camera.view_matrix();
        let eye = view.transform_point(&Point3::new(0.0, 0.0, 5.0));
        let origin = view.transform_point(&Point3::origin());

        assert_relative_eq!(eye.coords.norm(), 0.0, epsilon = 1e-5);
        // Looking down -Z in view space
        assert_relative_eq!(origin.z, -5.0, epsilon = 1e-5);
    }

    #[test]
    fn test_view_projection_is_column_major() {
        let vp = ViewProjection::new(&crate::foundation::math::translation(1.0, 2.0, 3.0), &Mat4::identity());

        assert_eq!(vp.view[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(std::mem::size_of::<ViewProjection>(), 128);
    }

    #[test]
    fn test_set_aspect_ignores_zero_height() {
        let mut camera = Camera::perspective(Vec3::zeros(), 45.0, 1.0, 0.1, 10.0);
        camera.set_aspect(800, 0);
        assert_relative_eq!(camera.aspect, 1.0);
        camera.set_aspect(800, 400);
        assert_relative_eq!(camera.aspect, 2.0);
    }
}
