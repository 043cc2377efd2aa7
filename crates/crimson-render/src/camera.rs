//! Fixed orbit-free camera looking at the normalized model.

use glam::{Mat4, Vec3};

use crate::ubo::CameraData;

/// Camera for rendering.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov: 45.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 10.0,
        }
    }
}

impl Camera {
    /// Create a new camera.
    pub fn new(position: Vec3, target: Vec3, up: Vec3, fov: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            target,
            up,
            fov,
            near,
            far,
            ..Default::default()
        }
    }

    /// Set the aspect ratio from a framebuffer size; zero heights are ignored.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Right-handed projection with a `[0, 1]` depth range; Y is not flipped.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }
}

impl From<&Camera> for CameraData {
    fn from(camera: &Camera) -> Self {
        let mut proj = camera.projection_matrix();
        // Vulkan clip space has +Y pointing down.
        proj.y_axis.y *= -1.0;
        Self {
            view: camera.view_matrix().to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    #[test]
    fn default_camera_looks_at_origin() {
        let camera = Camera::default();
        let origin_in_view = camera.view_matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);

        assert_relative_eq!(origin_in_view.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(origin_in_view.y, 0.0, epsilon = 1e-5);
        assert!(origin_in_view.z < 0.0);
        assert_relative_eq!(origin_in_view.z, -(29.0_f32).sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn uniform_projection_flips_y() {
        let camera = Camera::default();
        let data = CameraData::from(&camera);
        let proj = Mat4::from_cols_array_2d(&data.proj);

        let above = proj * Vec4::new(0.0, 1.0, -5.0, 1.0);
        assert!(above.y / above.w < 0.0);
    }

    #[test]
    fn projection_maps_near_and_far_to_unit_depth() {
        let camera = Camera::default();
        let proj = camera.projection_matrix();

        let near = proj * Vec4::new(0.0, 0.0, -camera.near, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -camera.far, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);

        let above = proj * Vec4::new(0.0, 1.0, -5.0, 1.0);
        assert!(above.y / above.w > 0.0);
    }

    #[test]
    fn viewport_updates_aspect() {
        let mut camera = Camera::default();
        camera.set_viewport(1280, 720);
        assert_relative_eq!(camera.aspect, 1280.0 / 720.0);

        camera.set_viewport(800, 0);
        assert_relative_eq!(camera.aspect, 1280.0 / 720.0);
    }
}
