//! # Camera
//!
//! Camera parameters consumed by culling and sorting: view and projection
//! matrices, position, clip planes and field of view.
//!
//! ## Design Principles
//! - **Library-agnostic**: No graphics API dependencies in camera math
//! - **Immutable operation**: Matrices are derived on demand, never cached
//! - **Conventions**: Right-handed view space, clip-space depth in `[-w, w]`

use crate::foundation::math::{utils, Mat4, Point3, Vec3};
use crate::spatial::Frustum;
use serde::{Deserialize, Serialize};

/// 3D perspective camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,

    /// Point the camera is looking at in world space
    pub target: Vec3,

    /// Up vector for camera orientation (typically [0, 1, 0])
    pub up: Vec3,

    /// Vertical field of view in radians
    pub fov: f32,

    /// Aspect ratio (width / height)
    pub aspect: f32,

    /// Distance to near clipping plane
    pub near: f32,

    /// Distance to far clipping plane
    pub far: f32,

    /// Viewport height in pixels, used for screen-space size estimates
    pub viewport_height: f32,
}

impl Camera {
    /// Create a new perspective camera with standard Y-up orientation
    ///
    /// # Arguments
    /// * `position` - Camera position in world space
    /// * `fov_degrees` - Vertical field of view in degrees
    /// * `aspect` - Aspect ratio (width / height) of the viewport
    /// * `near` - Distance to near clipping plane (must be > 0)
    /// * `far` - Distance to far clipping plane (must be > near)
    ///
    /// The camera initially looks at the origin with a 1080 pixel viewport.
    pub fn perspective(position: Vec3, fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            target: Vec3::zeros(),
            up: Vec3::new(0.0, 1.0, 0.0),
            fov: utils::deg_to_rad(fov_degrees),
            aspect,
            near,
            far,
            viewport_height: 1080.0,
        }
    }

    /// Builder: look at a target point
    #[must_use]
    pub fn looking_at(mut self, target: Vec3) -> Self {
        self.set_target(target);
        self
    }

    /// Builder: set the viewport height in pixels
    #[must_use]
    pub fn with_viewport_height(mut self, height: f32) -> Self {
        self.viewport_height = height;
        self
    }

    /// Update camera position in world space
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        log::trace!("Camera position updated to: {:?}", position);
    }

    /// Update camera target (look-at point)
    pub fn set_target(&mut self, target: Vec3) {
        self.target = target;
    }

    /// Unit vector from the position toward the target
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| Vec3::new(0.0, 0.0, -1.0))
    }

    /// World-to-view matrix
    pub fn view_matrix(&self) -> Mat4 {
        let eye = Point3::from(self.position);
        let target = Point3::from(self.position + self.forward());
        Mat4::look_at_rh(&eye, &target, &self.up)
    }

    /// View-to-clip matrix
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::new_perspective(self.aspect, self.fov, self.near, self.far)
    }

    /// Combined `projection * view` matrix
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Frustum planes of this camera
    pub fn frustum(&self) -> Frustum {
        Frustum::from_matrix(&self.view_projection_matrix())
    }

    /// Pixels covered by one world unit at distance one
    pub fn projection_scale(&self) -> f32 {
        self.viewport_height / (2.0 * (self.fov * 0.5).tan())
    }

    /// Projected diameter in pixels of a sphere at `distance`
    ///
    /// Spheres enclosing the camera cover the whole screen.
    pub fn screen_size(&self, radius: f32, distance: f32) -> f32 {
        if distance <= radius {
            return f32::INFINITY;
        }
        2.0 * radius / distance * self.projection_scale()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(Vec3::new(0.0, 0.0, 5.0), 60.0, 16.0 / 9.0, 0.1, 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_forward_and_frustum() {
        let camera = Camera::perspective(Vec3::zeros(), 90.0, 1.0, 0.1, 100.0)
            .looking_at(Vec3::new(0.0, 0.0, -10.0));
        assert_relative_eq!(camera.forward(), Vec3::new(0.0, 0.0, -1.0));
        assert!(camera.frustum().contains_point(Vec3::new(0.0, 0.0, -50.0)));
        assert!(!camera.frustum().contains_point(Vec3::new(0.0, 0.0, 50.0)));
    }

    #[test]
    fn test_screen_size() {
        let camera = Camera::perspective(Vec3::zeros(), 90.0, 1.0, 0.1, 100.0).with_viewport_height(1000.0);
        // tan(45°) = 1, so one unit at distance one spans half the viewport
        assert_relative_eq!(camera.projection_scale(), 500.0, epsilon = 1e-2);
        assert_relative_eq!(camera.screen_size(1.0, 10.0), 100.0, epsilon = 1e-2);
        assert!(camera.screen_size(2.0, 1.0).is_infinite());
    }

    #[test]
    fn test_degenerate_target_keeps_valid_forward() {
        let camera = Camera::perspective(Vec3::zeros(), 60.0, 1.0, 0.1, 100.0);
        assert_relative_eq!(camera.forward().norm(), 1.0);
    }
}
