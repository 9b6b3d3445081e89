//! Bounding spheres

use super::AABB;
use crate::foundation::math::Vec3;
use serde::{Deserialize, Serialize};

/// Sphere bounding volume, typically derived from an AABB
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingSphere {
    /// Sphere center in world space
    pub center: Vec3,
    /// Sphere radius
    pub radius: f32,
}

impl BoundingSphere {
    /// Create a new sphere
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius: radius.abs() }
    }

    /// Sphere through the corners of a box (`radius = |half-extents|`)
    pub fn from_aabb(aabb: &AABB) -> Self {
        Self {
            center: aabb.center(),
            radius: aabb.radius(),
        }
    }

    /// Check if this sphere contains a point
    pub fn contains_point(&self, point: Vec3) -> bool {
        (point - self.center).norm_squared() <= self.radius * self.radius
    }

    /// Check if two spheres overlap
    pub fn intersects(&self, other: &BoundingSphere) -> bool {
        let combined = self.radius + other.radius;
        (other.center - self.center).norm_squared() <= combined * combined
    }

    /// Check if this sphere overlaps a box
    pub fn intersects_aabb(&self, aabb: &AABB) -> bool {
        aabb.intersects_sphere(self.center, self.radius)
    }
}

impl From<&AABB> for BoundingSphere {
    fn from(aabb: &AABB) -> Self {
        Self::from_aabb(aabb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_aabb() {
        let aabb = AABB::new(Vec3::new(1.0, 1.0, 1.0), Vec3::new(3.0, 3.0, 3.0));
        let sphere = BoundingSphere::from_aabb(&aabb);
        assert_eq!(sphere.center, Vec3::new(2.0, 2.0, 2.0));
        assert_relative_eq!(sphere.radius, 3.0_f32.sqrt());
        for corner in aabb.corners() {
            assert!((corner - sphere.center).norm() <= sphere.radius + 1e-5);
        }
    }

    #[test]
    fn test_overlap() {
        let a = BoundingSphere::new(Vec3::zeros(), 1.0);
        let b = BoundingSphere::new(Vec3::new(1.5, 0.0, 0.0), 1.0);
        let c = BoundingSphere::new(Vec3::new(5.0, 0.0, 0.0), 1.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.contains_point(Vec3::new(0.5, 0.5, 0.0)));
    }
}
