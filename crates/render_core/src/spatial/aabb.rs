//! Axis-aligned bounding boxes

use crate::foundation::math::{utils, Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Axis-Aligned Bounding Box for spatial queries
///
/// Invariant: `min <= max` component-wise. [`AABB::new`] sorts its inputs so
/// the invariant holds regardless of argument order; [`AABB::empty`] is the
/// only deliberately inverted box and exists as a merge accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AABB {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl AABB {
    /// Create a new AABB from two opposite corners
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }

    /// Create an AABB centered at a point with given half-extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        let extents = extents.abs();
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Inverted box that any merge or expansion replaces
    pub fn empty() -> Self {
        Self {
            min: Vec3::repeat(f32::INFINITY),
            max: Vec3::repeat(f32::NEG_INFINITY),
        }
    }

    /// Smallest box enclosing all the given points
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        let mut aabb = Self::empty();
        for point in points {
            aabb.expand_point(point);
        }
        aabb
    }

    /// Whether `min <= max` holds on every axis
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the extents (half-size) of the AABB
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Full edge lengths of the AABB
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Radius of the sphere through the corners (length of the half-extents)
    pub fn radius(&self) -> f32 {
        self.extents().norm()
    }

    /// Surface area, zero for empty boxes
    pub fn surface_area(&self) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let d = self.size();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Index of the axis with the greatest extent (0 = x, 1 = y, 2 = z)
    pub fn longest_axis(&self) -> usize {
        let d = self.size();
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }

    /// Smallest box enclosing both boxes
    #[must_use]
    pub fn merge(&self, other: &AABB) -> AABB {
        AABB {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Grow this box to include a point
    pub fn expand_point(&mut self, point: &Vec3) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }

    /// Check if this AABB contains a point (boundary inclusive)
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.y >= self.min.y && point.y <= self.max.y &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    /// Check if this AABB fully contains another AABB
    pub fn contains_aabb(&self, other: &AABB) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    /// Check if this AABB intersects another AABB
    pub fn intersects(&self, other: &AABB) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Check if this AABB intersects a sphere
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        let closest = center.sup(&self.min).inf(&self.max);
        (closest - center).norm_squared() <= radius * radius
    }

    /// The eight corners, bit 0/1/2 of the index selecting max on x/y/z
    pub fn corners(&self) -> [Vec3; 8] {
        let mut corners = [Vec3::zeros(); 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            *corner = Vec3::new(
                if i & 1 != 0 { self.max.x } else { self.min.x },
                if i & 2 != 0 { self.max.y } else { self.min.y },
                if i & 4 != 0 { self.max.z } else { self.min.z },
            );
        }
        corners
    }

    /// Transform by a matrix, recomputed from the 8 transformed corners
    ///
    /// The result is conservative, not tight: a rotated box grows.
    #[must_use]
    pub fn transform(&self, matrix: &Mat4) -> AABB {
        let corners = self.corners().map(|c| utils::transform_point(matrix, &c));
        AABB::from_points(corners.iter())
    }

    /// Slab test against a ray
    ///
    /// Returns the entry distance in units of `ray_dir`, or 0 when the origin
    /// is inside. Faces count as inside, so a ray running along a face hits.
    pub fn intersect_ray(&self, ray_origin: Vec3, ray_dir: Vec3) -> Option<f32> {
        let mut t_enter = f32::NEG_INFINITY;
        let mut t_exit = f32::INFINITY;

        for axis in 0..3 {
            let (origin, dir) = (ray_origin[axis], ray_dir[axis]);
            let (lo, hi) = (self.min[axis], self.max[axis]);
            if dir == 0.0 {
                // Parallel to this slab: inside it for the whole ray or never
                if origin < lo || origin > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / dir;
            let (t0, t1) = ((lo - origin) * inv, (hi - origin) * inv);
            t_enter = t_enter.max(t0.min(t1));
            t_exit = t_exit.min(t0.max(t1));
        }

        (t_exit >= t_enter && t_exit >= 0.0).then(|| t_enter.max(0.0))
    }
}

impl Default for AABB {
    fn default() -> Self {
        Self::new(Vec3::zeros(), Vec3::zeros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_box() -> AABB {
        AABB::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_new_orders_corners() {
        let aabb = AABB::new(Vec3::new(2.0, -1.0, 5.0), Vec3::new(-2.0, 3.0, 1.0));
        assert_eq!(aabb.min, Vec3::new(-2.0, -1.0, 1.0));
        assert_eq!(aabb.max, Vec3::new(2.0, 3.0, 5.0));
        assert!(aabb.is_valid());
    }

    #[test]
    fn test_derived_quantities() {
        let aabb = AABB::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 4.0, 6.0));
        assert_eq!(aabb.center(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(aabb.extents(), Vec3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(aabb.radius(), 14.0_f32.sqrt());
        assert_relative_eq!(aabb.surface_area(), 2.0 * (8.0 + 24.0 + 12.0));
        assert_eq!(aabb.longest_axis(), 2);
    }

    #[test]
    fn test_merge_and_containment() {
        let a = unit_box();
        let b = AABB::new(Vec3::new(3.0, 3.0, 3.0), Vec3::new(4.0, 4.0, 4.0));
        let merged = a.merge(&b);
        assert!(merged.contains_aabb(&a));
        assert!(merged.contains_aabb(&b));
        assert!(!a.intersects(&b));
        assert!(merged.contains_point(Vec3::new(2.0, 2.0, 2.0)));
    }

    #[test]
    fn test_empty_is_merge_identity() {
        let merged = AABB::empty().merge(&unit_box());
        assert_eq!(merged, unit_box());
        assert_eq!(AABB::empty().surface_area(), 0.0);
    }

    #[test]
    fn test_transform_is_conservative() {
        let rotation = Mat4::from_euler_angles(0.0, std::f32::consts::FRAC_PI_4, 0.0);
        let moved = Mat4::new_translation(&Vec3::new(10.0, 0.0, 0.0)) * rotation;
        let transformed = unit_box().transform(&moved);
        for corner in unit_box().corners() {
            let p = utils::transform_point(&moved, &corner);
            assert!(transformed.min.x <= p.x + 1e-5 && transformed.max.x >= p.x - 1e-5);
        }
        assert_relative_eq!(transformed.center().x, 10.0, epsilon = 1e-5);
        assert!(transformed.extents().x > 1.0);
    }

    #[test]
    fn test_sphere_intersection() {
        let aabb = unit_box();
        assert!(aabb.intersects_sphere(Vec3::new(2.0, 0.0, 0.0), 1.5));
        assert!(!aabb.intersects_sphere(Vec3::new(3.0, 0.0, 0.0), 1.5));
    }

    #[test]
    fn test_ray_intersection() {
        let aabb = unit_box();
        let hit = aabb.intersect_ray(Vec3::new(-5.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(hit.unwrap(), 4.0);
        assert!(aabb.intersect_ray(Vec3::new(-5.0, 3.0, 0.0), Vec3::new(1.0, 0.0, 0.0)).is_none());
        assert_eq!(aabb.intersect_ray(Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0)), Some(0.0));
    }

    #[test]
    fn test_ray_along_face_hits() {
        let aabb = unit_box();
        let top = aabb.max.y;
        let hit = aabb.intersect_ray(Vec3::new(-5.0, top, 0.0), Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(hit.unwrap(), 5.0 + aabb.min.x);

        let corner = aabb.intersect_ray(Vec3::new(aabb.max.x, top, -5.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(corner.is_some());
        assert!(aabb
            .intersect_ray(Vec3::new(-5.0, top + 1e-3, 0.0), Vec3::new(1.0, 0.0, 0.0))
            .is_none());
    }
}
