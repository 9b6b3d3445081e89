//! View frustum planes and containment tests

use super::{BoundingSphere, AABB};
use crate::foundation::math::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Plane defined by normal and distance from origin
///
/// A point `p` lies on the positive (inner) side when
/// `normal · p + distance >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    /// Normal vector (unit length)
    pub normal: Vec3,
    /// Signed distance term
    pub distance: f32,
}

impl Plane {
    /// Create a new plane from normal and distance
    ///
    /// Both terms are rescaled so the normal has unit length.
    pub fn new(normal: Vec3, distance: f32) -> Self {
        let length = normal.norm();
        if length > f32::EPSILON {
            Self { normal: normal / length, distance: distance / length }
        } else {
            Self { normal: Vec3::zeros(), distance }
        }
    }

    /// Create a plane from `ax + by + cz + d` coefficients
    pub fn from_coefficients(coefficients: &Vec4) -> Self {
        Self::new(coefficients.xyz(), coefficients.w)
    }

    /// Calculate signed distance from plane to point
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(&point) + self.distance
    }

    /// Corner of the box furthest along the normal ("positive vertex")
    pub fn positive_vertex(&self, aabb: &AABB) -> Vec3 {
        Vec3::new(
            if self.normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
            if self.normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
            if self.normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
        )
    }

    /// Corner of the box furthest against the normal ("negative vertex")
    pub fn negative_vertex(&self, aabb: &AABB) -> Vec3 {
        Vec3::new(
            if self.normal.x >= 0.0 { aabb.min.x } else { aabb.max.x },
            if self.normal.y >= 0.0 { aabb.min.y } else { aabb.max.y },
            if self.normal.z >= 0.0 { aabb.min.z } else { aabb.max.z },
        )
    }
}

/// Result of a frustum containment test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrustumTest {
    /// Entirely outside at least one plane
    Outside,
    /// Straddles one or more planes
    Intersecting,
    /// Entirely inside every plane
    Inside,
}

impl FrustumTest {
    /// Whether any part of the volume may be visible
    pub fn is_visible(self) -> bool {
        self != FrustumTest::Outside
    }
}

/// Frustum for visibility culling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frustum {
    /// Six planes (left, right, bottom, top, near, far), normals pointing inward
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Index of the left plane
    pub const LEFT: usize = 0;
    /// Index of the right plane
    pub const RIGHT: usize = 1;
    /// Index of the bottom plane
    pub const BOTTOM: usize = 2;
    /// Index of the top plane
    pub const TOP: usize = 3;
    /// Index of the near plane
    pub const NEAR: usize = 4;
    /// Index of the far plane
    pub const FAR: usize = 5;

    /// Plane mask with every plane enabled
    pub const ALL_PLANES: u8 = 0b11_1111;

    /// Create a frustum from six planes
    pub fn new(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extract frustum planes from a view-projection matrix
    ///
    /// Gribb-Hartmann extraction for clip space with `-w <= z <= w`. Normals
    /// point into the frustum and are normalized.
    pub fn from_matrix(vp_matrix: &Mat4) -> Self {
        let row = |i: usize| -> Vec4 { vp_matrix.row(i).transpose() };
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        Self {
            planes: [
                Plane::from_coefficients(&(r3 + r0)),
                Plane::from_coefficients(&(r3 - r0)),
                Plane::from_coefficients(&(r3 + r1)),
                Plane::from_coefficients(&(r3 - r1)),
                Plane::from_coefficients(&(r3 + r2)),
                Plane::from_coefficients(&(r3 - r2)),
            ],
        }
    }

    /// Check whether a point is inside every plane
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// Classify an AABB using the positive/negative vertex test
    pub fn test_aabb(&self, aabb: &AABB) -> FrustumTest {
        let mut mask = Self::ALL_PLANES;
        self.test_aabb_masked(aabb, &mut mask)
    }

    /// Classify an AABB against the planes selected by `mask`
    ///
    /// Planes the box lies fully inside are cleared from `mask`, so a
    /// hierarchy can skip them for every descendant of this box.
    pub fn test_aabb_masked(&self, aabb: &AABB, mask: &mut u8) -> FrustumTest {
        for (i, plane) in self.planes.iter().enumerate() {
            let bit = 1u8 << i;
            if *mask & bit == 0 {
                continue;
            }
            if plane.distance_to_point(plane.positive_vertex(aabb)) < 0.0 {
                return FrustumTest::Outside;
            }
            if plane.distance_to_point(plane.negative_vertex(aabb)) >= 0.0 {
                *mask &= !bit;
            }
        }

        if *mask == 0 {
            FrustumTest::Inside
        } else {
            FrustumTest::Intersecting
        }
    }

    /// Check if an AABB is inside or intersects the frustum
    pub fn intersects_aabb(&self, aabb: &AABB) -> bool {
        self.test_aabb(aabb).is_visible()
    }

    /// Classify a bounding sphere
    pub fn test_sphere(&self, sphere: &BoundingSphere) -> FrustumTest {
        let mut result = FrustumTest::Inside;
        for plane in &self.planes {
            let distance = plane.distance_to_point(sphere.center);
            if distance < -sphere.radius {
                return FrustumTest::Outside;
            }
            if distance < sphere.radius {
                result = FrustumTest::Intersecting;
            }
        }
        result
    }
}

impl Default for Frustum {
    /// Degenerate frustum that accepts everything
    fn default() -> Self {
        Self {
            planes: [Plane { normal: Vec3::zeros(), distance: 0.0 }; 6],
        }
    }
}
