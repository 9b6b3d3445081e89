//! Spatial partitioning and visibility primitives
//!
//! Bounding volumes, frustum planes and the bounding volume hierarchy used
//! to accelerate visibility queries. Everything here is pure math with no
//! per-frame state.

mod aabb;
mod sphere;
mod frustum;
mod bvh;

pub use aabb::AABB;
pub use sphere::BoundingSphere;
pub use frustum::{Frustum, FrustumTest, Plane};
pub use bvh::{Bvh, BvhConfig, BvhNode, BvhNodeKind, BvhQueryStats};
