//! Registry record for a cullable object

use crate::spatial::{BoundingSphere, AABB};

/// One object tracked by the [`Culler`](super::Culler)
///
/// The culler owns this record; the caller owns the entity behind it and
/// keeps `bounds` in sync through `update_object_bounds`.
#[derive(Debug, Clone)]
pub struct CullableObject {
    /// Stable id, recycled only after removal
    pub id: u32,
    /// World-space bounds
    pub bounds: AABB,
    /// World-space bounding sphere derived from `bounds`
    pub sphere: BoundingSphere,
    /// Distance from the camera to the sphere center, as of the last cull
    pub distance: f32,
    /// Projected diameter in pixels, as of the last cull
    pub screen_size: f32,
    /// Opaque caller data
    pub user_data: u64,
    /// Passed every test in the last cull
    pub visible: bool,
    /// Rejected by the occlusion test in the last cull
    pub occluded: bool,
    /// Level of detail chosen in the last cull
    pub lod_level: u8,
    /// Frame index at which the object was last visible
    pub last_visible_frame: u64,
    pub(crate) alive: bool,
}

impl CullableObject {
    pub(crate) fn new(id: u32, bounds: AABB, user_data: u64) -> Self {
        Self {
            id,
            bounds,
            sphere: BoundingSphere::from_aabb(&bounds),
            distance: 0.0,
            screen_size: 0.0,
            user_data,
            visible: false,
            occluded: false,
            lod_level: 0,
            last_visible_frame: 0,
            alive: true,
        }
    }

    pub(crate) fn set_bounds(&mut self, bounds: AABB) {
        self.bounds = bounds;
        self.sphere = BoundingSphere::from_aabb(&bounds);
    }

    /// Whether the slot currently holds a registered object
    pub fn is_alive(&self) -> bool {
        self.alive
    }
}
