//! Visibility culling
//!
//! The [`Culler`] owns a registry of [`CullableObject`]s and, once per frame,
//! reduces it to the set worth drawing. Objects are rejected by distance,
//! projected size, the view frustum and finally a Hi-Z occlusion test whose
//! results arrive a configurable number of frames late.

mod config;
mod culler;
mod object;
mod occlusion;

pub use config::{CullingConfig, OcclusionFallback};
pub use culler::{Culler, CullingStats};
pub use object::CullableObject;
pub use occlusion::{HiZBuffer, OcclusionQueryPool};
