//! # Render Core
//!
//! Visibility and batching core for a real-time 3D renderer. Given a scene's
//! worth of drawable objects and a camera, it decides which objects are worth
//! drawing this frame and groups them into the fewest, cheapest draw calls.
//!
//! ## Features
//!
//! - **Spatial primitives**: AABBs, bounding spheres, frustum planes and a BVH
//! - **Culling**: distance, screen-size, frustum and Hi-Z occlusion tests
//! - **Batching**: instanced draw batches and pre-merged static batches
//! - **Render queue**: 64-bit sort keys, per-pass buckets, parallel submission
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//!
//! let mut culler = Culler::new(CullingConfig::default());
//! let id = culler.register_object(AABB::new(Vec3::new(-1.0, -1.0, -6.0), Vec3::new(1.0, 1.0, -4.0)), 0);
//!
//! let camera = Camera::perspective(Vec3::zeros(), 60.0, 16.0 / 9.0, 0.1, 500.0)
//!     .looking_at(Vec3::new(0.0, 0.0, -1.0));
//! culler.begin_frame(&camera);
//! let visible = culler.cull();
//! assert!(visible.contains(&id));
//! culler.end_frame();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod spatial;
pub mod camera;
pub mod resources;
pub mod culling;
pub mod batching;
pub mod queue;
pub mod renderer;

/// Common imports for library users
pub mod prelude {
    pub use crate::{
        foundation::math::{Vec3, Vec4, Mat3, Mat4},
        config::{Config, ConfigError, RenderCoreConfig},
        spatial::{AABB, BoundingSphere, Plane, Frustum, FrustumTest, Bvh},
        camera::Camera,
        resources::{Mesh, MeshId, Vertex, Material, MaterialId, BlendMode},
        culling::{Culler, CullingConfig, CullingStats, CullableObject, OcclusionFallback},
        batching::{
            BatchingSystem, BatchConfig, BatchStats, BatchError, BatchKey,
            DrawBackend, HeadlessBackend, RenderCapabilities,
        },
        queue::{
            RenderQueue, RenderQueueConfig, RenderItem, RenderItemFlags,
            RenderPass, ParallelRenderQueue,
        },
        renderer::{FrameRenderer, FrameStats},
    };
}
