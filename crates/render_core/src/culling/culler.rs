//! Per-frame visibility determination
//!
//! Every live object runs through an ordered pipeline; the first failing
//! test rejects it and is counted in [`CullingStats`]:
//!
//! ```text
//! distance -> small object -> frustum -> occlusion -> visible
//! ```

use super::{CullableObject, CullingConfig, HiZBuffer, OcclusionFallback, OcclusionQueryPool};
use crate::camera::Camera;
use crate::foundation::math::{Mat4, Vec3};
use crate::spatial::{Bvh, BvhConfig, Frustum, AABB};
use log::{debug, trace, warn};
use std::time::Instant;

/// Statistics of the last [`Culler::cull`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CullingStats {
    /// Live objects considered
    pub total_objects: usize,
    /// Objects that passed every test
    pub visible_objects: usize,
    /// Rejected by the frustum test
    pub frustum_culled: usize,
    /// Rejected by the occlusion test
    pub occlusion_culled: usize,
    /// Rejected by the distance test
    pub distance_culled: usize,
    /// Rejected by the screen-size test
    pub small_object_culled: usize,
    /// Objects whose occlusion result was still in flight
    pub pending_occlusion_queries: usize,
    /// `1 - visible / total`, zero for an empty scene
    pub culling_efficiency: f32,
    /// Time spent in the last cull in microseconds
    pub cull_time_us: u64,
    /// Frame the statistics belong to
    pub frame_index: u64,
}

impl CullingStats {
    /// Total number of rejected objects
    pub fn culled_objects(&self) -> usize {
        self.frustum_culled + self.occlusion_culled + self.distance_culled + self.small_object_culled
    }
}

#[derive(Debug, Clone)]
struct FrameView {
    frustum: Frustum,
    position: Vec3,
    view_projection: Mat4,
    projection_scale: f32,
}

/// Registry of cullable objects producing the visible subset each frame
pub struct Culler {
    config: CullingConfig,
    objects: Vec<CullableObject>,
    free_ids: Vec<u32>,
    live_count: usize,
    bvh: Bvh,
    bvh_built: bool,
    hi_z: Option<HiZBuffer>,
    queries: OcclusionQueryPool,
    view: Option<FrameView>,
    frame_active: bool,
    frame_index: u64,
    stats: CullingStats,
}

impl Culler {
    /// Create an empty culler
    pub fn new(config: CullingConfig) -> Self {
        if let Err(reason) = config.validate() {
            warn!("Culling config is questionable: {}", reason);
        }
        Self {
            bvh: Bvh::new(Self::bvh_config(&config)),
            queries: OcclusionQueryPool::new(config.occlusion_query_delay),
            config,
            objects: Vec::new(),
            free_ids: Vec::new(),
            live_count: 0,
            bvh_built: false,
            hi_z: None,
            view: None,
            frame_active: false,
            frame_index: 0,
            stats: CullingStats::default(),
        }
    }

    fn bvh_config(config: &CullingConfig) -> BvhConfig {
        BvhConfig {
            max_depth: config.max_bvh_depth.max(1),
            refit_threshold: config.bvh_refit_threshold,
        }
    }

    /// Current configuration
    pub fn config(&self) -> &CullingConfig {
        &self.config
    }

    /// Replace the configuration; takes effect on the next cull
    pub fn set_config(&mut self, config: CullingConfig) {
        if let Err(reason) = config.validate() {
            warn!("Culling config is questionable: {}", reason);
        }
        if config.max_bvh_depth != self.config.max_bvh_depth || config.use_bvh != self.config.use_bvh {
            self.bvh_built = false;
        }
        self.bvh.set_config(Self::bvh_config(&config));
        self.queries.set_delay(config.occlusion_query_delay);
        self.config = config;
    }

    /// Capture the camera for a new frame
    pub fn begin_frame(&mut self, camera: &Camera) {
        self.frame_index += 1;
        self.view = Some(FrameView {
            frustum: camera.frustum(),
            position: camera.position,
            view_projection: camera.view_projection_matrix(),
            projection_scale: camera.projection_scale(),
        });
        self.frame_active = true;
        trace!("Culler frame {} started", self.frame_index);
    }

    /// Close the frame; `cull` refuses to run until the next `begin_frame`
    pub fn end_frame(&mut self) {
        if !self.frame_active {
            return;
        }
        self.frame_active = false;
        debug!(
            "Frame {}: {}/{} visible ({} frustum, {} occlusion, {} distance, {} small) in {}us",
            self.frame_index,
            self.stats.visible_objects,
            self.stats.total_objects,
            self.stats.frustum_culled,
            self.stats.occlusion_culled,
            self.stats.distance_culled,
            self.stats.small_object_culled,
            self.stats.cull_time_us
        );
    }

    /// Index of the frame opened by the last `begin_frame`
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Start tracking an object and return its id
    ///
    /// Ids of removed objects are reused, most recently removed first.
    pub fn register_object(&mut self, bounds: AABB, user_data: u64) -> u32 {
        let id = match self.free_ids.pop() {
            Some(id) => {
                self.objects[id as usize] = CullableObject::new(id, bounds, user_data);
                id
            }
            None => {
                let id = self.objects.len() as u32;
                self.objects.push(CullableObject::new(id, bounds, user_data));
                id
            }
        };
        self.live_count += 1;
        if self.bvh_built {
            self.bvh.insert(id, bounds);
        }
        id
    }

    /// Replace the bounds of an object; unknown ids are ignored
    pub fn update_object_bounds(&mut self, id: u32, bounds: AABB) {
        let Some(object) = self.live_object_mut(id) else {
            return;
        };
        object.set_bounds(bounds);
        if self.bvh_built {
            self.bvh.update(id, bounds);
        }
    }

    /// Stop tracking an object; unknown ids are ignored
    pub fn remove_object(&mut self, id: u32) {
        let Some(object) = self.live_object_mut(id) else {
            return;
        };
        object.alive = false;
        object.visible = false;
        self.live_count -= 1;
        self.free_ids.push(id);
        self.queries.remove(id);
        if self.bvh_built {
            self.bvh.remove(id);
        }
    }

    fn live_object_mut(&mut self, id: u32) -> Option<&mut CullableObject> {
        self.objects.get_mut(id as usize).filter(|o| o.alive)
    }

    /// Record of a live object
    pub fn object(&self, id: u32) -> Option<&CullableObject> {
        self.objects.get(id as usize).filter(|o| o.alive)
    }

    /// Iterate over every live object
    pub fn objects(&self) -> impl Iterator<Item = &CullableObject> {
        self.objects.iter().filter(|o| o.alive)
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.live_count
    }

    /// Feed a depth readback into the Hi-Z pyramid
    ///
    /// Depth values are in `[0, 1]` with 1 at the far plane. Returns `false`
    /// and keeps the previous pyramid when the size does not match.
    pub fn update_depth_buffer(&mut self, width: u32, height: u32, depth: &[f32]) -> bool {
        if let Some(hi_z) = self.hi_z.as_mut() {
            if hi_z.width() == width && hi_z.height() == height {
                return hi_z.update(depth);
            }
        }
        match HiZBuffer::from_depth(width, height, depth) {
            Some(hi_z) => {
                debug!("Hi-Z pyramid rebuilt at {}x{} with {} levels", width, height, hi_z.mip_count());
                self.hi_z = Some(hi_z);
                true
            }
            None => {
                warn!("Rejected depth buffer: {} values for {}x{}", depth.len(), width, height);
                false
            }
        }
    }

    /// Drop the Hi-Z pyramid and all pending occlusion queries
    pub fn clear_depth_buffer(&mut self) {
        self.hi_z = None;
        self.queries.clear();
    }

    /// Build the BVH from scratch over every live object
    pub fn rebuild_bvh(&mut self) {
        let start = Instant::now();
        self.bvh.build(
            self.objects
                .iter()
                .filter(|o| o.alive)
                .map(|o| (o.id, o.bounds)),
        );
        self.bvh_built = true;
        debug!(
            "BVH built over {} objects: {} nodes, depth {} in {}us",
            self.live_count,
            self.bvh.node_count(),
            self.bvh.depth(),
            start.elapsed().as_micros()
        );
    }

    fn prepare_bvh(&mut self) {
        if !self.bvh_built {
            self.rebuild_bvh();
        } else if self.bvh.is_dirty() {
            self.bvh.refit();
        }
    }

    /// The BVH, if it has been built
    pub fn bvh(&self) -> Option<&Bvh> {
        self.bvh_built.then_some(&self.bvh)
    }

    /// Ids of live objects not outside `frustum`, ascending
    pub fn query_frustum(&mut self, frustum: &Frustum) -> Vec<u32> {
        if self.config.use_bvh {
            self.prepare_bvh();
            let mut ids = self.bvh.query_frustum(frustum);
            ids.sort_unstable();
            return ids;
        }
        self.objects()
            .filter(|o| frustum.intersects_aabb(&o.bounds))
            .map(|o| o.id)
            .collect()
    }

    /// Ids of live objects whose bounds touch a sphere, ascending
    pub fn query_sphere(&mut self, center: Vec3, radius: f32) -> Vec<u32> {
        if self.config.use_bvh {
            self.prepare_bvh();
            let mut ids = self.bvh.query_sphere(center, radius);
            ids.sort_unstable();
            return ids;
        }
        self.objects()
            .filter(|o| o.bounds.intersects_sphere(center, radius))
            .map(|o| o.id)
            .collect()
    }

    /// Run the culling pipeline and return visible ids, ascending
    ///
    /// Calling it again within one frame without mutating objects yields the
    /// same ids. Without an open frame nothing is visible.
    pub fn cull(&mut self) -> Vec<u32> {
        if !self.frame_active {
            warn!("Culler::cull called outside begin_frame/end_frame; returning no objects");
            return Vec::new();
        }
        let Some(view) = self.view.clone() else {
            return Vec::new();
        };
        let start = Instant::now();

        let in_frustum = if self.config.use_bvh && self.config.enable_frustum_culling {
            self.prepare_bvh();
            let mut flags = vec![false; self.objects.len()];
            for id in self.bvh.query_frustum(&view.frustum) {
                if let Some(flag) = flags.get_mut(id as usize) {
                    *flag = true;
                }
            }
            Some(flags)
        } else {
            None
        };

        let use_occlusion = self.config.enable_occlusion_culling && self.hi_z.is_some();
        let fallback_occluded = self.config.occlusion_fallback == OcclusionFallback::Hidden;
        let frame = self.frame_index;

        let mut stats = CullingStats {
            total_objects: self.live_count,
            frame_index: frame,
            ..CullingStats::default()
        };
        let mut visible = Vec::new();

        let Self {
            config,
            objects,
            hi_z,
            queries,
            ..
        } = self;

        for object in objects.iter_mut().filter(|o| o.alive) {
            object.distance = (object.sphere.center - view.position).norm();
            object.screen_size = if object.distance <= object.sphere.radius {
                f32::INFINITY
            } else {
                2.0 * object.sphere.radius / object.distance * view.projection_scale
            };
            object.lod_level = config
                .lod_distances
                .iter()
                .filter(|&&d| object.distance >= d)
                .count() as u8;
            object.visible = false;
            object.occluded = false;

            if config.enable_distance_culling && object.distance > config.max_render_distance {
                stats.distance_culled += 1;
                continue;
            }

            if config.enable_small_object_culling && object.screen_size < config.small_object_threshold {
                stats.small_object_culled += 1;
                continue;
            }

            if config.enable_frustum_culling {
                let inside = match &in_frustum {
                    Some(flags) => flags[object.id as usize],
                    None => view.frustum.test_aabb(&object.bounds).is_visible(),
                };
                if !inside {
                    stats.frustum_culled += 1;
                    continue;
                }
            }

            if use_occlusion {
                if let Some(hi_z) = hi_z.as_ref() {
                    queries.issue(object.id, frame, hi_z.is_occluded(&object.bounds, &view.view_projection));
                }
                let occluded = match queries.result(object.id, frame) {
                    Some(occluded) => occluded,
                    None => {
                        stats.pending_occlusion_queries += 1;
                        fallback_occluded
                    }
                };
                if occluded {
                    object.occluded = true;
                    stats.occlusion_culled += 1;
                    continue;
                }
            }

            object.visible = true;
            object.last_visible_frame = frame;
            visible.push(object.id);
        }

        stats.visible_objects = visible.len();
        stats.culling_efficiency = if stats.total_objects > 0 {
            1.0 - stats.visible_objects as f32 / stats.total_objects as f32
        } else {
            0.0
        };
        stats.cull_time_us = start.elapsed().as_micros() as u64;
        self.stats = stats;

        trace!("Culled frame {}: {} visible", frame, visible.len());
        visible
    }

    /// Statistics of the last cull
    pub fn stats(&self) -> &CullingStats {
        &self.stats
    }

    /// Whether a frame is open
    pub fn is_frame_active(&self) -> bool {
        self.frame_active
    }
}

impl Default for Culler {
    fn default() -> Self {
        Self::new(CullingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> Camera {
        Camera::perspective(Vec3::zeros(), 90.0, 1.0, 0.1, 1000.0).looking_at(Vec3::new(0.0, 0.0, -1.0))
    }

    fn unit_box_at(center: Vec3) -> AABB {
        AABB::from_center_extents(center, Vec3::repeat(0.5))
    }

    fn depth_at(camera: &Camera, distance: f32) -> f32 {
        let clip = camera.view_projection_matrix() * crate::foundation::math::Vec4::new(0.0, 0.0, -distance, 1.0);
        clip.z / clip.w * 0.5 + 0.5
    }

    #[test]
    fn test_register_reuses_removed_ids() {
        let mut culler = Culler::default();
        let a = culler.register_object(unit_box_at(Vec3::zeros()), 1);
        let b = culler.register_object(unit_box_at(Vec3::zeros()), 2);
        assert_ne!(a, b);
        culler.remove_object(a);
        assert!(culler.object(a).is_none());
        assert_eq!(culler.object_count(), 1);
        let c = culler.register_object(unit_box_at(Vec3::zeros()), 3);
        assert_eq!(c, a);
        assert_eq!(culler.object(c).map(|o| o.user_data), Some(3));
    }

    #[test]
    fn test_invalid_ids_are_ignored() {
        let mut culler = Culler::default();
        culler.update_object_bounds(42, unit_box_at(Vec3::zeros()));
        culler.remove_object(42);
        assert_eq!(culler.object_count(), 0);
    }

    #[test]
    fn test_cull_without_frame_is_empty() {
        let mut culler = Culler::default();
        culler.register_object(unit_box_at(Vec3::new(0.0, 0.0, -10.0)), 0);
        assert!(culler.cull().is_empty());

        culler.begin_frame(&camera());
        assert_eq!(culler.cull().len(), 1);
        culler.end_frame();
        assert!(culler.cull().is_empty());
    }

    #[test]
    fn test_pipeline_counts_each_rejection() {
        let config = CullingConfig::default()
            .with_max_render_distance(100.0)
            .with_small_object_threshold(2.0);
        let mut culler = Culler::new(config);
        let visible = culler.register_object(unit_box_at(Vec3::new(0.0, 0.0, -10.0)), 0);
        culler.register_object(unit_box_at(Vec3::new(0.0, 0.0, -150.0)), 0);
        culler.register_object(unit_box_at(Vec3::new(0.0, 0.0, 10.0)), 0);
        culler.register_object(
            AABB::from_center_extents(Vec3::new(0.0, 0.0, -90.0), Vec3::repeat(0.001)),
            0,
        );

        culler.begin_frame(&camera());
        assert_eq!(culler.cull(), vec![visible]);
        let stats = culler.stats();
        assert_eq!(stats.total_objects, 4);
        assert_eq!(stats.distance_culled, 1);
        assert_eq!(stats.small_object_culled, 1);
        assert_eq!(stats.frustum_culled, 1);
        assert_eq!(stats.culled_objects(), 3);
        assert_relative_eq!(stats.culling_efficiency, 0.75);
    }

    #[test]
    fn test_distance_boundary() {
        let config = CullingConfig {
            enable_small_object_culling: false,
            ..CullingConfig::default().with_max_render_distance(100.0)
        };
        let mut culler = Culler::new(config);
        let near = culler.register_object(unit_box_at(Vec3::new(0.0, 0.0, -99.9)), 0);
        let far = culler.register_object(unit_box_at(Vec3::new(0.0, 0.0, -100.1)), 0);

        culler.begin_frame(&camera());
        let visible = culler.cull();
        assert!(visible.contains(&near));
        assert!(!visible.contains(&far));
        assert_eq!(culler.stats().distance_culled, 1);
    }

    #[test]
    fn test_cull_is_idempotent() {
        for use_bvh in [false, true] {
            let mut culler = Culler::new(CullingConfig::default().with_bvh(use_bvh));
            for i in 0..50 {
                let x = (i % 10) as f32 * 4.0 - 20.0;
                let z = -((i / 10) as f32 * 8.0 + 5.0);
                culler.register_object(unit_box_at(Vec3::new(x, 0.0, z)), i);
            }
            culler.begin_frame(&camera());
            let first = culler.cull();
            let second = culler.cull();
            assert!(!first.is_empty());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_bvh_and_linear_scan_agree() {
        let mut linear = Culler::default();
        let mut accelerated = Culler::new(CullingConfig::default().with_bvh(true));
        for i in 0..200u32 {
            let angle = i as f32 * 0.37;
            let center = Vec3::new(angle.cos() * (i as f32), (i % 7) as f32, angle.sin() * (i as f32));
            linear.register_object(unit_box_at(center), 0);
            accelerated.register_object(unit_box_at(center), 0);
        }
        linear.begin_frame(&camera());
        accelerated.begin_frame(&camera());
        assert_eq!(linear.cull(), accelerated.cull());
        assert_eq!(linear.stats().frustum_culled, accelerated.stats().frustum_culled);
    }

    #[test]
    fn test_bounds_update_round_trip() {
        for use_bvh in [false, true] {
            let mut culler = Culler::new(CullingConfig::default().with_bvh(use_bvh));
            let original = unit_box_at(Vec3::new(-50.0, 0.0, 0.0));
            let moved = unit_box_at(Vec3::new(50.0, 0.0, 0.0));
            let id = culler.register_object(original, 0);
            let other = culler.register_object(unit_box_at(Vec3::new(0.0, 50.0, 0.0)), 0);

            // Prime the BVH before moving so the refit path is exercised
            let _ = culler.query_sphere(Vec3::zeros(), 1000.0);
            culler.update_object_bounds(id, moved);

            let region = |aabb: &AABB| {
                Camera::perspective(aabb.center() + Vec3::new(0.0, 0.0, 5.0), 30.0, 1.0, 0.1, 20.0)
                    .looking_at(aabb.center())
                    .frustum()
            };
            assert_eq!(culler.query_frustum(&region(&moved)), vec![id]);
            assert!(culler.query_frustum(&region(&original)).is_empty());
            assert_eq!(culler.query_sphere(Vec3::new(50.0, 0.0, 0.0), 1.0), vec![id]);
            assert_eq!(culler.query_sphere(Vec3::new(0.0, 50.0, 0.0), 1.0), vec![other]);
        }
    }

    #[test]
    fn test_register_after_bvh_build_is_queryable() {
        let mut culler = Culler::new(CullingConfig::default().with_bvh(true));
        culler.register_object(unit_box_at(Vec3::new(0.0, 0.0, -10.0)), 0);
        culler.rebuild_bvh();
        let late = culler.register_object(unit_box_at(Vec3::new(0.0, 0.0, -20.0)), 0);
        assert!(culler.query_sphere(Vec3::new(0.0, 0.0, -20.0), 1.0).contains(&late));
        culler.remove_object(late);
        assert!(culler.query_sphere(Vec3::new(0.0, 0.0, -20.0), 1.0).is_empty());
    }

    #[test]
    fn test_lod_level_from_distance() {
        let config = CullingConfig {
            lod_distances: vec![10.0, 20.0],
            ..CullingConfig::default()
        };
        let mut culler = Culler::new(config);
        let near = culler.register_object(unit_box_at(Vec3::new(0.0, 0.0, -5.0)), 0);
        let mid = culler.register_object(unit_box_at(Vec3::new(0.0, 0.0, -15.0)), 0);
        let far = culler.register_object(unit_box_at(Vec3::new(0.0, 0.0, -25.0)), 0);
        culler.begin_frame(&camera());
        culler.cull();
        assert_eq!(culler.object(near).map(|o| o.lod_level), Some(0));
        assert_eq!(culler.object(mid).map(|o| o.lod_level), Some(1));
        assert_eq!(culler.object(far).map(|o| o.lod_level), Some(2));
    }

    #[test]
    fn test_occlusion_result_arrives_after_delay() {
        let cam = camera();
        let config = CullingConfig::default().with_occlusion(1, OcclusionFallback::Visible);
        let mut culler = Culler::new(config);
        let hidden = culler.register_object(unit_box_at(Vec3::new(0.0, 0.0, -30.0)), 0);
        let wall = depth_at(&cam, 10.0);
        assert!(culler.update_depth_buffer(32, 32, &vec![wall; 32 * 32]));

        culler.begin_frame(&cam);
        assert_eq!(culler.cull(), vec![hidden]);
        assert_eq!(culler.stats().pending_occlusion_queries, 1);
        culler.end_frame();

        culler.begin_frame(&cam);
        assert!(culler.cull().is_empty());
        assert_eq!(culler.stats().occlusion_culled, 1);
        assert_eq!(culler.object(hidden).map(|o| o.occluded), Some(true));
        culler.end_frame();
    }

    #[test]
    fn test_occlusion_fallback_hidden() {
        let cam = camera();
        let config = CullingConfig::default().with_occlusion(2, OcclusionFallback::Hidden);
        let mut culler = Culler::new(config);
        culler.register_object(unit_box_at(Vec3::new(0.0, 0.0, -5.0)), 0);
        culler.update_depth_buffer(8, 8, &[1.0; 64]);

        culler.begin_frame(&cam);
        assert!(culler.cull().is_empty());
        culler.end_frame();
        culler.begin_frame(&cam);
        assert!(culler.cull().is_empty());
        culler.end_frame();
        culler.begin_frame(&cam);
        assert_eq!(culler.cull().len(), 1);
    }

    #[test]
    fn test_rejects_mismatched_depth_buffer() {
        let mut culler = Culler::default();
        assert!(!culler.update_depth_buffer(4, 4, &[1.0; 3]));
        assert!(culler.update_depth_buffer(4, 4, &[1.0; 16]));
        assert!(!culler.update_depth_buffer(4, 4, &[1.0; 3]));
    }
}
