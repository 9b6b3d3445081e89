//! Hierarchical-Z occlusion
//!
//! The depth pyramid is built on the CPU from a depth readback of the
//! previous frame:
//! 1. Level 0 is the depth buffer itself, values in `[0, 1]` (far = 1)
//! 2. Each further level stores the maximum of the 2x2 texels below it
//! 3. An object is occluded when the nearest point of its projected box is
//!    further away than the furthest occluder depth under the box
//!
//! Query results are read back with a configurable delay, mirroring GPU
//! occlusion queries that are never waited on within the issuing frame.

use crate::foundation::math::{Mat4, Vec4};
use crate::spatial::AABB;
use std::collections::HashMap;

/// Clip-space w below which a corner counts as behind the camera
const MIN_CLIP_W: f32 = 1.0e-5;

/// Frames past readiness after which a query result is too stale to use
const MAX_RESULT_AGE: u64 = 2;

#[derive(Debug, Clone)]
struct HiZLevel {
    width: u32,
    height: u32,
    depth: Vec<f32>,
}

impl HiZLevel {
    fn at(&self, x: u32, y: u32) -> f32 {
        self.depth[(y * self.width + x) as usize]
    }
}

/// Max-depth mip chain over a depth buffer
///
/// Depth texels are row-major with row 0 at the bottom of the viewport
/// (NDC `y = -1`).
#[derive(Debug, Clone)]
pub struct HiZBuffer {
    levels: Vec<HiZLevel>,
}

impl HiZBuffer {
    /// Pyramid over a cleared (far plane) depth buffer
    ///
    /// Zero dimensions are clamped to one texel.
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let mut buffer = Self { levels: Vec::new() };
        buffer.rebuild(width, height, vec![1.0; (width * height) as usize]);
        buffer
    }

    /// Pyramid over an existing depth buffer
    ///
    /// Returns `None` when `depth` does not hold `width * height` values.
    pub fn from_depth(width: u32, height: u32, depth: &[f32]) -> Option<Self> {
        if width == 0 || height == 0 || depth.len() != (width as usize) * (height as usize) {
            return None;
        }
        let mut buffer = Self { levels: Vec::new() };
        buffer.rebuild(width, height, depth.to_vec());
        Some(buffer)
    }

    /// Replace the depth data, keeping the dimensions
    ///
    /// Returns `false` and leaves the pyramid untouched on a size mismatch.
    pub fn update(&mut self, depth: &[f32]) -> bool {
        let (width, height) = (self.width(), self.height());
        if depth.len() != (width as usize) * (height as usize) {
            return false;
        }
        self.rebuild(width, height, depth.to_vec());
        true
    }

    fn rebuild(&mut self, width: u32, height: u32, depth: Vec<f32>) {
        self.levels.clear();
        self.levels.push(HiZLevel { width, height, depth });

        while let Some(last) = self.levels.last() {
            if last.width == 1 && last.height == 1 {
                break;
            }
            // Ceiling halving so odd edges are folded into the last texel
            let width = (last.width + 1) / 2;
            let height = (last.height + 1) / 2;
            let mut depth = Vec::with_capacity((width * height) as usize);
            for y in 0..height {
                for x in 0..width {
                    let x0 = (x * 2).min(last.width - 1);
                    let x1 = (x * 2 + 1).min(last.width - 1);
                    let y0 = (y * 2).min(last.height - 1);
                    let y1 = (y * 2 + 1).min(last.height - 1);
                    let max = last
                        .at(x0, y0)
                        .max(last.at(x1, y0))
                        .max(last.at(x0, y1))
                        .max(last.at(x1, y1));
                    depth.push(max);
                }
            }
            self.levels.push(HiZLevel { width, height, depth });
        }
    }

    /// Width of level 0
    pub fn width(&self) -> u32 {
        self.levels.first().map_or(0, |l| l.width)
    }

    /// Height of level 0
    pub fn height(&self) -> u32 {
        self.levels.first().map_or(0, |l| l.height)
    }

    /// Number of levels including level 0
    pub fn mip_count(&self) -> usize {
        self.levels.len()
    }

    /// Maximum depth over a texel rectangle of one level, bounds inclusive
    pub fn max_depth(&self, level: usize, x0: u32, y0: u32, x1: u32, y1: u32) -> f32 {
        let Some(mip) = self.levels.get(level.min(self.levels.len().saturating_sub(1))) else {
            return 1.0;
        };
        let x1 = x1.min(mip.width - 1);
        let y1 = y1.min(mip.height - 1);
        let mut max = 0.0f32;
        for y in y0.min(y1)..=y1 {
            for x in x0.min(x1)..=x1 {
                max = max.max(mip.at(x, y));
            }
        }
        max
    }

    /// Test a world-space box against the pyramid
    ///
    /// Boxes crossing the camera plane or lying off screen are never
    /// reported as occluded; rejecting those is the frustum test's job.
    pub fn is_occluded(&self, bounds: &AABB, view_projection: &Mat4) -> bool {
        if self.levels.is_empty() {
            return false;
        }

        let mut min_ndc = [f32::MAX; 3];
        let mut max_ndc = [f32::MIN; 2];
        for corner in bounds.corners() {
            let clip = view_projection * Vec4::new(corner.x, corner.y, corner.z, 1.0);
            if clip.w < MIN_CLIP_W {
                return false;
            }
            let ndc = clip.xyz() / clip.w;
            min_ndc[0] = min_ndc[0].min(ndc.x);
            min_ndc[1] = min_ndc[1].min(ndc.y);
            min_ndc[2] = min_ndc[2].min(ndc.z);
            max_ndc[0] = max_ndc[0].max(ndc.x);
            max_ndc[1] = max_ndc[1].max(ndc.y);
        }

        if max_ndc[0] < -1.0 || min_ndc[0] > 1.0 || max_ndc[1] < -1.0 || min_ndc[1] > 1.0 {
            return false;
        }
        let nearest_depth = min_ndc[2] * 0.5 + 0.5;
        if nearest_depth < 0.0 {
            return false;
        }

        let (width, height) = (self.width() as f32, self.height() as f32);
        let to_texel = |ndc: f32, size: f32| -> u32 {
            (((ndc.clamp(-1.0, 1.0) * 0.5 + 0.5) * size) as u32).min(size as u32 - 1)
        };
        let x0 = to_texel(min_ndc[0], width);
        let x1 = to_texel(max_ndc[0], width);
        let y0 = to_texel(min_ndc[1], height);
        let y1 = to_texel(max_ndc[1], height);

        // Pick the level where the rectangle spans at most two texels per axis
        let span = (x1 - x0 + 1).max(y1 - y0 + 1);
        let level = (32 - (span.saturating_sub(1) / 2).leading_zeros()) as usize;
        let level = level.min(self.levels.len() - 1);

        let occluder_depth = self.max_depth(level, x0 >> level, y0 >> level, x1 >> level, y1 >> level);
        nearest_depth > occluder_depth
    }
}

#[derive(Debug, Clone, Copy)]
struct IssuedQuery {
    frame: u64,
    occluded: bool,
}

/// Occlusion query results that become readable after a frame delay
#[derive(Debug, Clone, Default)]
pub struct OcclusionQueryPool {
    delay: u32,
    queries: HashMap<u32, Vec<IssuedQuery>>,
}

impl OcclusionQueryPool {
    /// Create a pool whose results are readable `delay` frames after issue
    pub fn new(delay: u32) -> Self {
        Self {
            delay,
            queries: HashMap::new(),
        }
    }

    /// Change the readback delay
    pub fn set_delay(&mut self, delay: u32) {
        self.delay = delay;
    }

    /// Record a query result for `id` issued at `frame`
    ///
    /// Issuing twice in one frame replaces the earlier result.
    pub fn issue(&mut self, id: u32, frame: u64, occluded: bool) {
        let delay = u64::from(self.delay);
        let entries = self.queries.entry(id).or_default();
        match entries.last_mut() {
            Some(last) if last.frame == frame => last.occluded = occluded,
            _ => entries.push(IssuedQuery { frame, occluded }),
        }

        // Everything older than the newest readable result can go
        if let Some(newest_ready) = entries.iter().rposition(|q| q.frame + delay <= frame) {
            entries.drain(..newest_ready);
        }
    }

    /// Newest result for `id` that is readable at `frame`
    pub fn result(&self, id: u32, frame: u64) -> Option<bool> {
        let delay = u64::from(self.delay);
        self.queries
            .get(&id)?
            .iter()
            .rev()
            .find(|q| q.frame + delay <= frame)
            .filter(|q| frame - q.frame <= delay + MAX_RESULT_AGE)
            .map(|q| q.occluded)
    }

    /// Forget every query of one object
    pub fn remove(&mut self, id: u32) {
        self.queries.remove(&id);
    }

    /// Forget all queries
    pub fn clear(&mut self) {
        self.queries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Point3, Vec3};

    fn view_projection() -> Mat4 {
        let projection = Mat4::new_perspective(1.0, std::f32::consts::FRAC_PI_2, 0.1, 100.0);
        let view = Mat4::look_at_rh(&Point3::origin(), &Point3::new(0.0, 0.0, -1.0), &Vec3::y());
        projection * view
    }

    fn depth_at(view_projection: &Mat4, distance: f32) -> f32 {
        let clip = view_projection * Vec4::new(0.0, 0.0, -distance, 1.0);
        clip.z / clip.w * 0.5 + 0.5
    }

    #[test]
    fn test_mip_chain_keeps_maximum() {
        let mut depth = vec![0.2; 5 * 3];
        depth[14] = 0.9;
        let buffer = HiZBuffer::from_depth(5, 3, &depth).unwrap();
        assert_eq!(buffer.mip_count(), 4);
        assert_eq!(buffer.max_depth(buffer.mip_count() - 1, 0, 0, 0, 0), 0.9);
        assert_eq!(buffer.max_depth(0, 0, 0, 3, 2), 0.2);
    }

    #[test]
    fn test_rejects_wrong_size() {
        assert!(HiZBuffer::from_depth(4, 4, &[0.5; 15]).is_none());
        let mut buffer = HiZBuffer::new(4, 4);
        assert!(!buffer.update(&[0.5; 3]));
        assert!(buffer.update(&[0.5; 16]));
    }

    #[test]
    fn test_wall_occludes_objects_behind_it() {
        let vp = view_projection();
        let wall = depth_at(&vp, 10.0);
        let buffer = HiZBuffer::from_depth(64, 64, &vec![wall; 64 * 64]).unwrap();

        let behind = AABB::from_center_extents(Vec3::new(0.0, 0.0, -20.0), Vec3::repeat(1.0));
        let in_front = AABB::from_center_extents(Vec3::new(0.0, 0.0, -5.0), Vec3::repeat(1.0));
        let around_camera = AABB::from_center_extents(Vec3::zeros(), Vec3::repeat(1.0));

        assert!(buffer.is_occluded(&behind, &vp));
        assert!(!buffer.is_occluded(&in_front, &vp));
        assert!(!buffer.is_occluded(&around_camera, &vp));
    }

    #[test]
    fn test_hole_in_wall_keeps_object_visible() {
        let vp = view_projection();
        let wall = depth_at(&vp, 10.0);
        let mut depth = vec![wall; 64 * 64];
        // Open the central 8x8 texels to the far plane
        for y in 28..36 {
            for x in 28..36 {
                depth[y * 64 + x] = 1.0;
            }
        }
        let buffer = HiZBuffer::from_depth(64, 64, &depth).unwrap();
        let behind = AABB::from_center_extents(Vec3::new(0.0, 0.0, -20.0), Vec3::repeat(0.5));
        assert!(!buffer.is_occluded(&behind, &vp));
    }

    #[test]
    fn test_query_delay() {
        let mut pool = OcclusionQueryPool::new(1);
        pool.issue(7, 1, true);
        assert_eq!(pool.result(7, 1), None);
        pool.issue(7, 2, false);
        assert_eq!(pool.result(7, 2), Some(true));
        pool.issue(7, 3, false);
        assert_eq!(pool.result(7, 3), Some(false));
    }

    #[test]
    fn test_zero_delay_is_immediate_and_replaces() {
        let mut pool = OcclusionQueryPool::new(0);
        pool.issue(1, 5, true);
        pool.issue(1, 5, false);
        assert_eq!(pool.result(1, 5), Some(false));
    }

    #[test]
    fn test_stale_results_expire() {
        let mut pool = OcclusionQueryPool::new(1);
        pool.issue(3, 1, true);
        assert_eq!(pool.result(3, 2), Some(true));
        assert_eq!(pool.result(3, 10), None);
        pool.remove(3);
        assert_eq!(pool.result(3, 2), None);
    }
}
