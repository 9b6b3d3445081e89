//! Culling configuration

use serde::{Deserialize, Serialize};

/// Visibility assumed for objects whose occlusion result is not ready yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OcclusionFallback {
    /// Draw the object; may show one frame of false-positive visibility
    #[default]
    Visible,
    /// Skip the object; may pop in one frame late
    Hidden,
}

/// Configuration for the [`Culler`](super::Culler)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingConfig {
    /// Reject objects outside the view frustum
    pub enable_frustum_culling: bool,
    /// Reject objects hidden in the Hi-Z buffer
    pub enable_occlusion_culling: bool,
    /// Reject objects beyond `max_render_distance`
    pub enable_distance_culling: bool,
    /// Reject objects smaller than `small_object_threshold` pixels
    pub enable_small_object_culling: bool,
    /// Maximum camera distance to a bounding sphere center
    pub max_render_distance: f32,
    /// Minimum projected diameter in pixels
    pub small_object_threshold: f32,
    /// Frames before an issued occlusion query result may be read
    pub occlusion_query_delay: u32,
    /// Visibility used while no query result is ready
    pub occlusion_fallback: OcclusionFallback,
    /// Accelerate frustum and sphere queries with the BVH
    pub use_bvh: bool,
    /// Maximum BVH depth
    pub max_bvh_depth: u32,
    /// Dirty objects beyond which the BVH is rebuilt instead of refit
    pub bvh_refit_threshold: usize,
    /// Ascending distances at which the LOD level increments
    pub lod_distances: Vec<f32>,
}

impl CullingConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self {
            enable_frustum_culling: true,
            enable_occlusion_culling: false,
            enable_distance_culling: true,
            enable_small_object_culling: true,
            max_render_distance: 1000.0,
            small_object_threshold: 1.0,
            occlusion_query_delay: 1,
            occlusion_fallback: OcclusionFallback::Visible,
            use_bvh: false,
            max_bvh_depth: 32,
            bvh_refit_threshold: 64,
            lod_distances: vec![50.0, 150.0, 400.0],
        }
    }

    /// Set the maximum render distance and enable distance culling
    #[must_use]
    pub fn with_max_render_distance(mut self, distance: f32) -> Self {
        self.max_render_distance = distance;
        self.enable_distance_culling = true;
        self
    }

    /// Set the small-object threshold in pixels
    #[must_use]
    pub fn with_small_object_threshold(mut self, pixels: f32) -> Self {
        self.small_object_threshold = pixels;
        self
    }

    /// Enable occlusion culling with the given query delay
    #[must_use]
    pub fn with_occlusion(mut self, query_delay: u32, fallback: OcclusionFallback) -> Self {
        self.enable_occlusion_culling = true;
        self.occlusion_query_delay = query_delay;
        self.occlusion_fallback = fallback;
        self
    }

    /// Enable or disable the BVH
    #[must_use]
    pub fn with_bvh(mut self, enabled: bool) -> Self {
        self.use_bvh = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_render_distance > 0.0) {
            return Err("Max render distance must be positive".to_string());
        }
        if self.small_object_threshold < 0.0 {
            return Err("Small object threshold cannot be negative".to_string());
        }
        if self.max_bvh_depth == 0 {
            return Err("BVH depth must be at least 1".to_string());
        }
        if self.lod_distances.windows(2).any(|w| w[0] > w[1]) {
            return Err("LOD distances must be ascending".to_string());
        }
        Ok(())
    }
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CullingConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.enable_frustum_culling);
        assert!(!config.enable_occlusion_culling);
        assert_eq!(config.occlusion_fallback, OcclusionFallback::Visible);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(CullingConfig::default().with_max_render_distance(0.0).validate().is_err());
        assert!(CullingConfig::default().with_small_object_threshold(-1.0).validate().is_err());

        let mut config = CullingConfig::default();
        config.lod_distances = vec![100.0, 50.0];
        assert!(config.validate().is_err());

        config.lod_distances.clear();
        config.max_bvh_depth = 0;
        assert!(config.validate().is_err());
    }
}
