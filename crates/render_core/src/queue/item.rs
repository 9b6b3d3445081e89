//! Render items and passes

use crate::foundation::math::{utils, Mat4, Vec3};
use crate::resources::{BlendMode, Material, MeshId};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Render pass, declared in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RenderPass {
    /// Shadow map rendering
    Shadow,
    /// Depth pre-pass
    Depth,
    /// Deferred geometry buffer fill
    GBuffer,
    /// Forward opaque geometry
    Opaque,
    /// Blended geometry, back to front
    Transparent,
    /// Full-screen effects
    PostProcess,
    /// User interface
    UI,
    /// Debug overlays
    Debug,
}

impl RenderPass {
    /// Number of passes
    pub const COUNT: usize = 8;

    /// Every pass in execution order
    pub const ALL: [RenderPass; Self::COUNT] = [
        RenderPass::Shadow,
        RenderPass::Depth,
        RenderPass::GBuffer,
        RenderPass::Opaque,
        RenderPass::Transparent,
        RenderPass::PostProcess,
        RenderPass::UI,
        RenderPass::Debug,
    ];

    /// Position in the execution order
    pub fn index(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// Per-item render flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct RenderItemFlags: u32 {
        /// Drawn into shadow maps
        const CASTS_SHADOW = 1 << 0;
        /// Receives shadows
        const RECEIVES_SHADOW = 1 << 1;
        /// Drawn at all; items without it are skipped by sorting
        const VISIBLE = 1 << 2;
    }
}

impl Default for RenderItemFlags {
    fn default() -> Self {
        Self::VISIBLE | Self::CASTS_SHADOW | Self::RECEIVES_SHADOW
    }
}

/// One drawable for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct RenderItem {
    /// Mesh handle
    pub mesh: MeshId,
    /// Material
    pub material: Material,
    /// World transform
    pub transform: Mat4,
    /// Object id from the culler or scene
    pub object_id: u32,
    /// Packed sort key, filled in by sorting
    pub sort_key: u64,
    /// Distance to the camera
    pub depth: f32,
    /// Projected size in pixels
    pub screen_size: f32,
    /// Pass the item is drawn in
    pub pass: RenderPass,
    /// Blend mode, taken from the material
    pub blend_mode: BlendMode,
    /// Shadow and visibility flags
    pub flags: RenderItemFlags,
    /// Level of detail
    pub lod_level: u8,
}

impl RenderItem {
    /// Create an item in the opaque or transparent pass, depending on the material
    pub fn new(mesh: MeshId, material: Material, transform: Mat4, object_id: u32) -> Self {
        let pass = if material.is_transparent() {
            RenderPass::Transparent
        } else {
            RenderPass::Opaque
        };
        Self {
            mesh,
            material,
            transform,
            object_id,
            sort_key: 0,
            depth: 0.0,
            screen_size: 0.0,
            pass,
            blend_mode: material.blend_mode,
            flags: RenderItemFlags::default(),
            lod_level: 0,
        }
    }

    /// Builder: move the item to another pass
    #[must_use]
    pub fn with_pass(mut self, pass: RenderPass) -> Self {
        self.pass = pass;
        self
    }

    /// Builder: set the camera distance
    #[must_use]
    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = depth;
        self
    }

    /// Builder: set the camera distance from the transform's translation
    #[must_use]
    pub fn with_camera(mut self, camera_position: Vec3) -> Self {
        self.depth = (utils::translation(&self.transform) - camera_position).norm();
        self
    }

    /// Builder: set flags
    #[must_use]
    pub fn with_flags(mut self, flags: RenderItemFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Builder: set the level of detail
    #[must_use]
    pub fn with_lod(mut self, lod_level: u8) -> Self {
        self.lod_level = lod_level;
        self
    }

    /// Builder: set the projected size
    #[must_use]
    pub fn with_screen_size(mut self, screen_size: f32) -> Self {
        self.screen_size = screen_size;
        self
    }

    /// Whether the item blends with what is behind it
    pub fn is_transparent(&self) -> bool {
        self.blend_mode.is_transparent()
    }

    /// Whether the item takes part in sorting and execution
    pub fn is_visible(&self) -> bool {
        self.flags.contains(RenderItemFlags::VISIBLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_order() {
        assert_eq!(RenderPass::ALL.len(), RenderPass::COUNT);
        for (i, pass) in RenderPass::ALL.iter().enumerate() {
            assert_eq!(pass.index(), i);
        }
        assert!(RenderPass::Opaque < RenderPass::Transparent);
    }

    #[test]
    fn test_pass_from_material() {
        let glass = Material::new(1, 1).with_blend_mode(BlendMode::Additive);
        let item = RenderItem::new(MeshId(1), glass, Mat4::identity(), 0);
        assert_eq!(item.pass, RenderPass::Transparent);
        assert!(item.is_transparent());

        let cutout = Material::new(2, 1).with_blend_mode(BlendMode::Masked);
        assert_eq!(RenderItem::new(MeshId(1), cutout, Mat4::identity(), 0).pass, RenderPass::Opaque);
    }

    #[test]
    fn test_depth_from_camera() {
        let transform = Mat4::new_translation(&Vec3::new(3.0, 4.0, 0.0));
        let item = RenderItem::new(MeshId(1), Material::default(), transform, 0).with_camera(Vec3::zeros());
        assert!((item.depth - 5.0).abs() < 1e-5);
    }
}
