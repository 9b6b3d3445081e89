//! Material handles
//!
//! Only the state that decides batching and draw order lives here; shader
//! and texture binding belongs to the backend.

use serde::{Deserialize, Serialize};

/// Caller-assigned material handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MaterialId(pub u32);

/// How a material's fragments combine with the framebuffer
///
/// Declaration order is the order blend groups execute within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum BlendMode {
    /// No blending, depth written
    #[default]
    Opaque,
    /// Alpha-tested cutout, still depth written
    Masked,
    /// Classic alpha blending
    AlphaBlend,
    /// Additive blending
    Additive,
}

impl BlendMode {
    /// Whether fragments blend with what is behind them
    pub fn is_transparent(self) -> bool {
        matches!(self, BlendMode::AlphaBlend | BlendMode::Additive)
    }
}

/// Material description as seen by culling, batching and sorting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Material {
    /// Material handle
    pub id: MaterialId,
    /// Shader program id
    pub shader_id: u32,
    /// Albedo texture id, 0 when untextured
    pub texture_id: u32,
    /// Normal map texture id, 0 when absent
    pub normal_map_id: u32,
    /// Blend mode
    pub blend_mode: BlendMode,
    /// Disable back-face culling
    pub two_sided: bool,
}

impl Material {
    /// Create an opaque, single-sided material
    pub fn new(id: u32, shader_id: u32) -> Self {
        Self {
            id: MaterialId(id),
            shader_id,
            ..Default::default()
        }
    }

    /// Builder: set the albedo texture
    #[must_use]
    pub fn with_texture(mut self, texture_id: u32) -> Self {
        self.texture_id = texture_id;
        self
    }

    /// Builder: set the normal map
    #[must_use]
    pub fn with_normal_map(mut self, normal_map_id: u32) -> Self {
        self.normal_map_id = normal_map_id;
        self
    }

    /// Builder: set the blend mode
    #[must_use]
    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    /// Builder: render both faces
    #[must_use]
    pub fn with_two_sided(mut self, two_sided: bool) -> Self {
        self.two_sided = two_sided;
        self
    }

    /// Whether this material needs back-to-front blending
    pub fn is_transparent(&self) -> bool {
        self.blend_mode.is_transparent()
    }
}
