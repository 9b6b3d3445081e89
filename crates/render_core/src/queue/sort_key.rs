//! 64-bit sort keys
//!
//! A key packs up to four 16-bit fields, outermost first. Which criterion
//! lands in which field is decided by its weight: the heaviest criterion
//! takes bits 48..64. With the default weights the layout is
//!
//! ```text
//! [shader:16][material:16][texture:16][depth:16]
//! ```

use super::RenderItem;
use serde::{Deserialize, Serialize};

/// Bits per key field
const FIELD_BITS: u32 = 16;

/// Something the key can order by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortCriterion {
    /// Shader program id
    Shader,
    /// Material id
    Material,
    /// Albedo texture id
    Texture,
    /// Quantized camera distance, near first
    Depth,
}

/// Relative cost of changing each criterion
///
/// Higher weights sort further out. A weight of zero drops the criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortWeights {
    /// Shader change weight
    pub shader: f32,
    /// Material change weight
    pub material: f32,
    /// Texture change weight
    pub texture: f32,
    /// Depth ordering weight
    pub depth: f32,
}

impl Default for SortWeights {
    fn default() -> Self {
        Self {
            shader: 4.0,
            material: 3.0,
            texture: 2.0,
            depth: 1.0,
        }
    }
}

/// Field assignment of a sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKeyLayout {
    fields: Vec<SortCriterion>,
}

impl SortKeyLayout {
    /// Derive a layout from weights and the state/depth toggles
    pub fn new(weights: &SortWeights, sort_by_state: bool, sort_by_depth: bool) -> Self {
        let mut weighted = vec![
            (SortCriterion::Shader, weights.shader),
            (SortCriterion::Material, weights.material),
            (SortCriterion::Texture, weights.texture),
            (SortCriterion::Depth, weights.depth),
        ];
        weighted.retain(|(criterion, weight)| {
            let enabled = match criterion {
                SortCriterion::Depth => sort_by_depth,
                _ => sort_by_state,
            };
            enabled && *weight > 0.0
        });
        // Stable, so equal weights keep declaration order
        weighted.sort_by(|a, b| b.1.total_cmp(&a.1));
        Self {
            fields: weighted.into_iter().map(|(criterion, _)| criterion).collect(),
        }
    }

    /// Criteria from outermost to innermost
    pub fn fields(&self) -> &[SortCriterion] {
        &self.fields
    }

    /// Pack the key of one item
    ///
    /// Depth is quantized relative to `max_depth`, the furthest item of the
    /// frame. Ids are truncated to 16 bits.
    pub fn key(&self, item: &RenderItem, max_depth: f32) -> u64 {
        self.fields
            .iter()
            .enumerate()
            .fold(0u64, |key, (slot, criterion)| {
                let value = match criterion {
                    SortCriterion::Shader => item.material.shader_id & 0xFFFF,
                    SortCriterion::Material => item.material.id.0 & 0xFFFF,
                    SortCriterion::Texture => item.material.texture_id & 0xFFFF,
                    SortCriterion::Depth => u32::from(quantize_depth(item.depth, max_depth)),
                };
                let shift = 64 - FIELD_BITS * (slot as u32 + 1);
                key | (u64::from(value) << shift)
            })
    }
}

impl Default for SortKeyLayout {
    fn default() -> Self {
        Self::new(&SortWeights::default(), true, true)
    }
}

/// Map a distance in `[0, max_depth]` onto 16 bits
pub fn quantize_depth(depth: f32, max_depth: f32) -> u16 {
    if !(max_depth > 0.0) || !depth.is_finite() {
        return 0;
    }
    ((depth / max_depth).clamp(0.0, 1.0) * f32::from(u16::MAX)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4;
    use crate::resources::{Material, MeshId};

    fn item(shader: u32, material: u32, texture: u32, depth: f32) -> RenderItem {
        RenderItem::new(MeshId(1), Material::new(material, shader).with_texture(texture), Mat4::identity(), 0)
            .with_depth(depth)
    }

    #[test]
    fn test_default_layout() {
        let layout = SortKeyLayout::default();
        assert_eq!(
            layout.fields(),
            &[
                SortCriterion::Shader,
                SortCriterion::Material,
                SortCriterion::Texture,
                SortCriterion::Depth
            ]
        );
        let key = layout.key(&item(0x12, 0x34, 0x56, 10.0), 10.0);
        assert_eq!(key, 0x0012_0034_0056_FFFF);
    }

    #[test]
    fn test_shader_dominates_depth() {
        let layout = SortKeyLayout::default();
        let near_expensive = layout.key(&item(2, 1, 1, 1.0), 100.0);
        let far_cheap = layout.key(&item(1, 1, 1, 100.0), 100.0);
        assert!(far_cheap < near_expensive);
    }

    #[test]
    fn test_weights_reorder_fields() {
        let weights = SortWeights {
            texture: 10.0,
            material: 0.0,
            ..SortWeights::default()
        };
        let layout = SortKeyLayout::new(&weights, true, false);
        assert_eq!(layout.fields(), &[SortCriterion::Texture, SortCriterion::Shader]);
        assert_eq!(layout.key(&item(1, 9, 2, 5.0), 10.0), 0x0002_0001_0000_0000);
    }

    #[test]
    fn test_quantize_depth_edges() {
        assert_eq!(quantize_depth(5.0, 0.0), 0);
        assert_eq!(quantize_depth(f32::NAN, 10.0), 0);
        assert_eq!(quantize_depth(20.0, 10.0), u16::MAX);
        assert_eq!(quantize_depth(0.0, 10.0), 0);
    }
}
