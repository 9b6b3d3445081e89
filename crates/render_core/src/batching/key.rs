//! Pipeline state identity used to group draws

use crate::resources::Material;
use std::cmp::Ordering;

/// Distinct GPU pipeline/state configuration
///
/// Two submissions with equal keys can share one bind and, for the same
/// mesh, one instanced draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BatchKey {
    /// Shader program id
    pub shader_id: u32,
    /// Albedo texture id
    pub texture_id: u32,
    /// Normal map id
    pub normal_map_id: u32,
    /// Blended rather than opaque
    pub transparent: bool,
    /// Back-face culling disabled
    pub two_sided: bool,
}

impl BatchKey {
    /// Derive the key of a material
    pub fn from_material(material: &Material) -> Self {
        Self {
            shader_id: material.shader_id,
            texture_id: material.texture_id,
            normal_map_id: material.normal_map_id,
            transparent: material.is_transparent(),
            two_sided: material.two_sided,
        }
    }

    /// Order that minimizes state changes: opaque first, then shader, then textures
    pub fn flush_order(&self, other: &Self) -> Ordering {
        self.transparent
            .cmp(&other.transparent)
            .then(self.shader_id.cmp(&other.shader_id))
            .then(self.texture_id.cmp(&other.texture_id))
            .then(self.normal_map_id.cmp(&other.normal_map_id))
            .then(self.two_sided.cmp(&other.two_sided))
    }
}

impl From<&Material> for BatchKey {
    fn from(material: &Material) -> Self {
        Self::from_material(material)
    }
}
