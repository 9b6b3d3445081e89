//! Mesh representation for 3D models
//!
//! Meshes are opaque to culling and batching apart from their id, bounds and
//! the CPU-side vertex/index data static batching merges. Uploading them to
//! the GPU is the backend's business.

use crate::foundation::math::{utils, Mat4, Vec3};
use crate::spatial::AABB;
use serde::{Deserialize, Serialize};

/// Caller-assigned mesh handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshId(pub u32);

/// 3D vertex data structure for rendering
///
/// `#[repr(C)]` keeps the layout stable for GPU buffer uploads.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    /// Position in 3D space
    pub position: [f32; 3],

    /// Normal vector
    pub normal: [f32; 3],

    /// Texture coordinates
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Create a new vertex
    pub fn new(position: [f32; 3], normal: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tex_coord,
        }
    }

    /// Copy of this vertex moved into another space
    ///
    /// Positions use the full matrix, normals the normal matrix.
    #[must_use]
    pub fn transformed(&self, model: &Mat4) -> Self {
        let position = utils::transform_point(model, &Vec3::from(self.position));
        let normal = (utils::normal_matrix(model) * Vec3::from(self.normal))
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(Vec3::zeros);
        Self {
            position: position.into(),
            normal: normal.into(),
            tex_coord: self.tex_coord,
        }
    }
}

/// Indexed triangle mesh
#[derive(Debug, Clone)]
pub struct Mesh {
    /// Handle used for batching and sorting
    pub id: MeshId,

    /// Vertex data
    pub vertices: Vec<Vertex>,

    /// Triangle indices into `vertices`
    pub indices: Vec<u32>,

    /// Object-space bounds of all vertices
    pub bounds: AABB,
}

impl Mesh {
    /// Create a mesh, computing its bounds from the vertices
    pub fn new(id: MeshId, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let bounds = if vertices.is_empty() {
            AABB::default()
        } else {
            let points: Vec<Vec3> = vertices.iter().map(|v| Vec3::from(v.position)).collect();
            AABB::from_points(points.iter())
        };
        Self {
            id,
            vertices,
            indices,
            bounds,
        }
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of indices
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Number of whole triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Merge several meshes into one, each moved by its transform
    ///
    /// Indices of every part are offset past the vertices of the parts
    /// before it. `parts` and `transforms` are paired positionally.
    pub fn merged<'a>(id: MeshId, parts: impl IntoIterator<Item = (&'a Mesh, &'a Mat4)>) -> Self {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        for (mesh, transform) in parts {
            let base = vertices.len() as u32;
            vertices.extend(mesh.vertices.iter().map(|v| v.transformed(transform)));
            indices.extend(mesh.indices.iter().map(|i| i + base));
        }
        Self::new(id, vertices, indices)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::strip_mesh;
    use super::*;

    #[test]
    fn test_bounds_from_vertices() {
        let mesh = strip_mesh(1, 5);
        assert_eq!(mesh.vertex_count(), 5);
        assert_eq!(mesh.triangle_count(), 3);
        assert_eq!(mesh.bounds.min, Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(mesh.bounds.max, Vec3::new(4.0, 1.0, 0.0));
    }

    #[test]
    fn test_merge_offsets_indices_and_transforms() {
        let a = strip_mesh(1, 3);
        let b = strip_mesh(2, 4);
        let ta = Mat4::identity();
        let tb = Mat4::new_translation(&Vec3::new(0.0, 0.0, 10.0));
        let merged = Mesh::merged(MeshId(99), [(&a, &ta), (&b, &tb)]);

        assert_eq!(merged.vertex_count(), 7);
        assert_eq!(merged.index_count(), a.index_count() + b.index_count());
        assert_eq!(&merged.indices[a.index_count()..a.index_count() + 3], &[3, 4, 5]);
        assert_eq!(merged.vertices[3].position, [0.0, 0.0, 10.0]);
        assert_eq!(merged.bounds.max.z, 10.0);
    }

    #[test]
    fn test_vertex_normal_follows_rotation() {
        let vertex = Vertex::new([1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0]);
        let rotation = Mat4::from_euler_angles(0.0, 0.0, std::f32::consts::FRAC_PI_2);
        let moved = vertex.transformed(&rotation);
        assert!((moved.normal[1] - 1.0).abs() < 1e-5);
    }
}
