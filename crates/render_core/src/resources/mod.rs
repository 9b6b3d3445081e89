//! Render resource handles
//!
//! Meshes and materials as consumed by culling, batching and sorting. They
//! are owned by the caller and shared with this crate through `Arc` or by
//! value; loading and GPU upload happen elsewhere.

mod mesh;
mod material;

pub use mesh::{Mesh, MeshId, Vertex};
pub use material::{BlendMode, Material, MaterialId};

#[cfg(test)]
pub(crate) use mesh::test_support;
