//! Math utilities and types
//!
//! Vector and matrix aliases shared by culling, batching and sorting.

pub use nalgebra::{
    Vector3, Vector4,
    Matrix3, Matrix4,
};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Math utility functions
pub mod utils {
    use super::{Mat3, Mat4, Vec3};

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees.to_radians()
    }

    /// Translation column of an affine transform
    pub fn translation(matrix: &Mat4) -> Vec3 {
        Vec3::new(matrix.m14, matrix.m24, matrix.m34)
    }

    /// Normal matrix: `transpose(inverse(mat3(model)))`
    ///
    /// Singular models (zero scale on an axis) fall back to the upper 3x3
    /// itself so degenerate instances still produce finite normals.
    pub fn normal_matrix(model: &Mat4) -> Mat3 {
        let mat3: Mat3 = model.fixed_view::<3, 3>(0, 0).clone_owned();
        mat3.try_inverse().unwrap_or(mat3).transpose()
    }

    /// Transform a point by an affine or projective matrix
    pub fn transform_point(matrix: &Mat4, point: &Vec3) -> Vec3 {
        matrix.transform_point(&super::Point3::from(*point)).coords
    }
}
