//! Per-instance GPU data

use crate::foundation::math::{utils, Mat4, Vec4};

/// Instance data structure for GPU upload
///
/// Layout matches the per-instance vertex attributes: two column-major 4x4
/// matrices, a tint and the object id, 160 bytes in total.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceData {
    /// Model transformation matrix (4x4)
    pub model_matrix: [[f32; 4]; 4],
    /// Normal transformation matrix (3x3, padded to 4x4 for alignment)
    pub normal_matrix: [[f32; 4]; 4],
    /// Tint color
    pub color: [f32; 4],
    /// Object id for picking and debugging
    pub object_id: u32,
    /// Padding for proper alignment
    pub _padding: [u32; 3],
}

impl InstanceData {
    /// Build instance data from a model matrix
    pub fn new(model: &Mat4, color: Vec4, object_id: u32) -> Self {
        Self {
            model_matrix: (*model).into(),
            normal_matrix: Self::calculate_normal_matrix(model),
            color: color.into(),
            object_id,
            _padding: [0; 3],
        }
    }

    /// `transpose(inverse(mat3(model)))` padded to 4x4
    pub fn calculate_normal_matrix(model: &Mat4) -> [[f32; 4]; 4] {
        let normal = utils::normal_matrix(model);
        let mut padded = [[0.0; 4]; 4];
        for (col, column) in padded.iter_mut().enumerate().take(3) {
            for (row, value) in column.iter_mut().enumerate().take(3) {
                *value = normal[(row, col)];
            }
        }
        padded[3][3] = 1.0;
        padded
    }

    /// The model matrix as a nalgebra matrix
    pub fn model(&self) -> Mat4 {
        Mat4::from(self.model_matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use approx::assert_relative_eq;

    #[test]
    fn test_layout_size() {
        assert_eq!(std::mem::size_of::<InstanceData>(), 160);
        let instance = InstanceData::new(&Mat4::identity(), Vec4::new(1.0, 0.5, 0.25, 1.0), 9);
        assert_eq!(bytemuck::bytes_of(&instance).len(), 160);
    }

    #[test]
    fn test_normal_matrix_of_non_uniform_scale() {
        let model = Mat4::new_nonuniform_scaling(&Vec3::new(2.0, 1.0, 1.0));
        let instance = InstanceData::new(&model, Vec4::repeat(1.0), 0);
        // Column-major: [column][row]
        assert_relative_eq!(instance.normal_matrix[0][0], 0.5);
        assert_relative_eq!(instance.normal_matrix[1][1], 1.0);
        assert_relative_eq!(instance.normal_matrix[3][3], 1.0);
        assert_relative_eq!(instance.model(), model);
    }
}
