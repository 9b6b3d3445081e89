//! Dynamic and static batch containers

use super::{BatchKey, BufferHandle, InstanceData};
use crate::foundation::math::Mat4;
use crate::resources::{Material, Mesh};
use crate::spatial::AABB;
use std::sync::Arc;

/// Instances of one mesh sharing one [`BatchKey`]
///
/// Instance lists are cleared every frame while the batch itself, and its
/// GPU buffer, are kept. The buffer is only rewritten when this frame's
/// instances differ from the last upload.
#[derive(Debug)]
pub struct RenderBatch {
    key: BatchKey,
    mesh: Arc<Mesh>,
    instances: Vec<InstanceData>,
    uploaded: Vec<InstanceData>,
    dirty: bool,
    pub(crate) buffer: Option<BufferHandle>,
    pub(crate) buffer_capacity: usize,
}

impl RenderBatch {
    /// Create an empty batch
    pub fn new(key: BatchKey, mesh: Arc<Mesh>) -> Self {
        Self {
            key,
            mesh,
            instances: Vec::new(),
            uploaded: Vec::new(),
            dirty: true,
            buffer: None,
            buffer_capacity: 0,
        }
    }

    /// Append one instance
    pub fn push(&mut self, instance: InstanceData) {
        if self.uploaded.get(self.instances.len()) != Some(&instance) {
            self.dirty = true;
        }
        self.instances.push(instance);
    }

    /// Drop this frame's instances, keeping allocations
    pub fn clear(&mut self) {
        self.instances.clear();
    }

    /// State key shared by all instances
    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    /// Mesh drawn by this batch
    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    /// Instances submitted this frame
    pub fn instances(&self) -> &[InstanceData] {
        &self.instances
    }

    /// Number of instances submitted this frame
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Check if nothing was submitted this frame
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Whether the GPU copy is out of date
    pub fn needs_upload(&self) -> bool {
        self.buffer.is_none() || self.dirty || self.instances.len() != self.uploaded.len()
    }

    pub(crate) fn mark_uploaded(&mut self) {
        self.uploaded.clone_from(&self.instances);
        self.dirty = false;
    }

    pub(crate) fn invalidate_upload(&mut self) {
        self.uploaded.clear();
        self.dirty = true;
    }
}

/// Pre-merged geometry drawn with one material across many frames
#[derive(Debug, Clone)]
pub struct StaticBatch {
    /// Merged mesh in batch-local space
    pub mesh: Mesh,
    /// Material used for the whole batch
    pub material: Material,
    /// State key of `material`
    pub key: BatchKey,
    /// Batch-to-world transform
    pub transform: Mat4,
    /// Hidden batches keep their GPU data but are not drawn
    pub visible: bool,
    pub(crate) gpu_mesh: Option<BufferHandle>,
}

impl StaticBatch {
    pub(crate) fn new(mesh: Mesh, material: Material) -> Self {
        Self {
            key: BatchKey::from_material(&material),
            mesh,
            material,
            transform: Mat4::identity(),
            visible: true,
            gpu_mesh: None,
        }
    }

    /// World-space bounds
    pub fn world_bounds(&self) -> AABB {
        self.mesh.bounds.transform(&self.transform)
    }

    /// Whether the merged mesh has been uploaded
    pub fn is_uploaded(&self) -> bool {
        self.gpu_mesh.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use crate::resources::test_support::strip_mesh;

    #[test]
    fn test_unchanged_frame_needs_no_upload() {
        let key = BatchKey::default();
        let mut batch = RenderBatch::new(key, Arc::new(strip_mesh(1, 3)));
        let instance = InstanceData::new(&Mat4::identity(), Vec4::repeat(1.0), 4);
        batch.push(instance);
        batch.buffer = Some(BufferHandle(1));
        assert!(batch.needs_upload());
        batch.mark_uploaded();

        batch.clear();
        batch.push(instance);
        assert!(!batch.needs_upload());

        batch.clear();
        batch.push(InstanceData::new(&Mat4::identity(), Vec4::repeat(0.5), 4));
        assert!(batch.needs_upload());
    }

    #[test]
    fn test_fewer_instances_needs_upload() {
        let mut batch = RenderBatch::new(BatchKey::default(), Arc::new(strip_mesh(1, 3)));
        let instance = InstanceData::new(&Mat4::identity(), Vec4::repeat(1.0), 0);
        batch.push(instance);
        batch.push(instance);
        batch.buffer = Some(BufferHandle(1));
        batch.mark_uploaded();
        batch.clear();
        batch.push(instance);
        assert!(batch.needs_upload());
    }
}
