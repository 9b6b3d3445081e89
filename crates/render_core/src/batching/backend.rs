//! Backend abstraction for issuing batched draws
//!
//! The batching system decides what to draw and in which order; a
//! [`DrawBackend`] owns the graphics API and turns those decisions into GPU
//! work. [`HeadlessBackend`] records everything instead, for tests and tools.

use super::{BatchKey, InstanceData};
use crate::foundation::math::Mat4;
use crate::resources::{Mesh, MeshId};

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors a backend reports back to batching
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// GPU buffer could not be created
    #[error("Buffer creation failed: {0}")]
    BufferCreation(String),

    /// Data could not be written to a buffer
    #[error("Buffer upload failed: {0}")]
    Upload(String),

    /// Persistent mapping was requested but refused
    #[error("Persistent mapping failed: {0}")]
    Mapping(String),

    /// Draw submission failed
    #[error("Draw failed: {0}")]
    Draw(String),
}

/// Hardware features relevant to batching, probed once at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderCapabilities {
    /// Per-instance vertex attributes with a divisor
    pub instancing: bool,
    /// Indirect draw commands read from a buffer
    pub indirect_draw: bool,
    /// Buffers that stay mapped across frames
    pub persistent_mapping: bool,
    /// Largest instance count accepted by one draw
    pub max_instances_per_draw: u32,
}

impl RenderCapabilities {
    /// Capabilities of a device without instancing
    pub fn minimal() -> Self {
        Self {
            instancing: false,
            indirect_draw: false,
            persistent_mapping: false,
            max_instances_per_draw: 1,
        }
    }
}

impl Default for RenderCapabilities {
    fn default() -> Self {
        Self {
            instancing: true,
            indirect_draw: true,
            persistent_mapping: true,
            max_instances_per_draw: 65_536,
        }
    }
}

/// Opaque handle of a GPU buffer owned by batching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

/// Indirect draw arguments
///
/// Matches the layout of `VkDrawIndexedIndirectCommand`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IndirectDrawCommand {
    /// Number of indices to draw
    pub index_count: u32,
    /// Number of instances to draw
    pub instance_count: u32,
    /// First index in the index buffer
    pub first_index: u32,
    /// Value added to each index
    pub vertex_offset: i32,
    /// First instance in the instance buffer
    pub first_instance: u32,
}

/// Graphics backend consumed by [`BatchingSystem`](super::BatchingSystem)
pub trait DrawBackend {
    /// Report hardware features
    fn capabilities(&self) -> RenderCapabilities;

    /// Create a buffer for `capacity` instances
    ///
    /// With `persistent` the buffer stays mapped; backends that cannot do so
    /// return [`BackendError::Mapping`].
    fn create_instance_buffer(&mut self, capacity: usize, persistent: bool) -> BackendResult<BufferHandle>;

    /// Replace the contents of an instance buffer
    ///
    /// Non-persistent buffers are orphaned before the write.
    fn upload_instances(&mut self, buffer: BufferHandle, instances: &[u8]) -> BackendResult<()>;

    /// Upload vertex and index data of a merged mesh
    fn upload_mesh(&mut self, mesh: &Mesh) -> BackendResult<BufferHandle>;

    /// Free a buffer created by this backend
    fn release_buffer(&mut self, buffer: BufferHandle);

    /// Set the camera for the following draws
    fn set_view_projection(&mut self, view_projection: &Mat4);

    /// Bind the pipeline state of a batch
    fn bind_state(&mut self, key: &BatchKey);

    /// Draw `count` instances starting at `first_instance` of an instance buffer
    fn draw_instanced(&mut self, mesh: &Mesh, instances: BufferHandle, first_instance: u32, count: u32) -> BackendResult<()>;

    /// Draw instances described by an indirect command
    fn draw_indirect(&mut self, mesh: &Mesh, instances: BufferHandle, command: &IndirectDrawCommand) -> BackendResult<()>;

    /// Draw one instance with per-draw uniforms
    fn draw_single(&mut self, mesh: &Mesh, instance: &InstanceData) -> BackendResult<()>;

    /// Draw an uploaded static mesh
    fn draw_static(&mut self, mesh: BufferHandle, index_count: u32, transform: &Mat4) -> BackendResult<()>;
}

/// One draw recorded by [`HeadlessBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedDraw {
    /// Instanced draw
    Instanced {
        /// Mesh drawn
        mesh: MeshId,
        /// Instance buffer
        buffer: BufferHandle,
        /// First instance
        first_instance: u32,
        /// Instance count
        count: u32,
    },
    /// Indirect draw
    Indirect {
        /// Mesh drawn
        mesh: MeshId,
        /// Draw arguments
        command: IndirectDrawCommand,
    },
    /// Single-instance draw
    Single {
        /// Mesh drawn
        mesh: MeshId,
        /// Object id of the instance
        object_id: u32,
    },
    /// Static batch draw
    Static {
        /// Uploaded mesh buffer
        buffer: BufferHandle,
        /// Index count
        index_count: u32,
    },
}

/// Backend that records calls instead of talking to a GPU
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    capabilities: RenderCapabilities,
    refuse_persistent_mapping: bool,
    next_buffer: u32,
    live_buffers: std::collections::HashSet<BufferHandle>,
    /// Every draw in submission order
    pub draws: Vec<RecordedDraw>,
    /// Every state bind in submission order
    pub binds: Vec<BatchKey>,
    /// Instance buffer uploads
    pub instance_uploads: usize,
    /// Mesh uploads
    pub mesh_uploads: usize,
    /// Buffers released
    pub released: Vec<BufferHandle>,
}

impl HeadlessBackend {
    /// Backend reporting full capabilities
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend reporting the given capabilities
    pub fn with_capabilities(capabilities: RenderCapabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    /// Advertise persistent mapping but fail every attempt to use it
    #[must_use]
    pub fn refusing_persistent_mapping(mut self) -> Self {
        self.refuse_persistent_mapping = true;
        self
    }

    /// Number of recorded draws
    pub fn draw_count(&self) -> usize {
        self.draws.len()
    }

    /// Number of buffers created and not yet released
    pub fn live_buffer_count(&self) -> usize {
        self.live_buffers.len()
    }

    /// Forget recorded draws and binds, keeping buffers
    pub fn clear_frame(&mut self) {
        self.draws.clear();
        self.binds.clear();
        self.instance_uploads = 0;
        self.mesh_uploads = 0;
    }

    fn allocate(&mut self) -> BufferHandle {
        self.next_buffer += 1;
        let handle = BufferHandle(self.next_buffer);
        self.live_buffers.insert(handle);
        handle
    }

    fn check_live(&self, buffer: BufferHandle) -> BackendResult<()> {
        if self.live_buffers.contains(&buffer) {
            Ok(())
        } else {
            Err(BackendError::Draw(format!("unknown buffer {:?}", buffer)))
        }
    }
}

impl DrawBackend for HeadlessBackend {
    fn capabilities(&self) -> RenderCapabilities {
        self.capabilities
    }

    fn create_instance_buffer(&mut self, capacity: usize, persistent: bool) -> BackendResult<BufferHandle> {
        if persistent && (self.refuse_persistent_mapping || !self.capabilities.persistent_mapping) {
            return Err(BackendError::Mapping(format!("cannot map {} instances persistently", capacity)));
        }
        Ok(self.allocate())
    }

    fn upload_instances(&mut self, buffer: BufferHandle, instances: &[u8]) -> BackendResult<()> {
        self.check_live(buffer)
            .map_err(|_| BackendError::Upload(format!("{} bytes to unknown buffer", instances.len())))?;
        self.instance_uploads += 1;
        Ok(())
    }

    fn upload_mesh(&mut self, _mesh: &Mesh) -> BackendResult<BufferHandle> {
        self.mesh_uploads += 1;
        Ok(self.allocate())
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        if self.live_buffers.remove(&buffer) {
            self.released.push(buffer);
        }
    }

    fn set_view_projection(&mut self, _view_projection: &Mat4) {}

    fn bind_state(&mut self, key: &BatchKey) {
        self.binds.push(*key);
    }

    fn draw_instanced(&mut self, mesh: &Mesh, instances: BufferHandle, first_instance: u32, count: u32) -> BackendResult<()> {
        self.check_live(instances)?;
        self.draws.push(RecordedDraw::Instanced {
            mesh: mesh.id,
            buffer: instances,
            first_instance,
            count,
        });
        Ok(())
    }

    fn draw_indirect(&mut self, mesh: &Mesh, instances: BufferHandle, command: &IndirectDrawCommand) -> BackendResult<()> {
        self.check_live(instances)?;
        self.draws.push(RecordedDraw::Indirect {
            mesh: mesh.id,
            command: *command,
        });
        Ok(())
    }

    fn draw_single(&mut self, mesh: &Mesh, instance: &InstanceData) -> BackendResult<()> {
        self.draws.push(RecordedDraw::Single {
            mesh: mesh.id,
            object_id: instance.object_id,
        });
        Ok(())
    }

    fn draw_static(&mut self, mesh: BufferHandle, index_count: u32, _transform: &Mat4) -> BackendResult<()> {
        self.check_live(mesh)?;
        self.draws.push(RecordedDraw::Static {
            buffer: mesh,
            index_count,
        });
        Ok(())
    }
}
