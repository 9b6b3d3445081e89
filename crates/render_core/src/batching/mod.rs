//! Draw call batching
//!
//! Submissions sharing a mesh and a [`BatchKey`] are merged into one
//! [`RenderBatch`] and drawn instanced when the batch is large enough and the
//! hardware allows it. Immobile geometry can instead be pre-merged once into
//! a [`StaticBatch`].

mod backend;
mod batch;
mod instance;
mod key;
mod system;

pub use backend::{
    BackendError, BackendResult, BufferHandle, DrawBackend, HeadlessBackend, IndirectDrawCommand, RecordedDraw,
    RenderCapabilities,
};
pub use batch::{RenderBatch, StaticBatch};
pub use instance::InstanceData;
pub use key::BatchKey;
pub use system::{BatchConfig, BatchError, BatchResult, BatchStats, BatchingSystem, DrawStrategy};
