//! # Batching System
//!
//! Groups per-object submissions by mesh and [`BatchKey`] and issues them as
//! the fewest draw calls the hardware allows.
//!
//! ## Frame Flow
//!
//! ```text
//! begin_frame -> submit * N -> flush(backend, view_projection)
//! ```
//!
//! Batches large enough are drawn instanced; the rest fall back to one draw
//! per instance. Static batches are merged once and drawn every flush until
//! removed.
//!
//! Flush order: opaque dynamic batches, opaque static batches, blended
//! dynamic batches, blended static batches, then ordered submissions exactly
//! as they were submitted. Blended geometry that has to stay back to front
//! goes through [`BatchingSystem::submit_ordered`].

use super::{
    BackendError, BatchKey, BufferHandle, DrawBackend, IndirectDrawCommand, InstanceData, RenderBatch,
    RenderCapabilities, StaticBatch,
};
use crate::foundation::math::{Mat4, Vec4};
use crate::resources::{Material, Mesh, MeshId};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Mesh ids of merged static meshes start here
const STATIC_MESH_ID_BASE: u32 = 0x8000_0000;

/// Result type for batching operations
pub type BatchResult<T> = Result<T, BatchError>;

/// Errors that can occur during batching
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// No meshes were given
    #[error("Static batch needs at least one mesh")]
    EmptyInput,

    /// Input slices differ in length
    #[error("Mismatched static batch input: {meshes} meshes, {materials} materials, {transforms} transforms")]
    MismatchedLengths {
        /// Number of meshes
        meshes: usize,
        /// Number of materials
        materials: usize,
        /// Number of transforms
        transforms: usize,
    },

    /// Merged mesh would be too large
    #[error("Static batch vertex limit exceeded: {count} > {max}")]
    VertexLimitExceeded {
        /// Merged vertex count
        count: usize,
        /// Configured maximum
        max: usize,
    },

    /// No static batch lives at this index
    #[error("Invalid static batch index: {0}")]
    InvalidStaticBatch(usize),

    /// The backend failed
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Configuration for the [`BatchingSystem`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Accept submissions at all
    pub enabled: bool,
    /// Most instances drawn by one instanced call
    pub max_batch_size: usize,
    /// Smallest batch drawn instanced
    pub min_instances_for_batching: usize,
    /// Use instancing when the hardware supports it
    pub use_instanced_rendering: bool,
    /// Keep instance buffers mapped across frames when supported
    pub use_persistent_mapping: bool,
    /// Issue instanced batches as indirect draws when supported
    pub use_indirect_rendering: bool,
    /// Largest merged vertex count of a static batch
    pub max_vertices_per_static_batch: usize,
}

impl BatchConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self {
            enabled: true,
            max_batch_size: 1024,
            min_instances_for_batching: 4,
            use_instanced_rendering: true,
            use_persistent_mapping: true,
            use_indirect_rendering: false,
            max_vertices_per_static_batch: 65_536,
        }
    }

    /// Builder: set the instancing threshold
    #[must_use]
    pub fn with_min_instances(mut self, min_instances: usize) -> Self {
        self.min_instances_for_batching = min_instances;
        self
    }

    /// Builder: set the largest instanced draw
    #[must_use]
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Builder: set the static batch vertex limit
    #[must_use]
    pub fn with_max_static_vertices(mut self, max_vertices: usize) -> Self {
        self.max_vertices_per_static_batch = max_vertices;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_size == 0 {
            return Err("Max batch size must be at least 1".to_string());
        }
        if self.max_vertices_per_static_batch == 0 {
            return Err("Static batch vertex limit must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// How batches are turned into draw calls, chosen once at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawStrategy {
    /// Instanced draws for batches over the threshold
    Instanced {
        /// Instance buffers stay mapped
        persistent_mapping: bool,
        /// Draw through indirect commands
        indirect: bool,
    },
    /// One draw per instance
    PerInstance,
}

/// Statistics for batch rendering performance monitoring
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStats {
    /// Draw calls issued by the last flush
    pub draw_calls: usize,
    /// Non-empty dynamic batches
    pub batch_count: usize,
    /// Dynamic instances drawn
    pub instance_count: usize,
    /// Instanced or indirect draws
    pub instanced_draws: usize,
    /// Per-instance draws
    pub single_draws: usize,
    /// Static batch draws
    pub static_draws: usize,
    /// Pipeline state binds
    pub state_changes: usize,
    /// Instance buffers rewritten
    pub buffer_uploads: usize,
    /// Instance buffers left untouched because nothing changed
    pub skipped_uploads: usize,
    /// Time spent in flush (microseconds)
    pub submission_time_us: u64,
}

impl BatchStats {
    /// Calculate average instances per batch
    pub fn avg_instances_per_batch(&self) -> f32 {
        if self.batch_count == 0 {
            0.0
        } else {
            self.instance_count as f32 / self.batch_count as f32
        }
    }

    /// Draw calls avoided compared to one draw per instance
    pub fn draw_calls_saved(&self) -> usize {
        (self.instance_count + self.static_draws).saturating_sub(self.draw_calls)
    }
}

/// One draw kept in submission order
#[derive(Debug, Clone)]
struct OrderedDraw {
    mesh: Arc<Mesh>,
    key: BatchKey,
    instance: InstanceData,
}

/// Groups submissions into batches and issues them through a [`DrawBackend`]
pub struct BatchingSystem {
    config: BatchConfig,
    capabilities: Option<RenderCapabilities>,
    strategy: DrawStrategy,
    batches: HashMap<(MeshId, BatchKey), RenderBatch>,
    ordered: Vec<OrderedDraw>,
    static_batches: Vec<Option<StaticBatch>>,
    free_static_slots: Vec<usize>,
    pending_releases: Vec<BufferHandle>,
    submitted: usize,
    stats: BatchStats,
}

impl BatchingSystem {
    /// Create a batching system; capabilities are probed by `initialize`
    pub fn new(config: BatchConfig) -> Self {
        if let Err(reason) = config.validate() {
            warn!("Batch config is questionable: {}", reason);
        }
        Self {
            config,
            capabilities: None,
            strategy: DrawStrategy::PerInstance,
            batches: HashMap::new(),
            ordered: Vec::new(),
            static_batches: Vec::new(),
            free_static_slots: Vec::new(),
            pending_releases: Vec::new(),
            submitted: 0,
            stats: BatchStats::default(),
        }
    }

    /// Probe hardware capabilities and pick the draw strategy
    ///
    /// Missing features degrade to the next-best path; this never fails.
    pub fn initialize(&mut self, capabilities: RenderCapabilities) -> DrawStrategy {
        self.capabilities = Some(capabilities);
        self.strategy = self.choose_strategy(capabilities);
        info!("Batching initialized with {:?}", self.strategy);
        self.strategy
    }

    fn choose_strategy(&self, capabilities: RenderCapabilities) -> DrawStrategy {
        if !self.config.use_instanced_rendering {
            return DrawStrategy::PerInstance;
        }
        if !capabilities.instancing {
            warn!("Hardware instancing unavailable; drawing one call per instance");
            return DrawStrategy::PerInstance;
        }
        if self.config.use_persistent_mapping && !capabilities.persistent_mapping {
            info!("Persistent mapping unavailable; using standard buffer updates");
        }
        if self.config.use_indirect_rendering && !capabilities.indirect_draw {
            info!("Indirect draws unavailable; using direct instanced draws");
        }
        DrawStrategy::Instanced {
            persistent_mapping: self.config.use_persistent_mapping && capabilities.persistent_mapping,
            indirect: self.config.use_indirect_rendering && capabilities.indirect_draw,
        }
    }

    /// Whether `initialize` has run
    pub fn is_initialized(&self) -> bool {
        self.capabilities.is_some()
    }

    /// Strategy in effect
    pub fn strategy(&self) -> DrawStrategy {
        self.strategy
    }

    /// Current configuration
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Replace the configuration, re-deriving the strategy if initialized
    pub fn set_config(&mut self, config: BatchConfig) {
        if let Err(reason) = config.validate() {
            warn!("Batch config is questionable: {}", reason);
        }
        self.config = config;
        if let Some(capabilities) = self.capabilities {
            self.strategy = self.choose_strategy(capabilities);
        }
    }

    /// Clear every batch's instances, keeping the batches themselves
    pub fn begin_frame(&mut self) {
        for batch in self.batches.values_mut() {
            batch.clear();
        }
        self.ordered.clear();
        self.submitted = 0;
    }

    /// Queue one object for drawing
    ///
    /// Missing mesh or material, or a disabled system, make this a no-op.
    pub fn submit(
        &mut self,
        mesh: Option<&Arc<Mesh>>,
        material: Option<&Material>,
        transform: &Mat4,
        object_id: u32,
        color: Vec4,
    ) {
        if !self.config.enabled {
            return;
        }
        let (Some(mesh), Some(material)) = (mesh, material) else {
            trace!("Ignoring submission of object {} without mesh or material", object_id);
            return;
        };

        let key = BatchKey::from_material(material);
        self.batches
            .entry((mesh.id, key))
            .or_insert_with(|| RenderBatch::new(key, Arc::clone(mesh)))
            .push(InstanceData::new(transform, color, object_id));
        self.submitted += 1;
    }

    /// Queue one object to be drawn on its own after every batch
    ///
    /// Ordered submissions are never regrouped: they reach the backend in
    /// the order they were made, which keeps back-to-front blending intact.
    /// Same no-op rules as [`submit`](Self::submit).
    pub fn submit_ordered(
        &mut self,
        mesh: Option<&Arc<Mesh>>,
        material: Option<&Material>,
        transform: &Mat4,
        object_id: u32,
        color: Vec4,
    ) {
        if !self.config.enabled {
            return;
        }
        let (Some(mesh), Some(material)) = (mesh, material) else {
            trace!("Ignoring ordered submission of object {} without mesh or material", object_id);
            return;
        };
        self.ordered.push(OrderedDraw {
            mesh: Arc::clone(mesh),
            key: BatchKey::from_material(material),
            instance: InstanceData::new(transform, color, object_id),
        });
        self.submitted += 1;
    }

    /// Number of submissions since `begin_frame`
    pub fn submitted_count(&self) -> usize {
        self.submitted
    }

    /// Batch of a mesh and key, if one exists
    pub fn batch(&self, mesh: MeshId, key: &BatchKey) -> Option<&RenderBatch> {
        self.batches.get(&(mesh, *key))
    }

    /// Number of batches kept, including ones empty this frame
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Issue every batch and visible static batch
    ///
    /// Opaque dynamic and static batches go before blended ones; within a
    /// phase batches are ordered by shader and texture so equal state is
    /// bound once. Ordered submissions are drawn last.
    pub fn flush(&mut self, backend: &mut dyn DrawBackend, view_projection: &Mat4) -> BatchResult<()> {
        let start = Instant::now();
        if self.capabilities.is_none() {
            self.initialize(backend.capabilities());
        }

        for buffer in self.pending_releases.drain(..) {
            backend.release_buffer(buffer);
        }
        backend.set_view_projection(view_projection);

        let mut strategy = self.strategy;
        let mut stats = BatchStats::default();
        let result = self.draw_all(backend, &mut strategy, &mut stats);

        self.strategy = strategy;
        stats.submission_time_us = start.elapsed().as_micros() as u64;
        trace!(
            "Flushed {} instances in {} batches with {} draw calls",
            stats.instance_count,
            stats.batch_count,
            stats.draw_calls
        );
        self.stats = stats;
        result
    }

    fn draw_all(
        &mut self,
        backend: &mut dyn DrawBackend,
        strategy: &mut DrawStrategy,
        stats: &mut BatchStats,
    ) -> BatchResult<()> {
        let mut bound: Option<BatchKey> = None;

        let mut dynamic: Vec<(MeshId, BatchKey)> = self
            .batches
            .iter()
            .filter(|(_, batch)| !batch.is_empty())
            .map(|(key, _)| *key)
            .collect();
        dynamic.sort_by(|a, b| a.1.flush_order(&b.1).then(a.0.cmp(&b.0)));

        let mut statics: Vec<(BatchKey, usize)> = self
            .static_batches
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().filter(|b| b.visible).map(|b| (b.key, i)))
            .collect();
        statics.sort_by(|a, b| a.0.flush_order(&b.0).then(a.1.cmp(&b.1)));

        // Everything opaque lands before anything blended
        for transparent in [false, true] {
            for map_key in dynamic.iter().filter(|(_, key)| key.transparent == transparent) {
                self.draw_batch(backend, map_key, strategy, stats, &mut bound)?;
            }
            for &(key, index) in statics.iter().filter(|(key, _)| key.transparent == transparent) {
                self.draw_static_batch(backend, key, index, stats, &mut bound)?;
            }
        }

        for draw in &self.ordered {
            bind(backend, &draw.key, &mut bound, stats);
            backend.draw_single(&draw.mesh, &draw.instance)?;
            stats.instance_count += 1;
            stats.draw_calls += 1;
            stats.single_draws += 1;
        }
        Ok(())
    }

    fn draw_batch(
        &mut self,
        backend: &mut dyn DrawBackend,
        map_key: &(MeshId, BatchKey),
        strategy: &mut DrawStrategy,
        stats: &mut BatchStats,
        bound: &mut Option<BatchKey>,
    ) -> BatchResult<()> {
        let chunk_size = self.chunk_size();
        let min_instances = self.config.min_instances_for_batching;
        let Some(batch) = self.batches.get_mut(map_key) else {
            return Ok(());
        };
        bind(backend, &map_key.1, bound, stats);
        stats.batch_count += 1;
        stats.instance_count += batch.len();

        match *strategy {
            DrawStrategy::Instanced { .. } if batch.len() >= min_instances => {
                draw_instanced(backend, batch, strategy, chunk_size, stats)
            }
            _ => {
                for instance in batch.instances() {
                    backend.draw_single(batch.mesh(), instance)?;
                    stats.draw_calls += 1;
                    stats.single_draws += 1;
                }
                Ok(())
            }
        }
    }

    fn draw_static_batch(
        &mut self,
        backend: &mut dyn DrawBackend,
        key: BatchKey,
        index: usize,
        stats: &mut BatchStats,
        bound: &mut Option<BatchKey>,
    ) -> BatchResult<()> {
        let Some(batch) = self.static_batches.get_mut(index).and_then(Option::as_mut) else {
            return Ok(());
        };
        let handle = match batch.gpu_mesh {
            Some(handle) => handle,
            None => {
                let handle = backend.upload_mesh(&batch.mesh)?;
                batch.gpu_mesh = Some(handle);
                handle
            }
        };
        bind(backend, &key, bound, stats);
        backend.draw_static(handle, batch.mesh.index_count() as u32, &batch.transform)?;
        stats.draw_calls += 1;
        stats.static_draws += 1;
        Ok(())
    }

    fn chunk_size(&self) -> usize {
        let hardware = self
            .capabilities
            .map_or(usize::MAX, |c| c.max_instances_per_draw.max(1) as usize);
        self.config.max_batch_size.max(1).min(hardware)
    }

    /// Statistics of the last flush
    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Merge meshes into one static batch and return its index
    ///
    /// Each mesh is moved by its transform at merge time. The first material
    /// is used for the whole batch. On failure nothing changes.
    pub fn create_static_batch(
        &mut self,
        meshes: &[&Mesh],
        materials: &[Material],
        transforms: &[Mat4],
    ) -> BatchResult<usize> {
        let result = self.validate_static_input(meshes, materials, transforms);
        if let Err(error) = &result {
            warn!("Rejected static batch: {}", error);
        }
        result?;

        let index = self.free_static_slots.pop().unwrap_or(self.static_batches.len());
        let mesh = Mesh::merged(
            MeshId(STATIC_MESH_ID_BASE + index as u32),
            meshes.iter().copied().zip(transforms),
        );
        debug!(
            "Static batch {} created: {} meshes, {} vertices, {} indices",
            index,
            meshes.len(),
            mesh.vertex_count(),
            mesh.index_count()
        );
        let batch = StaticBatch::new(mesh, materials[0]);

        if index == self.static_batches.len() {
            self.static_batches.push(Some(batch));
        } else {
            self.static_batches[index] = Some(batch);
        }
        Ok(index)
    }

    fn validate_static_input(&self, meshes: &[&Mesh], materials: &[Material], transforms: &[Mat4]) -> BatchResult<()> {
        if meshes.is_empty() {
            return Err(BatchError::EmptyInput);
        }
        if meshes.len() != materials.len() || meshes.len() != transforms.len() {
            return Err(BatchError::MismatchedLengths {
                meshes: meshes.len(),
                materials: materials.len(),
                transforms: transforms.len(),
            });
        }
        let count: usize = meshes.iter().map(|m| m.vertex_count()).sum();
        if count > self.config.max_vertices_per_static_batch {
            return Err(BatchError::VertexLimitExceeded {
                count,
                max: self.config.max_vertices_per_static_batch,
            });
        }
        Ok(())
    }

    /// Remove a static batch, freeing its slot for reuse
    ///
    /// The GPU mesh is released on the next flush. Unknown indices are
    /// ignored and return `false`.
    pub fn remove_static_batch(&mut self, index: usize) -> bool {
        let Some(batch) = self.static_batches.get_mut(index).and_then(Option::take) else {
            return false;
        };
        if let Some(handle) = batch.gpu_mesh {
            self.pending_releases.push(handle);
        }
        self.free_static_slots.push(index);
        debug!("Static batch {} removed", index);
        true
    }

    /// Show or hide a static batch
    pub fn set_static_batch_visible(&mut self, index: usize, visible: bool) -> BatchResult<()> {
        self.static_batch_mut(index)?.visible = visible;
        Ok(())
    }

    /// Replace the world transform of a static batch
    pub fn set_static_batch_transform(&mut self, index: usize, transform: Mat4) -> BatchResult<()> {
        self.static_batch_mut(index)?.transform = transform;
        Ok(())
    }

    fn static_batch_mut(&mut self, index: usize) -> BatchResult<&mut StaticBatch> {
        self.static_batches
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(BatchError::InvalidStaticBatch(index))
    }

    /// Static batch at an index
    pub fn static_batch(&self, index: usize) -> Option<&StaticBatch> {
        self.static_batches.get(index).and_then(Option::as_ref)
    }

    /// Number of live static batches
    pub fn static_batch_count(&self) -> usize {
        self.static_batches.iter().filter(|b| b.is_some()).count()
    }

    /// Release every GPU buffer and forget all batches
    pub fn shutdown(&mut self, backend: &mut dyn DrawBackend) {
        for buffer in self.pending_releases.drain(..) {
            backend.release_buffer(buffer);
        }
        for batch in self.batches.drain().map(|(_, b)| b) {
            if let Some(buffer) = batch.buffer {
                backend.release_buffer(buffer);
            }
        }
        for batch in self.static_batches.drain(..).flatten() {
            if let Some(buffer) = batch.gpu_mesh {
                backend.release_buffer(buffer);
            }
        }
        self.free_static_slots.clear();
    }
}

impl Default for BatchingSystem {
    fn default() -> Self {
        Self::new(BatchConfig::default())
    }
}

fn bind(backend: &mut dyn DrawBackend, key: &BatchKey, bound: &mut Option<BatchKey>, stats: &mut BatchStats) {
    if *bound != Some(*key) {
        backend.bind_state(key);
        stats.state_changes += 1;
        *bound = Some(*key);
    }
}

fn draw_instanced(
    backend: &mut dyn DrawBackend,
    batch: &mut RenderBatch,
    strategy: &mut DrawStrategy,
    chunk_size: usize,
    stats: &mut BatchStats,
) -> BatchResult<()> {
    let DrawStrategy::Instanced { persistent_mapping, indirect } = *strategy else {
        return Ok(());
    };

    if batch.buffer.is_none() || batch.buffer_capacity < batch.len() {
        if let Some(old) = batch.buffer.take() {
            backend.release_buffer(old);
        }
        let capacity = batch.len().next_power_of_two();
        let handle = match backend.create_instance_buffer(capacity, persistent_mapping) {
            Ok(handle) => handle,
            Err(BackendError::Mapping(reason)) if persistent_mapping => {
                warn!("Persistent mapping failed ({}); using standard buffer updates", reason);
                *strategy = DrawStrategy::Instanced {
                    persistent_mapping: false,
                    indirect,
                };
                backend.create_instance_buffer(capacity, false)?
            }
            Err(error) => return Err(error.into()),
        };
        batch.buffer = Some(handle);
        batch.buffer_capacity = capacity;
        batch.invalidate_upload();
    }

    let Some(buffer) = batch.buffer else {
        return Ok(());
    };
    if batch.needs_upload() {
        backend.upload_instances(buffer, bytemuck::cast_slice(batch.instances()))?;
        batch.mark_uploaded();
        stats.buffer_uploads += 1;
    } else {
        stats.skipped_uploads += 1;
    }

    let total = batch.len();
    for first in (0..total).step_by(chunk_size) {
        let count = chunk_size.min(total - first) as u32;
        if indirect {
            let command = IndirectDrawCommand {
                index_count: batch.mesh().index_count() as u32,
                instance_count: count,
                first_index: 0,
                vertex_offset: 0,
                first_instance: first as u32,
            };
            backend.draw_indirect(batch.mesh(), buffer, &command)?;
        } else {
            backend.draw_instanced(batch.mesh(), buffer, first as u32, count)?;
        }
        stats.draw_calls += 1;
        stats.instanced_draws += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::{HeadlessBackend, RecordedDraw};
    use crate::foundation::math::Vec3;
    use crate::resources::test_support::strip_mesh;
    use crate::resources::BlendMode;

    fn submit_many(system: &mut BatchingSystem, mesh: &Arc<Mesh>, material: &Material, count: u32) {
        for i in 0..count {
            let transform = Mat4::new_translation(&Vec3::new(i as f32, 0.0, 0.0));
            system.submit(Some(mesh), Some(material), &transform, i, Vec4::repeat(1.0));
        }
    }

    #[test]
    fn test_enough_instances_draw_once() {
        let mut system = BatchingSystem::new(BatchConfig::default().with_min_instances(4));
        let mut backend = HeadlessBackend::new();
        let mesh = Arc::new(strip_mesh(1, 4));
        let material = Material::new(1, 1);

        system.begin_frame();
        submit_many(&mut system, &mesh, &material, 10);
        system.flush(&mut backend, &Mat4::identity()).unwrap();

        assert_eq!(backend.draw_count(), 1);
        assert_eq!(system.stats().draw_calls, 1);
        assert_eq!(system.stats().instance_count, 10);
        assert_eq!(system.stats().draw_calls_saved(), 9);
        assert!(matches!(backend.draws[0], RecordedDraw::Instanced { count: 10, .. }));
    }

    #[test]
    fn test_few_instances_draw_individually() {
        let mut system = BatchingSystem::new(BatchConfig::default().with_min_instances(4));
        let mut backend = HeadlessBackend::new();
        let mesh = Arc::new(strip_mesh(1, 4));
        let material = Material::new(1, 1);

        system.begin_frame();
        submit_many(&mut system, &mesh, &material, 3);
        system.flush(&mut backend, &Mat4::identity()).unwrap();

        assert_eq!(backend.draw_count(), 3);
        assert_eq!(system.stats().single_draws, 3);
    }

    #[test]
    fn test_without_instancing_every_instance_is_drawn() {
        let mut system = BatchingSystem::default();
        let mut backend = HeadlessBackend::with_capabilities(RenderCapabilities::minimal());
        let mesh = Arc::new(strip_mesh(1, 4));
        let material = Material::new(1, 1);

        system.begin_frame();
        submit_many(&mut system, &mesh, &material, 20);
        system.flush(&mut backend, &Mat4::identity()).unwrap();

        assert_eq!(system.strategy(), DrawStrategy::PerInstance);
        assert_eq!(backend.draw_count(), 20);
    }

    #[test]
    fn test_missing_inputs_are_ignored() {
        let mut system = BatchingSystem::default();
        let mesh = Arc::new(strip_mesh(1, 4));
        let material = Material::new(1, 1);
        system.submit(None, Some(&material), &Mat4::identity(), 0, Vec4::repeat(1.0));
        system.submit(Some(&mesh), None, &Mat4::identity(), 0, Vec4::repeat(1.0));
        assert_eq!(system.submitted_count(), 0);

        system.set_config(BatchConfig {
            enabled: false,
            ..BatchConfig::default()
        });
        system.submit(Some(&mesh), Some(&material), &Mat4::identity(), 0, Vec4::repeat(1.0));
        assert_eq!(system.submitted_count(), 0);
    }

    #[test]
    fn test_flush_order_minimizes_state_changes() {
        let mut system = BatchingSystem::new(BatchConfig::default().with_min_instances(1));
        let mut backend = HeadlessBackend::new();
        let glass = Material::new(1, 1).with_blend_mode(BlendMode::AlphaBlend);
        let rock = Material::new(2, 5).with_texture(2);
        let dirt = Material::new(3, 5).with_texture(1);
        let mesh_a = Arc::new(strip_mesh(1, 4));
        let mesh_b = Arc::new(strip_mesh(2, 4));

        system.begin_frame();
        for material in [&glass, &rock, &dirt] {
            for mesh in [&mesh_a, &mesh_b] {
                system.submit(Some(mesh), Some(material), &Mat4::identity(), 0, Vec4::repeat(1.0));
            }
        }
        system.flush(&mut backend, &Mat4::identity()).unwrap();

        let expected: Vec<BatchKey> = [&dirt, &rock, &glass].iter().map(|m| BatchKey::from(*m)).collect();
        assert_eq!(backend.binds, expected);
        assert_eq!(system.stats().state_changes, 3);
        assert_eq!(system.stats().batch_count, 6);
    }

    #[test]
    fn test_large_batches_are_split() {
        let config = BatchConfig::default().with_min_instances(1).with_max_batch_size(4);
        let mut system = BatchingSystem::new(config);
        let mut backend = HeadlessBackend::new();
        let mesh = Arc::new(strip_mesh(1, 4));

        system.begin_frame();
        submit_many(&mut system, &mesh, &Material::new(1, 1), 10);
        system.flush(&mut backend, &Mat4::identity()).unwrap();

        let counts: Vec<(u32, u32)> = backend
            .draws
            .iter()
            .filter_map(|d| match d {
                RecordedDraw::Instanced { first_instance, count, .. } => Some((*first_instance, *count)),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![(0, 4), (4, 4), (8, 2)]);
    }

    #[test]
    fn test_unchanged_instances_are_not_reuploaded() {
        let mut system = BatchingSystem::default();
        let mut backend = HeadlessBackend::new();
        let mesh = Arc::new(strip_mesh(1, 4));
        let material = Material::new(1, 1);

        for _ in 0..2 {
            system.begin_frame();
            submit_many(&mut system, &mesh, &material, 8);
            system.flush(&mut backend, &Mat4::identity()).unwrap();
        }
        assert_eq!(backend.instance_uploads, 1);
        assert_eq!(system.stats().skipped_uploads, 1);

        system.begin_frame();
        submit_many(&mut system, &mesh, &material, 9);
        system.flush(&mut backend, &Mat4::identity()).unwrap();
        assert_eq!(backend.instance_uploads, 2);
    }

    #[test]
    fn test_persistent_mapping_failure_degrades() {
        let mut system = BatchingSystem::default();
        let mut backend = HeadlessBackend::new().refusing_persistent_mapping();
        let mesh = Arc::new(strip_mesh(1, 4));

        system.begin_frame();
        submit_many(&mut system, &mesh, &Material::new(1, 1), 8);
        system.flush(&mut backend, &Mat4::identity()).unwrap();

        assert_eq!(backend.draw_count(), 1);
        assert_eq!(
            system.strategy(),
            DrawStrategy::Instanced {
                persistent_mapping: false,
                indirect: false
            }
        );
    }

    #[test]
    fn test_indirect_draws() {
        let config = BatchConfig {
            use_indirect_rendering: true,
            ..BatchConfig::default()
        };
        let mut system = BatchingSystem::new(config);
        let mut backend = HeadlessBackend::new();
        let mesh = Arc::new(strip_mesh(1, 5));

        system.begin_frame();
        submit_many(&mut system, &mesh, &Material::new(1, 1), 6);
        system.flush(&mut backend, &Mat4::identity()).unwrap();

        match &backend.draws[..] {
            [RecordedDraw::Indirect { command, .. }] => {
                assert_eq!(command.instance_count, 6);
                assert_eq!(command.index_count, 9);
            }
            other => panic!("unexpected draws: {:?}", other),
        }
    }

    #[test]
    fn test_static_batch_lifecycle() {
        let mut system = BatchingSystem::new(BatchConfig::default().with_max_static_vertices(1000));
        let meshes = [strip_mesh(1, 100), strip_mesh(2, 150), strip_mesh(3, 200)];
        let refs: Vec<&Mesh> = meshes.iter().collect();
        let materials = [Material::new(1, 1); 3];
        let transforms = [Mat4::identity(); 3];

        let index = system.create_static_batch(&refs, &materials, &transforms).unwrap();
        assert_eq!(system.static_batch(index).map(|b| b.mesh.vertex_count()), Some(450));

        assert!(system.remove_static_batch(index));
        assert!(!system.remove_static_batch(index));
        assert_eq!(system.create_static_batch(&refs, &materials, &transforms).unwrap(), index);
    }

    #[test]
    fn test_static_batch_slots_are_reused_lifo() {
        let mut system = BatchingSystem::default();
        let mesh = strip_mesh(1, 3);
        let make = |system: &mut BatchingSystem| {
            system
                .create_static_batch(&[&mesh], &[Material::new(1, 1)], &[Mat4::identity()])
                .unwrap()
        };
        let a = make(&mut system);
        let b = make(&mut system);
        let c = make(&mut system);
        system.remove_static_batch(a);
        system.remove_static_batch(c);
        assert_eq!(make(&mut system), c);
        assert_eq!(make(&mut system), a);
        assert_ne!(a, b);
        assert_eq!(system.static_batch_count(), 3);
    }

    #[test]
    fn test_static_batch_rejects_bad_input() {
        let mut system = BatchingSystem::new(BatchConfig::default().with_max_static_vertices(100));
        let mesh = strip_mesh(1, 60);
        let material = Material::new(1, 1);

        assert!(matches!(
            system.create_static_batch(&[], &[], &[]),
            Err(BatchError::EmptyInput)
        ));
        assert!(matches!(
            system.create_static_batch(&[&mesh], &[material, material], &[Mat4::identity()]),
            Err(BatchError::MismatchedLengths { meshes: 1, materials: 2, transforms: 1 })
        ));
        assert!(matches!(
            system.create_static_batch(&[&mesh, &mesh], &[material; 2], &[Mat4::identity(); 2]),
            Err(BatchError::VertexLimitExceeded { count: 120, max: 100 })
        ));
        assert_eq!(system.static_batch_count(), 0);
    }

    #[test]
    fn test_static_batches_draw_and_release_on_next_flush() {
        let mut system = BatchingSystem::default();
        let mut backend = HeadlessBackend::new();
        let mesh = strip_mesh(1, 4);
        let index = system
            .create_static_batch(&[&mesh], &[Material::new(1, 1)], &[Mat4::identity()])
            .unwrap();

        system.begin_frame();
        system.flush(&mut backend, &Mat4::identity()).unwrap();
        assert_eq!(system.stats().static_draws, 1);
        assert_eq!(backend.mesh_uploads, 1);

        system.set_static_batch_visible(index, false).unwrap();
        backend.clear_frame();
        system.flush(&mut backend, &Mat4::identity()).unwrap();
        assert_eq!(backend.draw_count(), 0);

        system.remove_static_batch(index);
        assert!(backend.released.is_empty());
        system.flush(&mut backend, &Mat4::identity()).unwrap();
        assert_eq!(backend.released.len(), 1);
        assert_eq!(backend.live_buffer_count(), 0);
        assert!(matches!(
            system.set_static_batch_transform(index, Mat4::identity()),
            Err(BatchError::InvalidStaticBatch(_))
        ));
    }

    #[test]
    fn test_opaque_static_precedes_blended_dynamic() {
        let mut system = BatchingSystem::default();
        let mut backend = HeadlessBackend::new();
        let wall = strip_mesh(1, 4);
        let pane = Arc::new(strip_mesh(2, 4));
        let glass = Material::new(2, 1).with_blend_mode(BlendMode::AlphaBlend);
        system
            .create_static_batch(&[&wall], &[Material::new(1, 9)], &[Mat4::identity()])
            .unwrap();

        system.begin_frame();
        system.submit(Some(&pane), Some(&glass), &Mat4::identity(), 7, Vec4::repeat(1.0));
        system.flush(&mut backend, &Mat4::identity()).unwrap();

        assert_eq!(backend.draw_count(), 2);
        assert!(matches!(backend.draws[0], RecordedDraw::Static { .. }));
        assert_eq!(backend.draws[1], RecordedDraw::Single { mesh: MeshId(2), object_id: 7 });
    }

    #[test]
    fn test_ordered_submissions_keep_submission_order() {
        let mut system = BatchingSystem::new(BatchConfig::default().with_min_instances(1));
        let mut backend = HeadlessBackend::new();
        let pane = Arc::new(strip_mesh(2, 4));
        let rock = Arc::new(strip_mesh(1, 4));
        let far_glass = Material::new(2, 9).with_blend_mode(BlendMode::AlphaBlend);
        let near_glass = Material::new(3, 1).with_blend_mode(BlendMode::AlphaBlend);

        system.begin_frame();
        system.submit_ordered(Some(&pane), Some(&far_glass), &Mat4::identity(), 0, Vec4::repeat(1.0));
        system.submit_ordered(Some(&pane), Some(&near_glass), &Mat4::identity(), 1, Vec4::repeat(1.0));
        system.submit(Some(&rock), Some(&Material::new(1, 5)), &Mat4::identity(), 2, Vec4::repeat(1.0));
        system.submit_ordered(None, Some(&near_glass), &Mat4::identity(), 3, Vec4::repeat(1.0));
        assert_eq!(system.submitted_count(), 3);
        system.flush(&mut backend, &Mat4::identity()).unwrap();

        assert_eq!(backend.draw_count(), 3);
        assert!(matches!(backend.draws[0], RecordedDraw::Instanced { count: 1, .. }));
        assert_eq!(
            backend.draws[1..],
            [
                RecordedDraw::Single { mesh: MeshId(2), object_id: 0 },
                RecordedDraw::Single { mesh: MeshId(2), object_id: 1 },
            ]
        );
        assert_eq!(system.stats().instance_count, 3);

        system.begin_frame();
        backend.clear_frame();
        system.flush(&mut backend, &Mat4::identity()).unwrap();
        assert_eq!(backend.draw_count(), 0);
    }
}
