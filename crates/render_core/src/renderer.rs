//! # Frame Renderer
//!
//! Ties culling, the render queue and batching into one per-frame call.
//!
//! ```text
//! Culler::cull ──▶ RenderQueue (sort by pass, key, depth) ──▶ BatchingSystem::flush ──▶ DrawBackend
//! ```
//!
//! Drawables are registered once and keep the id handed out by the culler.
//! Each frame only the visible ones reach the queue and the backend. Opaque
//! items are regrouped into batches; blended items are drawn one by one in
//! the queue's back-to-front order, after all opaque geometry.

use crate::batching::{BatchResult, BatchStats, BatchingSystem, DrawBackend};
use crate::camera::Camera;
use crate::config::RenderCoreConfig;
use crate::culling::{Culler, CullingStats};
use crate::foundation::math::{Mat4, Vec4};
use crate::queue::{RenderItem, RenderQueue, RenderQueueStats};
use crate::resources::{Material, Mesh};
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Combined statistics of one [`FrameRenderer::render_frame`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Culling results
    pub culling: CullingStats,
    /// Sorting results
    pub queue: RenderQueueStats,
    /// Draw submission results
    pub batching: BatchStats,
    /// Wall time of the whole frame (microseconds)
    pub frame_time_us: u64,
}

#[derive(Debug, Clone)]
struct Drawable {
    mesh: Arc<Mesh>,
    material: Material,
    transform: Mat4,
    color: Vec4,
}

/// Owns the per-frame subsystems and the drawables they operate on
pub struct FrameRenderer {
    culler: Culler,
    queue: RenderQueue,
    batching: BatchingSystem,
    drawables: HashMap<u32, Drawable>,
    last_stats: FrameStats,
}

impl FrameRenderer {
    /// Create a renderer from validated settings
    pub fn new(config: RenderCoreConfig) -> Self {
        let RenderCoreConfig {
            culling,
            batching,
            queue,
        } = config;
        Self {
            culler: Culler::new(culling),
            queue: RenderQueue::new(queue),
            batching: BatchingSystem::new(batching),
            drawables: HashMap::new(),
            last_stats: FrameStats::default(),
        }
    }

    /// Register a drawable and return its id
    ///
    /// World bounds are the mesh bounds moved by `transform`.
    pub fn add_drawable(&mut self, mesh: Arc<Mesh>, material: Material, transform: Mat4) -> u32 {
        let bounds = mesh.bounds.transform(&transform);
        let id = self.culler.register_object(bounds, 0);
        self.drawables.insert(
            id,
            Drawable {
                mesh,
                material,
                transform,
                color: Vec4::repeat(1.0),
            },
        );
        id
    }

    /// Move a drawable; returns false for unknown ids
    pub fn update_transform(&mut self, id: u32, transform: Mat4) -> bool {
        let Some(drawable) = self.drawables.get_mut(&id) else {
            return false;
        };
        drawable.transform = transform;
        self.culler
            .update_object_bounds(id, drawable.mesh.bounds.transform(&transform));
        true
    }

    /// Change the per-instance color of a drawable
    pub fn set_color(&mut self, id: u32, color: Vec4) -> bool {
        match self.drawables.get_mut(&id) {
            Some(drawable) => {
                drawable.color = color;
                true
            }
            None => false,
        }
    }

    /// Forget a drawable; its id may be handed out again
    pub fn remove_drawable(&mut self, id: u32) -> bool {
        if self.drawables.remove(&id).is_none() {
            return false;
        }
        self.culler.remove_object(id);
        true
    }

    /// Number of registered drawables
    pub fn drawable_count(&self) -> usize {
        self.drawables.len()
    }

    /// Cull, sort and draw one frame
    pub fn render_frame(&mut self, camera: &Camera, backend: &mut dyn DrawBackend) -> BatchResult<FrameStats> {
        let start = Instant::now();
        let Self {
            culler,
            queue,
            batching,
            drawables,
            ..
        } = self;

        culler.begin_frame(camera);
        let visible = culler.cull();
        culler.end_frame();

        queue.begin_frame();
        for id in visible {
            let (Some(drawable), Some(object)) = (drawables.get(&id), culler.object(id)) else {
                continue;
            };
            queue.submit(
                RenderItem::new(drawable.mesh.id, drawable.material, drawable.transform, id)
                    .with_depth(object.distance)
                    .with_screen_size(object.screen_size)
                    .with_lod(object.lod_level),
            );
        }
        queue.sort();

        batching.begin_frame();
        queue.execute_all(|_, item| {
            let Some(drawable) = drawables.get(&item.object_id) else {
                return;
            };
            let (mesh, material) = (Some(&drawable.mesh), Some(&item.material));
            // Blended items keep the queue's back-to-front order
            if item.is_transparent() {
                batching.submit_ordered(mesh, material, &item.transform, item.object_id, drawable.color);
            } else {
                batching.submit(mesh, material, &item.transform, item.object_id, drawable.color);
            }
        });
        batching.flush(backend, &camera.view_projection_matrix())?;

        let stats = FrameStats {
            culling: culler.stats().clone(),
            queue: queue.stats().clone(),
            batching: batching.stats().clone(),
            frame_time_us: start.elapsed().as_micros() as u64,
        };
        trace!(
            "Frame {}: {} visible, {} draws in {}us",
            stats.culling.frame_index,
            stats.culling.visible_objects,
            stats.batching.draw_calls,
            stats.frame_time_us
        );
        self.last_stats = stats.clone();
        Ok(stats)
    }

    /// Statistics of the last successful frame
    pub fn last_stats(&self) -> &FrameStats {
        &self.last_stats
    }

    /// Release every GPU buffer held by batching
    pub fn shutdown(&mut self, backend: &mut dyn DrawBackend) {
        debug!("Shutting down frame renderer with {} drawables", self.drawables.len());
        self.batching.shutdown(backend);
    }

    /// Culling subsystem
    pub fn culler(&self) -> &Culler {
        &self.culler
    }

    /// Culling subsystem, for depth buffer updates and configuration
    pub fn culler_mut(&mut self) -> &mut Culler {
        &mut self.culler
    }

    /// Batching subsystem
    pub fn batching(&self) -> &BatchingSystem {
        &self.batching
    }

    /// Batching subsystem, for static batches and configuration
    pub fn batching_mut(&mut self) -> &mut BatchingSystem {
        &mut self.batching
    }

    /// Render queue of the last frame
    pub fn queue(&self) -> &RenderQueue {
        &self.queue
    }

    /// Render queue, for custom pass sorts
    pub fn queue_mut(&mut self) -> &mut RenderQueue {
        &mut self.queue
    }
}

impl Default for FrameRenderer {
    fn default() -> Self {
        Self::new(RenderCoreConfig::default())
    }
}
