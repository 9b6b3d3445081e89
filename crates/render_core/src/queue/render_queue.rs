//! # Render Queue System
//!
//! Collects the frame's render items, sorts them and hands them to the
//! backend pass by pass.
//!
//! ## Architecture
//!
//! - **RenderQueue**: Owns the frame's items and per-pass buckets
//! - **RenderBucket**: Borrowed view of one (pass, blend mode) group
//! - **SortKeyLayout**: Packs state and depth into a 64-bit key
//!
//! Within a pass, items are grouped by blend mode. Opaque groups sort by
//! ascending key; blended groups sort strictly back to front by distance,
//! ignoring state.

use super::{RenderItem, RenderPass, SortKeyLayout, SortWeights};
use crate::resources::BlendMode;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;

/// Comparator replacing the default order within a pass
pub type CustomSort = Box<dyn Fn(&RenderItem, &RenderItem) -> Ordering + Send + Sync>;

/// Configuration for the [`RenderQueue`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderQueueConfig {
    /// Include shader, material and texture in the key
    pub sort_by_state: bool,
    /// Include depth in the key
    pub sort_by_depth: bool,
    /// Worker queues used by [`ParallelRenderQueue`](super::ParallelRenderQueue)
    pub worker_count: usize,
    /// Per-criterion weights deciding key layout
    pub weights: SortWeights,
}

impl RenderQueueConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self {
            sort_by_state: true,
            sort_by_depth: true,
            worker_count: 4,
            weights: SortWeights::default(),
        }
    }

    /// Builder: set the number of worker queues
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Builder: set sort weights
    #[must_use]
    pub fn with_weights(mut self, weights: SortWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("Worker count must be at least 1".to_string());
        }
        let w = &self.weights;
        if [w.shader, w.material, w.texture, w.depth].iter().any(|v| !(*v >= 0.0)) {
            return Err("Sort weights must be non-negative".to_string());
        }
        Ok(())
    }
}

impl Default for RenderQueueConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics of the last sort
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderQueueStats {
    /// Items submitted this frame
    pub total_items: usize,
    /// Items skipped for lacking the visible flag
    pub hidden_items: usize,
    /// Sorted items per pass, in pass order
    pub items_per_pass: [usize; RenderPass::COUNT],
    /// Sorted opaque items
    pub opaque_items: usize,
    /// Sorted blended items
    pub transparent_items: usize,
    /// Shader, material or texture changes between consecutive items
    pub state_changes: usize,
    /// Time spent sorting (microseconds)
    pub sort_time_us: u64,
}

/// Items of one pass sharing one blend mode, in sorted order
#[derive(Debug, Clone, Copy)]
pub struct RenderBucket<'a> {
    /// Pass of every item
    pub pass: RenderPass,
    /// Blend mode of every item
    pub blend_mode: BlendMode,
    indices: &'a [usize],
    items: &'a [RenderItem],
}

impl<'a> RenderBucket<'a> {
    /// Number of items
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Check if the bucket is empty
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Items in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &'a RenderItem> + 'a {
        let (indices, items) = (self.indices, self.items);
        indices.iter().map(move |&i| &items[i])
    }
}

/// Collection of render items organized for efficient GPU submission
pub struct RenderQueue {
    config: RenderQueueConfig,
    layout: SortKeyLayout,
    items: Vec<RenderItem>,
    passes: [Vec<usize>; RenderPass::COUNT],
    custom_sorts: [Option<CustomSort>; RenderPass::COUNT],
    sorted: bool,
    stats: RenderQueueStats,
}

impl RenderQueue {
    /// Create a new empty render queue
    pub fn new(config: RenderQueueConfig) -> Self {
        Self {
            layout: SortKeyLayout::new(&config.weights, config.sort_by_state, config.sort_by_depth),
            config,
            items: Vec::new(),
            passes: Default::default(),
            custom_sorts: Default::default(),
            sorted: true,
            stats: RenderQueueStats::default(),
        }
    }

    /// Create a render queue with pre-allocated capacity
    pub fn with_capacity(config: RenderQueueConfig, capacity: usize) -> Self {
        let mut queue = Self::new(config);
        queue.items.reserve(capacity);
        queue
    }

    /// Current configuration
    pub fn config(&self) -> &RenderQueueConfig {
        &self.config
    }

    /// Replace the configuration; items are re-sorted before the next execute
    pub fn set_config(&mut self, config: RenderQueueConfig) {
        self.layout = SortKeyLayout::new(&config.weights, config.sort_by_state, config.sort_by_depth);
        self.config = config;
        self.sorted = false;
    }

    /// Key layout in use
    pub fn layout(&self) -> &SortKeyLayout {
        &self.layout
    }

    /// Drop last frame's items
    pub fn begin_frame(&mut self) {
        self.clear();
    }

    /// Clear all items for next frame
    pub fn clear(&mut self) {
        self.items.clear();
        for pass in &mut self.passes {
            pass.clear();
        }
        self.sorted = true;
    }

    /// Add an item
    pub fn submit(&mut self, item: RenderItem) {
        self.items.push(item);
        self.sorted = false;
    }

    /// Move every item of another queue to the end of this one
    pub fn append(&mut self, other: &mut RenderQueue) {
        if other.items.is_empty() {
            return;
        }
        self.items.append(&mut other.items);
        other.clear();
        self.sorted = false;
    }

    /// Replace the order inside each blend group of one pass
    pub fn set_custom_sort<F>(&mut self, pass: RenderPass, compare: F)
    where
        F: Fn(&RenderItem, &RenderItem) -> Ordering + Send + Sync + 'static,
    {
        self.custom_sorts[pass.index()] = Some(Box::new(compare));
        self.sorted = false;
    }

    /// Restore the default order of one pass
    pub fn clear_custom_sort(&mut self, pass: RenderPass) {
        self.custom_sorts[pass.index()] = None;
        self.sorted = false;
    }

    /// Compute keys and order every pass
    pub fn sort(&mut self) {
        let start = Instant::now();
        let max_depth = self
            .items
            .iter()
            .map(|item| item.depth)
            .filter(|d| d.is_finite())
            .fold(0.0f32, f32::max);

        let mut stats = RenderQueueStats {
            total_items: self.items.len(),
            ..RenderQueueStats::default()
        };

        for pass in &mut self.passes {
            pass.clear();
        }
        for (index, item) in self.items.iter_mut().enumerate() {
            if !item.is_visible() {
                stats.hidden_items += 1;
                continue;
            }
            item.sort_key = self.layout.key(item, max_depth);
            self.passes[item.pass.index()].push(index);
        }

        let items = &self.items;
        for pass in RenderPass::ALL {
            let indices = &mut self.passes[pass.index()];
            let custom = self.custom_sorts[pass.index()].as_ref();
            // Stable sort with the submission index as the final tie-break
            indices.sort_by(|&a, &b| {
                let (x, y) = (&items[a], &items[b]);
                x.blend_mode
                    .cmp(&y.blend_mode)
                    .then_with(|| match custom {
                        Some(compare) => compare(x, y),
                        None if x.is_transparent() => y.depth.total_cmp(&x.depth),
                        None => x.sort_key.cmp(&y.sort_key),
                    })
                    .then(a.cmp(&b))
            });

            stats.items_per_pass[pass.index()] = indices.len();
            for &i in indices.iter() {
                if items[i].is_transparent() {
                    stats.transparent_items += 1;
                } else {
                    stats.opaque_items += 1;
                }
            }
            stats.state_changes += indices
                .windows(2)
                .filter(|w| {
                    let (a, b) = (&items[w[0]].material, &items[w[1]].material);
                    a.shader_id != b.shader_id || a.id != b.id || a.texture_id != b.texture_id
                })
                .count();
        }

        stats.sort_time_us = start.elapsed().as_micros() as u64;
        trace!(
            "Sorted {} items ({} opaque, {} transparent) in {}us",
            stats.total_items,
            stats.opaque_items,
            stats.transparent_items,
            stats.sort_time_us
        );
        self.stats = stats;
        self.sorted = true;
    }

    /// Whether items were added since the last sort
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Call `draw` for every item of a pass in sorted order
    ///
    /// Sorts first when items were added since the last sort. Returns the
    /// number of items drawn.
    pub fn execute<F>(&mut self, pass: RenderPass, mut draw: F) -> usize
    where
        F: FnMut(&RenderItem),
    {
        if !self.sorted {
            debug!("Render queue executed before sorting; sorting now");
            self.sort();
        }
        let indices = &self.passes[pass.index()];
        for &i in indices {
            draw(&self.items[i]);
        }
        indices.len()
    }

    /// Walk every pass in execution order
    pub fn execute_all<F>(&mut self, mut draw: F) -> usize
    where
        F: FnMut(RenderPass, &RenderItem),
    {
        RenderPass::ALL
            .iter()
            .map(|&pass| self.execute(pass, |item| draw(pass, item)))
            .sum()
    }

    /// Sorted buckets of one pass, grouped by blend mode
    ///
    /// Empty until the queue has been sorted.
    pub fn buckets(&self, pass: RenderPass) -> Vec<RenderBucket<'_>> {
        if !self.sorted {
            return Vec::new();
        }
        let indices = self.passes[pass.index()].as_slice();
        let mut buckets = Vec::new();
        let mut start = 0;
        while start < indices.len() {
            let blend_mode = self.items[indices[start]].blend_mode;
            let len = indices[start..]
                .iter()
                .take_while(|&&i| self.items[i].blend_mode == blend_mode)
                .count();
            buckets.push(RenderBucket {
                pass,
                blend_mode,
                indices: &indices[start..start + len],
                items: &self.items,
            });
            start += len;
        }
        buckets
    }

    /// Every submitted item in submission order
    pub fn items(&self) -> &[RenderItem] {
        &self.items
    }

    /// Get total number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Statistics of the last sort
    pub fn stats(&self) -> &RenderQueueStats {
        &self.stats
    }
}

impl Default for RenderQueue {
    fn default() -> Self {
        Self::new(RenderQueueConfig::default())
    }
}

impl std::fmt::Debug for RenderQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderQueue")
            .field("config", &self.config)
            .field("items", &self.items.len())
            .field("sorted", &self.sorted)
            .finish()
    }
}
