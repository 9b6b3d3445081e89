//! Render queue: per-pass buckets ordered by 64-bit sort keys

mod item;
mod parallel;
mod render_queue;
mod sort_key;

pub use item::{RenderItem, RenderItemFlags, RenderPass};
pub use parallel::ParallelRenderQueue;
pub use render_queue::{CustomSort, RenderBucket, RenderQueue, RenderQueueConfig, RenderQueueStats};
pub use sort_key::{quantize_depth, SortCriterion, SortKeyLayout, SortWeights};
