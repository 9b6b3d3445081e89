//! Per-thread render queues merged before sorting
//!
//! Each worker fills its own [`RenderQueue`] without locking. Merging
//! appends worker queues in worker order, so the merged submission order
//! (and therefore tie-breaking in the sort) does not depend on thread timing.

use super::{RenderItem, RenderQueue, RenderQueueConfig};
use log::trace;
use rayon::prelude::*;

/// Set of worker queues feeding one main queue
#[derive(Debug)]
pub struct ParallelRenderQueue {
    config: RenderQueueConfig,
    workers: Vec<RenderQueue>,
}

impl ParallelRenderQueue {
    /// Create `config.worker_count` worker queues, at least one
    pub fn new(config: RenderQueueConfig) -> Self {
        let count = config.worker_count.max(1);
        let workers = (0..count).map(|_| RenderQueue::new(config.clone())).collect();
        Self { config, workers }
    }

    /// Number of worker queues
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Worker queues, for callers that run their own threads
    pub fn worker_queues_mut(&mut self) -> &mut [RenderQueue] {
        &mut self.workers
    }

    /// Submit directly to one worker's queue
    ///
    /// Out-of-range workers wrap around.
    pub fn submit(&mut self, worker: usize, item: RenderItem) {
        let index = worker % self.workers.len();
        self.workers[index].submit(item);
    }

    /// Split `inputs` into contiguous chunks, one per worker, and call
    /// `produce` for each input on the rayon pool
    pub fn submit_parallel<T, F>(&mut self, inputs: &[T], produce: F)
    where
        T: Sync,
        F: Fn(&T, &mut RenderQueue) + Sync,
    {
        if inputs.is_empty() {
            return;
        }
        let chunk_size = inputs.len().div_ceil(self.workers.len());
        self.workers
            .par_iter_mut()
            .zip(inputs.par_chunks(chunk_size))
            .for_each(|(queue, chunk)| {
                for input in chunk {
                    produce(input, queue);
                }
            });
    }

    /// Total items held by the workers
    pub fn len(&self) -> usize {
        self.workers.iter().map(RenderQueue::len).sum()
    }

    /// Check if every worker queue is empty
    pub fn is_empty(&self) -> bool {
        self.workers.iter().all(RenderQueue::is_empty)
    }

    /// Move every worker's items into `target`, worker 0 first
    pub fn merge_into(&mut self, target: &mut RenderQueue) {
        let merged = self.len();
        for worker in &mut self.workers {
            target.append(worker);
        }
        trace!("Merged {} items from {} worker queues", merged, self.workers.len());
    }

    /// Merge into a fresh queue using this set's configuration
    pub fn merge(&mut self) -> RenderQueue {
        let mut queue = RenderQueue::with_capacity(self.config.clone(), self.len());
        self.merge_into(&mut queue);
        queue
    }

    /// Empty every worker queue
    pub fn clear(&mut self) {
        for worker in &mut self.workers {
            worker.clear();
        }
    }
}
