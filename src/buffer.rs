//! Bounded FIFO queue backing the chunk queue between the VAD chunker and
//! the processor task (spec §5). Adapted from the grounding repo's adaptive
//! audio buffer, configured so it never drops entries: depth beyond the
//! soft limit is only ever reported, never discarded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,
}

/// A FIFO queue with a soft capacity: `push` always succeeds (chunks are
/// never dropped, per spec §5 backpressure semantics) but `depth()` can be
/// compared against `soft_limit` to decide whether to surface backpressure
/// to observers via `chunk_queue_update`.
pub struct ChunkQueue<T> {
    items: Mutex<VecDeque<T>>,
    soft_limit: usize,
    high_water: AtomicUsize,
}

impl<T> ChunkQueue<T> {
    pub fn new(soft_limit: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            soft_limit,
            high_water: AtomicUsize::new(0),
        }
    }

    pub async fn push(&self, item: T) -> usize {
        let mut items = self.items.lock().await;
        items.push_back(item);
        let depth = items.len();
        self.high_water.fetch_max(depth, Ordering::Relaxed);
        depth
    }

    pub async fn pop(&self) -> Option<T> {
        self.items.lock().await.pop_front()
    }

    pub async fn depth(&self) -> usize {
        self.items.lock().await.len()
    }

    pub fn soft_limit(&self) -> usize {
        self.soft_limit
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    pub async fn is_over_soft_limit(&self) -> bool {
        self.depth().await > self.soft_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_ordering_preserved() {
        let q: ChunkQueue<u32> = ChunkQueue::new(2);
        q.push(1).await;
        q.push(2).await;
        q.push(3).await;
        assert_eq!(q.pop().await, Some(1));
        assert_eq!(q.pop().await, Some(2));
        assert_eq!(q.pop().await, Some(3));
        assert_eq!(q.pop().await, None);
    }

    #[tokio::test]
    async fn never_drops_past_soft_limit() {
        let q: ChunkQueue<u32> = ChunkQueue::new(1);
        for i in 0..10 {
            q.push(i).await;
        }
        assert_eq!(q.depth().await, 10);
        assert!(q.is_over_soft_limit().await);
    }
}
