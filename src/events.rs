//! The emitted event stream (spec §6), carried as a broadcast channel of one
//! tagged enum, mirroring the `ContextManagerEvent` shape this crate
//! descends from.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::job::ReplayMode;
use crate::types::AttributedSegment;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum SessionEvent {
    ChunkQueueUpdate {
        depth: usize,
        processing: bool,
    },
    SegmentCommitted {
        segment: Box<AttributedSegment>,
    },
    SegmentsReattributed {
        indices: Vec<usize>,
    },
    HypothesisChanged {
        version: u64,
        participants: Vec<String>,
        added: Vec<String>,
        removed: Vec<String>,
    },
    JobProcessingProgress {
        job_id: String,
        current: usize,
        total: usize,
        mode: ReplayMode,
    },
    Error {
        component: String,
        message: String,
    },
}

/// Thin wrapper around a `broadcast::Sender` so callers don't need to reach
/// into `tokio::sync` directly; a send with no subscribers is not an error
/// (there may be nobody listening yet).
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
