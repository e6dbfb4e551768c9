//! Error taxonomy for the pipeline, plus a small handler that turns a raw
//! error into a recovery action per the propagation policy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors raised by the VAD chunker.
#[derive(Error, Debug, Clone)]
pub enum ChunkerError {
    #[error("audio source unavailable: {reason}")]
    AudioSourceUnavailable { reason: String },
    #[error("VAD capability failed to initialize: {reason}")]
    VadInitFailure { reason: String },
    #[error("chunk too short ({duration_ms}ms < min_speech_duration), discarded")]
    ChunkTooShort { duration_ms: u64 },
}

/// Errors raised while driving the external capability providers.
#[derive(Error, Debug, Clone)]
pub enum CapabilityError {
    #[error("ASR failed for chunk {chunk_index}: {reason}")]
    AsrFailure { chunk_index: u64, reason: String },
    #[error("embedding extraction failed for segment {segment_index}: {reason}")]
    EmbeddingFailure { segment_index: u64, reason: String },
    #[error("segmenter failed: {reason}")]
    SegmenterFailure { reason: String },
}

/// Errors raised by the job engine.
#[derive(Error, Debug, Clone)]
pub enum JobError {
    #[error("job {job_id} failed during {mode} processing: {reason}")]
    ProcessingFailure {
        job_id: String,
        mode: String,
        reason: String,
    },
    #[error("another job is already processing for this recording")]
    AlreadyProcessing,
    #[error("enrollment {enrollment_id} has no centroid for model {model_id}, skipped")]
    EnrollmentModelMismatch {
        enrollment_id: String,
        model_id: String,
    },
}

/// Errors raised by the recording store.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("recording {0} not found")]
    RecordingNotFound(String),
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::RecordingNotFound("<unknown>".into()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Top-level error covering every subsystem. Invariant violations within the
/// core (non-monotonic chunk index, malformed merge index, etc.) surface as
/// `Invariant` and are always fatal; everything else is locally recoverable
/// per the propagation policy in the error handling design.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error(transparent)]
    Chunker(#[from] ChunkerError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// What the error handler decided should happen in response to an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RecoveryAction {
    /// Drop the affected unit (chunk, segment) and keep the session running.
    Skip,
    /// Fall back to the built-in text-gap segmenter for the current chunk.
    FallbackSegmenter,
    /// Emit the segment with `speaker_id = Unknown`.
    MarkUnknown,
    /// Revert the job under processing back to `unprocessed`.
    RevertJob,
    /// Terminate the session; the error is not locally recoverable.
    Fatal,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub component: String,
    pub message: String,
    pub at_ms: u64,
}

/// Tracks recent failures per component and decides how to recover,
/// mirroring the audio error handler this crate descends from: a bounded
/// history plus per-component counters driving the decision.
pub struct ErrorHandler {
    history: Mutex<VecDeque<ErrorRecord>>,
    counts: DashMap<String, AtomicU32>,
    history_cap: usize,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            counts: DashMap::new(),
            history_cap: 1000,
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Records the error, classifies it into a `RecoveryAction`, and logs at
    /// the appropriate level.
    pub async fn handle(&self, component: &str, error: &PipelineError) -> RecoveryAction {
        self.counts
            .entry(component.to_string())
            .or_insert_with(|| AtomicU32::new(0))
            .fetch_add(1, Ordering::Relaxed);

        {
            let mut history = self.history.lock().await;
            if history.len() >= self.history_cap {
                history.pop_front();
            }
            history.push_back(ErrorRecord {
                component: component.to_string(),
                message: error.to_string(),
                at_ms: now_ms(),
            });
        }

        let action = Self::classify(error);
        match action {
            RecoveryAction::Fatal => log::error!("[{component}] fatal: {error}"),
            _ => log::warn!("[{component}] recovering ({action:?}): {error}"),
        }
        action
    }

    fn classify(error: &PipelineError) -> RecoveryAction {
        match error {
            PipelineError::Chunker(ChunkerError::ChunkTooShort { .. }) => RecoveryAction::Skip,
            PipelineError::Chunker(_) => RecoveryAction::Fatal,
            PipelineError::Capability(CapabilityError::AsrFailure { .. }) => RecoveryAction::Skip,
            PipelineError::Capability(CapabilityError::EmbeddingFailure { .. }) => {
                RecoveryAction::MarkUnknown
            }
            PipelineError::Capability(CapabilityError::SegmenterFailure { .. }) => {
                RecoveryAction::FallbackSegmenter
            }
            PipelineError::Job(_) => RecoveryAction::RevertJob,
            PipelineError::Store(_) => RecoveryAction::Skip,
            PipelineError::Invariant(_) => RecoveryAction::Fatal,
        }
    }

    pub fn failure_count(&self, component: &str) -> u32 {
        self.counts
            .get(component)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub async fn recent_errors(&self, limit: usize) -> Vec<ErrorRecord> {
        let history = self.history.lock().await;
        history.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn classifies_asr_failure_as_skip() {
        let handler = ErrorHandler::new();
        let err = PipelineError::Capability(CapabilityError::AsrFailure {
            chunk_index: 4,
            reason: "timeout".into(),
        });
        assert_eq!(handler.handle("asr", &err).await, RecoveryAction::Skip);
        assert_eq!(handler.failure_count("asr"), 1);
    }

    #[tokio::test]
    async fn classifies_invariant_as_fatal() {
        let handler = ErrorHandler::new();
        let err = PipelineError::Invariant("chunk index went backwards".into());
        assert_eq!(handler.handle("session", &err).await, RecoveryAction::Fatal);
    }

    #[tokio::test]
    async fn history_is_capped() {
        let handler = ErrorHandler {
            history: Mutex::new(VecDeque::new()),
            counts: DashMap::new(),
            history_cap: 3,
        };
        for i in 0..5 {
            let err = PipelineError::Capability(CapabilityError::AsrFailure {
                chunk_index: i,
                reason: "x".into(),
            });
            handler.handle("asr", &err).await;
        }
        assert_eq!(handler.recent_errors(10).await.len(), 3);
    }
}
