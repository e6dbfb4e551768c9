//! Job Engine (spec §4.7): reprocesses a recording under a new, immutable
//! settings snapshot, either by re-embedding and re-clustering the segments
//! already on file ("quick") or by replaying the whole pipeline from the
//! recording's raw chunks ("full"). Only one job may be processing for a
//! given recording at a time.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::JobError;
use crate::types::{AttributedSegment, Job, JobStatus, ParticipantHypothesis};

/// Which reprocessing path a job takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayMode {
    /// Re-run embedding extraction and speaker clustering only; ASR words,
    /// phrase boundaries and sound classification are kept as they are.
    Quick,
    /// Replay the entire pipeline from the recording's stored chunks:
    /// chunking is already fixed (chunks are stored, not audio), but ASR,
    /// assembly, clustering and inference all run again.
    Full,
}

impl std::fmt::Display for ReplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayMode::Quick => write!(f, "quick"),
            ReplayMode::Full => write!(f, "full"),
        }
    }
}

/// Owns every job's lifecycle state and enforces the single-processing-per-
/// recording guard. Running the actual capability calls for a job is the
/// session orchestrator's job; this type only tracks status and holds
/// results.
pub struct JobEngine {
    jobs: HashMap<String, Job>,
    processing_recordings: HashSet<String>,
}

impl JobEngine {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            processing_recordings: HashSet::new(),
        }
    }

    pub fn get(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    pub fn jobs_for_recording<'a>(&'a self, recording_id: &'a str) -> impl Iterator<Item = &'a Job> {
        self.jobs.values().filter(move |j| j.recording_id == recording_id)
    }

    /// Creates a new job with an immutable settings snapshot, `unprocessed`
    /// until `begin_processing` is called.
    pub fn create_job(&mut self, recording_id: String, settings: SessionConfig) -> Job {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            recording_id,
            status: JobStatus::Unprocessed,
            settings,
            segments: Vec::new(),
            participants: Vec::new(),
        };
        self.jobs.insert(job.id.clone(), job.clone());
        job
    }

    /// Transitions a job to `processing`, refusing if another job for the
    /// same recording is already running. `mode` is the caller's choice
    /// (quick re-cluster vs. full pipeline replay); the engine just enforces
    /// the concurrency guard and the status transition.
    pub fn begin_processing(&mut self, job_id: &str, mode: ReplayMode) -> Result<ReplayMode, JobError> {
        let job = self
            .jobs
            .get(job_id)
            .ok_or_else(|| JobError::ProcessingFailure {
                job_id: job_id.to_string(),
                mode: mode.to_string(),
                reason: "job not found".to_string(),
            })?;
        if self.processing_recordings.contains(&job.recording_id) {
            return Err(JobError::AlreadyProcessing);
        }

        let job = self.jobs.get_mut(job_id).unwrap();
        self.processing_recordings.insert(job.recording_id.clone());
        job.status = JobStatus::Processing;
        Ok(mode)
    }

    /// Marks a job `processed` with its resulting segments and participant
    /// list, releasing the per-recording processing guard.
    pub fn complete_processing(
        &mut self,
        job_id: &str,
        segments: Vec<AttributedSegment>,
        participants: Vec<ParticipantHypothesis>,
    ) -> Result<(), JobError> {
        let job = self.jobs.get_mut(job_id).ok_or_else(|| JobError::ProcessingFailure {
            job_id: job_id.to_string(),
            mode: "unknown".to_string(),
            reason: "job not found".to_string(),
        })?;
        job.status = JobStatus::Processed;
        job.segments = segments;
        job.participants = participants;
        self.processing_recordings.remove(&job.recording_id);
        Ok(())
    }

    /// Reverts a job back to `unprocessed` on failure, per the
    /// `RevertJob` recovery action.
    pub fn fail_processing(&mut self, job_id: &str) {
        if let Some(job) = self.jobs.get_mut(job_id) {
            job.status = JobStatus::Unprocessed;
            self.processing_recordings.remove(&job.recording_id);
        }
    }

    pub fn is_processing(&self, recording_id: &str) -> bool {
        self.processing_recordings.contains(recording_id)
    }
}

impl Default for JobEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_job_per_recording_processes_at_once() {
        let mut engine = JobEngine::new();
        let job_a = engine.create_job("rec-1".into(), SessionConfig::default());
        let job_b = engine.create_job("rec-1".into(), SessionConfig::default());

        engine.begin_processing(&job_a.id, ReplayMode::Quick).unwrap();
        let err = engine.begin_processing(&job_b.id, ReplayMode::Quick).unwrap_err();
        assert!(matches!(err, JobError::AlreadyProcessing));
    }

    #[test]
    fn failed_processing_reverts_to_unprocessed_and_releases_guard() {
        let mut engine = JobEngine::new();
        let job = engine.create_job("rec-1".into(), SessionConfig::default());
        engine.begin_processing(&job.id, ReplayMode::Full).unwrap();
        engine.fail_processing(&job.id);

        assert_eq!(engine.get(&job.id).unwrap().status, JobStatus::Unprocessed);
        assert!(!engine.is_processing("rec-1"));

        // guard released, a new attempt can proceed
        engine.begin_processing(&job.id, ReplayMode::Full).unwrap();
    }

    #[test]
    fn completing_a_job_stores_results_and_releases_guard() {
        let mut engine = JobEngine::new();
        let job = engine.create_job("rec-1".into(), SessionConfig::default());
        engine.begin_processing(&job.id, ReplayMode::Quick).unwrap();
        engine.complete_processing(&job.id, Vec::new(), Vec::new()).unwrap();

        assert_eq!(engine.get(&job.id).unwrap().status, JobStatus::Processed);
        assert!(!engine.is_processing("rec-1"));
    }
}
