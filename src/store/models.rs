//! Row shapes for the recording store, kept separate from the in-memory
//! domain types (`types.rs`) since the DB encodes chunk PCM as a BLOB and
//! job settings/segments as JSON TEXT columns.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{Chunk, JobStatus};

#[derive(Debug, Clone, FromRow)]
pub struct RecordingRow {
    pub id: String,
    pub title: String,
    pub sample_rate: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
    pub id: i64,
    pub recording_id: String,
    pub chunk_index: i64,
    pub samples: Vec<u8>,
    pub overlap_duration: f64,
    pub raw_duration: f64,
    pub is_final: i64,
    pub wall_time_ms: i64,
}

impl ChunkRow {
    /// Encodes PCM samples as little-endian `f32` bytes for the BLOB column.
    pub fn encode_samples(samples: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples.len() * 4);
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    pub fn decode_samples(&self) -> Vec<f32> {
        self.samples
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    pub fn into_chunk(self) -> Chunk {
        Chunk {
            index: self.chunk_index as u64,
            samples: self.decode_samples(),
            overlap_duration: self.overlap_duration as f32,
            raw_duration: self.raw_duration as f32,
            is_final: self.is_final != 0,
            wall_time_ms: self.wall_time_ms as u64,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: String,
    pub recording_id: String,
    pub status: String,
    pub settings_json: String,
    pub segments_json: String,
    pub participants_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Live => "live",
        JobStatus::Unprocessed => "unprocessed",
        JobStatus::Processing => "processing",
        JobStatus::Processed => "processed",
    }
}

pub fn status_from_str(s: &str) -> JobStatus {
    match s {
        "live" => JobStatus::Live,
        "processing" => JobStatus::Processing,
        "processed" => JobStatus::Processed,
        _ => JobStatus::Unprocessed,
    }
}
