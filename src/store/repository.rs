//! Recording + job persistence, grounded on the repository-per-aggregate
//! shape this crate descends from: static async functions taking a pool (or
//! an open transaction), cascading deletes wrapped in an explicit
//! begin/commit/rollback.

use chrono::Utc;
use sqlx::{Connection, SqlitePool};
use tracing::{error, info};

use crate::error::StoreError;
use crate::types::{AttributedSegment, Chunk, Job, JobStatus, ParticipantHypothesis};

use super::models::{status_from_str, status_to_str, ChunkRow, JobRow, RecordingRow};

pub struct RecordingRepository;

impl RecordingRepository {
    pub async fn create(pool: &SqlitePool, id: &str, title: &str, sample_rate: u32) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query("INSERT INTO recordings (id, title, sample_rate, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
            .bind(id)
            .bind(title)
            .bind(sample_rate as i64)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn get(pool: &SqlitePool, recording_id: &str) -> Result<RecordingRow, StoreError> {
        sqlx::query_as::<_, RecordingRow>("SELECT * FROM recordings WHERE id = ?")
            .bind(recording_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| StoreError::RecordingNotFound(recording_id.to_string()))
    }

    pub async fn append_chunk(pool: &SqlitePool, recording_id: &str, chunk: &Chunk) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO chunks (recording_id, chunk_index, samples, overlap_duration, raw_duration, is_final, wall_time_ms) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(recording_id)
        .bind(chunk.index as i64)
        .bind(ChunkRow::encode_samples(&chunk.samples))
        .bind(chunk.overlap_duration as f64)
        .bind(chunk.raw_duration as f64)
        .bind(chunk.is_final as i64)
        .bind(chunk.wall_time_ms as i64)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn chunks(pool: &SqlitePool, recording_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT * FROM chunks WHERE recording_id = ? ORDER BY chunk_index ASC",
        )
        .bind(recording_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(ChunkRow::into_chunk).collect())
    }

    /// Deletes a recording and every job/chunk that references it, in one
    /// transaction: jobs first, then chunks, then the recording row itself.
    pub async fn delete(pool: &SqlitePool, recording_id: &str) -> Result<bool, StoreError> {
        let mut conn = pool.acquire().await.map_err(StoreError::from)?;
        let mut tx = conn.begin().await.map_err(StoreError::from)?;

        let result: Result<bool, sqlx::Error> = async {
            sqlx::query("DELETE FROM jobs WHERE recording_id = ?")
                .bind(recording_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunks WHERE recording_id = ?")
                .bind(recording_id)
                .execute(&mut *tx)
                .await?;
            let deleted = sqlx::query("DELETE FROM recordings WHERE id = ?")
                .bind(recording_id)
                .execute(&mut *tx)
                .await?;
            Ok(deleted.rows_affected() > 0)
        }
        .await;

        match result {
            Ok(did_delete) => {
                tx.commit().await.map_err(StoreError::from)?;
                info!("deleted recording {} (existed: {})", recording_id, did_delete);
                Ok(did_delete)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                error!("failed to delete recording {}: {}", recording_id, e);
                Err(StoreError::from(e))
            }
        }
    }
}

pub struct JobRepository;

impl JobRepository {
    pub async fn upsert(pool: &SqlitePool, job: &Job) -> Result<(), StoreError> {
        let now = Utc::now();
        let settings_json = serde_json::to_string(&job.settings).map_err(|e| StoreError::Backend(e.to_string()))?;
        let segments_json = serde_json::to_string(&job.segments).map_err(|e| StoreError::Backend(e.to_string()))?;
        let participants_json =
            serde_json::to_string(&job.participants).map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(
            "INSERT INTO jobs (id, recording_id, status, settings_json, segments_json, participants_json, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, settings_json = excluded.settings_json, \
             segments_json = excluded.segments_json, participants_json = excluded.participants_json, updated_at = excluded.updated_at",
        )
        .bind(&job.id)
        .bind(&job.recording_id)
        .bind(status_to_str(job.status))
        .bind(settings_json)
        .bind(segments_json)
        .bind(participants_json)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get(pool: &SqlitePool, job_id: &str) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        Self::row_to_job(row)
    }

    pub async fn for_recording(pool: &SqlitePool, recording_id: &str) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE recording_id = ?")
            .bind(recording_id)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(Self::row_to_job).collect()
    }

    fn row_to_job(row: JobRow) -> Result<Job, StoreError> {
        let settings = serde_json::from_str(&row.settings_json).map_err(|e| StoreError::Backend(e.to_string()))?;
        let segments: Vec<AttributedSegment> =
            serde_json::from_str(&row.segments_json).map_err(|e| StoreError::Backend(e.to_string()))?;
        let participants: Vec<ParticipantHypothesis> =
            serde_json::from_str(&row.participants_json).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Job {
            id: row.id,
            recording_id: row.recording_id,
            status: status_from_str(&row.status),
            settings,
            segments,
            participants,
        })
    }
}

#[allow(dead_code)]
fn status_roundtrip_is_total(status: JobStatus) -> bool {
    status_from_str(status_to_str(status)) == status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_encoding_roundtrips() {
        for status in [
            JobStatus::Live,
            JobStatus::Unprocessed,
            JobStatus::Processing,
            JobStatus::Processed,
        ] {
            assert!(status_roundtrip_is_total(status));
        }
    }
}
