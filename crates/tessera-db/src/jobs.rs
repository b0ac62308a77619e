//! Ingestion job queue repository (PostgreSQL).

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use tessera_core::{
    new_v7, CreateJobRequest, Error, IngestionJob, JobProgress, JobRepository, JobSpecificData,
    JobStatus, JobType, QueueStats, Result, UpdateJobRequest,
};

const JOB_COLUMNS: &str = "id, job_type, source_identifier, original_file_name, status, priority, \
     attempts, last_attempt_at, next_attempt_at, progress, error_info, failed_stage, \
     job_specific_data, related_object_id, created_at, updated_at, completed_at";

/// Guard clause keeping terminal rows immutable. Retention cleanup is the
/// only writer allowed to touch them, and it only deletes.
const NOT_TERMINAL: &str = "status NOT IN ('completed', 'failed', 'cancelled')";

/// PostgreSQL implementation of [`JobRepository`].
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse a job row. Unknown enum strings mean a corrupt row and fail
    /// the read; malformed JSON columns degrade to `None` (logged).
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<IngestionJob> {
        let job_type_str: String = row.get("job_type");
        let job_type = JobType::parse(&job_type_str)
            .ok_or_else(|| Error::Serialization(format!("unknown job_type: {job_type_str}")))?;

        let status_str: String = row.get("status");
        let status = JobStatus::parse(&status_str)
            .ok_or_else(|| Error::Serialization(format!("unknown job status: {status_str}")))?;

        let progress: Option<JsonValue> = row.get("progress");
        let job_specific_data: Option<JsonValue> = row.get("job_specific_data");

        Ok(IngestionJob {
            id: row.get("id"),
            job_type,
            source_identifier: row.get("source_identifier"),
            original_file_name: row.get("original_file_name"),
            status,
            priority: row.get("priority"),
            attempts: row.get("attempts"),
            last_attempt_at: row.get("last_attempt_at"),
            next_attempt_at: row.get("next_attempt_at"),
            progress: JobProgress::from_value(progress.as_ref()),
            error_info: row.get("error_info"),
            failed_stage: row.get("failed_stage"),
            job_specific_data: JobSpecificData::from_value(job_specific_data.as_ref()),
            related_object_id: row.get("related_object_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create(&self, req: CreateJobRequest) -> Result<IngestionJob> {
        let id = new_v7();
        let now = Utc::now();
        let priority = req
            .priority
            .unwrap_or_else(|| req.job_type.default_priority());
        let job_specific_data = req
            .job_specific_data
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            "INSERT INTO ingestion_jobs \
             (id, job_type, source_identifier, original_file_name, status, priority, attempts, \
              job_specific_data, related_object_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 'queued', $5, 0, $6, $7, $8, $8)",
        )
        .bind(id)
        .bind(req.job_type.as_str())
        .bind(&req.source_identifier)
        .bind(&req.original_file_name)
        .bind(priority)
        .bind(&job_specific_data)
        .bind(req.related_object_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        // Read the row back so callers get exactly what was persisted.
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {id} after insert")))
    }

    async fn get(&self, id: Uuid) -> Result<Option<IngestionJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn get_next_jobs(&self, limit: i64, job_types: &[JobType]) -> Result<Vec<IngestionJob>> {
        let now_ms = Utc::now().timestamp_millis();
        let type_strings: Vec<String> = job_types
            .iter()
            .map(|jt| jt.as_str().to_string())
            .collect();

        // Due = freshly queued, or retry-pending whose backoff has elapsed.
        // Empty type array = any type.
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs \
             WHERE (status = 'queued' \
                    OR (status = 'retry_pending' AND next_attempt_at <= $1)) \
               AND (cardinality($2::text[]) = 0 OR job_type = ANY($2)) \
             ORDER BY priority DESC, created_at ASC \
             LIMIT $3",
        ))
        .bind(now_ms)
        .bind(&type_strings)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn update(&self, id: Uuid, req: UpdateJobRequest) -> Result<bool> {
        let mut sets: Vec<String> = vec!["updated_at = $1".to_string()];
        let mut param_idx = 2;

        macro_rules! add_set {
            ($field:expr, $col:expr) => {
                if $field.is_some() {
                    sets.push(format!("{} = ${}", $col, param_idx));
                    param_idx += 1;
                }
            };
        }
        add_set!(req.status, "status");
        add_set!(req.priority, "priority");
        add_set!(req.progress, "progress");
        add_set!(req.error_info, "error_info");
        add_set!(req.failed_stage, "failed_stage");
        add_set!(req.next_attempt_at, "next_attempt_at");
        add_set!(req.related_object_id, "related_object_id");

        let query = format!(
            "UPDATE ingestion_jobs SET {} WHERE id = ${} AND {}",
            sets.join(", "),
            param_idx,
            NOT_TERMINAL
        );

        let mut q = sqlx::query(&query).bind(Utc::now());
        if let Some(status) = req.status {
            q = q.bind(status.as_str());
        }
        if let Some(priority) = req.priority {
            q = q.bind(priority);
        }
        if let Some(progress) = &req.progress {
            q = q.bind(serde_json::to_value(progress)?);
        }
        if let Some(error_info) = &req.error_info {
            q = q.bind(error_info);
        }
        if let Some(failed_stage) = &req.failed_stage {
            q = q.bind(failed_stage);
        }
        if let Some(next_attempt_at) = req.next_attempt_at {
            q = q.bind(next_attempt_at);
        }
        if let Some(related_object_id) = req.related_object_id {
            q = q.bind(related_object_id);
        }
        q = q.bind(id);

        let result = q.execute(&self.pool).await.map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_as_started(&self, id: Uuid) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(&format!(
            "UPDATE ingestion_jobs \
             SET status = 'processing_source', last_attempt_at = $1, \
                 attempts = attempts + 1, updated_at = $1 \
             WHERE id = $2 AND {NOT_TERMINAL}"
        ))
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(id));
        }
        Ok(())
    }

    async fn mark_as_completed(&self, id: Uuid, related_object_id: Option<Uuid>) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(&format!(
            "UPDATE ingestion_jobs \
             SET status = 'completed', completed_at = $1, updated_at = $1, \
                 related_object_id = COALESCE($2, related_object_id) \
             WHERE id = $3 AND {NOT_TERMINAL}"
        ))
        .bind(now)
        .bind(related_object_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(id));
        }
        Ok(())
    }

    async fn mark_as_retryable(
        &self,
        id: Uuid,
        error_info: &str,
        failed_stage: &str,
        delay_ms: i64,
    ) -> Result<()> {
        let now = Utc::now();
        let next_attempt_at = now.timestamp_millis() + delay_ms;

        debug!(
            subsystem = "db",
            component = "jobs",
            op = "mark_as_retryable",
            job_id = %id,
            failed_stage,
            delay_ms,
            "Scheduling job retry"
        );

        let result = sqlx::query(&format!(
            "UPDATE ingestion_jobs \
             SET status = 'retry_pending', next_attempt_at = $1, error_info = $2, \
                 failed_stage = $3, updated_at = $4 \
             WHERE id = $5 AND {NOT_TERMINAL}"
        ))
        .bind(next_attempt_at)
        .bind(error_info)
        .bind(failed_stage)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(id));
        }
        Ok(())
    }

    async fn mark_as_failed(&self, id: Uuid, error_info: &str, failed_stage: &str) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(&format!(
            "UPDATE ingestion_jobs \
             SET status = 'failed', error_info = $1, failed_stage = $2, \
                 completed_at = $3, updated_at = $3 \
             WHERE id = $4 AND {NOT_TERMINAL}"
        ))
        .bind(error_info)
        .bind(failed_stage)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(id));
        }
        Ok(())
    }

    async fn get_by_status(
        &self,
        status: JobStatus,
        limit: Option<i64>,
    ) -> Result<Vec<IngestionJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs \
             WHERE status = $1 \
             ORDER BY created_at DESC \
             LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn get_stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM ingestion_jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status_str: String = row.get("status");
            let count: i64 = row.get("count");
            if let Some(status) = JobStatus::parse(&status_str) {
                stats.counts.insert(status, count);
            }
        }
        Ok(stats)
    }

    async fn cleanup_old_jobs(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let result = sqlx::query(
            "DELETE FROM ingestion_jobs \
             WHERE status IN ('completed', 'failed', 'cancelled') \
               AND COALESCE(completed_at, updated_at) < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::{JobStatus, JobType};

    // Enum codecs live in tessera-core; these pin the strings the SQL in
    // this file relies on.
    #[test]
    fn test_queue_filter_strings_match_status_codec() {
        assert_eq!(JobStatus::Queued.as_str(), "queued");
        assert_eq!(JobStatus::RetryPending.as_str(), "retry_pending");
        assert_eq!(JobStatus::ProcessingSource.as_str(), "processing_source");
        assert_eq!(JobStatus::Completed.as_str(), "completed");
        assert_eq!(JobStatus::Failed.as_str(), "failed");
        assert_eq!(JobStatus::Cancelled.as_str(), "cancelled");
    }

    #[test]
    fn test_terminal_guard_covers_exactly_the_terminal_statuses() {
        for status in JobStatus::all() {
            assert_eq!(
                super::NOT_TERMINAL.contains(status.as_str()),
                status.is_terminal(),
                "guard/terminal disagreement for {status:?}"
            );
        }
    }

    #[test]
    fn test_job_type_strings() {
        assert_eq!(JobType::Pdf.as_str(), "pdf");
        assert_eq!(JobType::Url.as_str(), "url");
        assert_eq!(JobType::TextSnippet.as_str(), "text_snippet");
    }
}
