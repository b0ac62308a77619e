//! Core traits for tessera abstractions.
//!
//! These traits define the interfaces that concrete implementations must
//! satisfy. The ingestion pipeline is constructed over them, so persistent
//! backends and in-memory fakes are interchangeable.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Persistent, priority-ordered store of ingestion jobs with a
/// retry/backoff state machine.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a job in `queued` status with `attempts = 0` and return it.
    ///
    /// Returns [`crate::Error::NotFound`] if the row cannot be read back
    /// after the insert.
    async fn create(&self, req: CreateJobRequest) -> Result<IngestionJob>;

    /// Fetch a job by id.
    async fn get(&self, id: Uuid) -> Result<Option<IngestionJob>>;

    /// Return due jobs: `queued`, or `retry_pending` with
    /// `next_attempt_at <= now`. Ordered by priority descending then
    /// creation time ascending, capped at `limit`. Never returns a job
    /// whose `next_attempt_at` is still in the future.
    async fn get_next_jobs(&self, limit: i64, job_types: &[JobType]) -> Result<Vec<IngestionJob>>;

    /// Apply a partial update. Returns false if no row matched.
    async fn update(&self, id: Uuid, req: UpdateJobRequest) -> Result<bool>;

    /// Transition to `processing_source`, set `last_attempt_at = now`, and
    /// increment `attempts` by exactly one.
    async fn mark_as_started(&self, id: Uuid) -> Result<()>;

    /// Transition to `completed` and set `completed_at`.
    async fn mark_as_completed(&self, id: Uuid, related_object_id: Option<Uuid>) -> Result<()>;

    /// Transition to `retry_pending` with `next_attempt_at = now + delay_ms`.
    async fn mark_as_retryable(
        &self,
        id: Uuid,
        error_info: &str,
        failed_stage: &str,
        delay_ms: i64,
    ) -> Result<()>;

    /// Transition to terminal `failed` and set `completed_at`.
    async fn mark_as_failed(&self, id: Uuid, error_info: &str, failed_stage: &str) -> Result<()>;

    /// List jobs in a given status, newest first.
    async fn get_by_status(
        &self,
        status: JobStatus,
        limit: Option<i64>,
    ) -> Result<Vec<IngestionJob>>;

    /// Job counts per status.
    async fn get_stats(&self) -> Result<QueueStats>;

    /// Delete terminal jobs older than the retention window. Returns the
    /// number of rows deleted.
    async fn cleanup_old_jobs(&self, retention_days: i64) -> Result<u64>;
}

// =============================================================================
// SOURCE OBJECTS
// =============================================================================

/// Repository for source-object reads and status transitions.
#[async_trait]
pub trait ObjectRepository: Send + Sync {
    /// Fetch an object by id.
    async fn get(&self, id: Uuid) -> Result<SourceObject>;

    /// Set the object's embedding lifecycle status.
    async fn update_status(&self, id: Uuid, status: ObjectStatus) -> Result<()>;
}

// =============================================================================
// CHUNK STORE
// =============================================================================

/// Repository for chunk rows.
///
/// `add_bulk` and `delete_by_ids` must each execute as a single atomic
/// statement so partial visibility within one saga step cannot occur.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Bulk-insert chunk payloads; returns the generated ids in input order.
    async fn add_bulk(&self, payloads: &[ChunkPayload]) -> Result<Vec<Uuid>>;

    /// All chunks for an object, ordered by `chunk_idx`.
    async fn list_by_object(&self, object_id: Uuid) -> Result<Vec<Chunk>>;

    /// Delete the given chunk rows.
    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<()>;

    /// Number of chunks currently stored for an object.
    async fn count_for_object(&self, object_id: Uuid) -> Result<i64>;
}

// =============================================================================
// EMBEDDING RECORDS
// =============================================================================

/// Repository for the SQL-side chunk ↔ vector-index link records.
#[async_trait]
pub trait EmbeddingRepository: Send + Sync {
    /// Insert one record per (chunk, vector id) pair in a single statement.
    async fn add_records(&self, records: &[EmbeddingRecord]) -> Result<()>;

    /// Delete records for the given chunks.
    async fn delete_by_chunk_ids(&self, chunk_ids: &[Uuid]) -> Result<()>;

    /// Records for the given chunks, in no particular order.
    async fn list_by_chunk_ids(&self, chunk_ids: &[Uuid]) -> Result<Vec<EmbeddingRecord>>;
}

// =============================================================================
// VECTOR INDEX
// =============================================================================

/// External vector index, consumed only through its add/delete contract.
///
/// There is no transactional coupling between this store and the
/// relational repositories; the saga's compensations are what keep the two
/// consistent.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embed and store the documents. The returned ids are 1:1 with the
    /// input and order-preserving.
    async fn add_documents(&self, documents: &[VectorDocument]) -> Result<Vec<String>>;

    /// Remove entries by vector id. Unknown ids are ignored.
    async fn delete_by_ids(&self, vector_ids: &[String]) -> Result<()>;
}

// =============================================================================
// SPLITTER
// =============================================================================

/// External collaborator that turns an object's cleaned text into chunk
/// payloads (content + index). Summarization and strategy internals live
/// behind this boundary.
#[async_trait]
pub trait Splitter: Send + Sync {
    async fn split(&self, object: &SourceObject, data: Option<&JobSpecificData>)
        -> Result<Vec<ChunkPayload>>;
}
