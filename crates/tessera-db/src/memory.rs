//! In-memory repository implementations.
//!
//! Contract-equivalent stand-ins for the PostgreSQL repositories and the
//! external vector index, used by unit tests and embedded deployments.
//! [`MemoryVectorIndex`] additionally supports scripted failures so saga
//! rollback behavior can be exercised deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use tessera_core::{
    new_v7, Chunk, ChunkPayload, ChunkRepository, CreateJobRequest, EmbeddingRecord,
    EmbeddingRepository, Error, IngestionJob, JobRepository, JobStatus, JobType,
    ObjectRepository, ObjectStatus, QueueStats, Result, SourceObject, UpdateJobRequest,
    VectorDocument, VectorIndex,
};

// =============================================================================
// JOB QUEUE
// =============================================================================

/// In-memory implementation of [`JobRepository`].
#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: Mutex<HashMap<Uuid, IngestionJob>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn create(&self, req: CreateJobRequest) -> Result<IngestionJob> {
        let now = Utc::now();
        let job = IngestionJob {
            id: new_v7(),
            job_type: req.job_type,
            source_identifier: req.source_identifier,
            original_file_name: req.original_file_name,
            status: JobStatus::Queued,
            priority: req
                .priority
                .unwrap_or_else(|| req.job_type.default_priority()),
            attempts: 0,
            last_attempt_at: None,
            next_attempt_at: None,
            progress: None,
            error_info: None,
            failed_stage: None,
            job_specific_data: req.job_specific_data,
            related_object_id: req.related_object_id,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let mut jobs = self.jobs.lock().unwrap();
        jobs.insert(job.id, job.clone());
        jobs.get(&job.id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {} after insert", job.id)))
    }

    async fn get(&self, id: Uuid) -> Result<Option<IngestionJob>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn get_next_jobs(&self, limit: i64, job_types: &[JobType]) -> Result<Vec<IngestionJob>> {
        let now_ms = Utc::now().timestamp_millis();
        let jobs = self.jobs.lock().unwrap();

        let mut due: Vec<IngestionJob> = jobs
            .values()
            .filter(|job| match job.status {
                JobStatus::Queued => true,
                JobStatus::RetryPending => {
                    job.next_attempt_at.is_some_and(|at| at <= now_ms)
                }
                _ => false,
            })
            .filter(|job| job_types.is_empty() || job_types.contains(&job.job_type))
            .cloned()
            .collect();

        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn update(&self, id: Uuid, req: UpdateJobRequest) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status.is_terminal() {
            return Ok(false);
        }

        if let Some(status) = req.status {
            job.status = status;
        }
        if let Some(priority) = req.priority {
            job.priority = priority;
        }
        if let Some(progress) = req.progress {
            job.progress = Some(progress);
        }
        if let Some(error_info) = req.error_info {
            job.error_info = Some(error_info);
        }
        if let Some(failed_stage) = req.failed_stage {
            job.failed_stage = Some(failed_stage);
        }
        if let Some(next_attempt_at) = req.next_attempt_at {
            job.next_attempt_at = Some(next_attempt_at);
        }
        if let Some(related_object_id) = req.related_object_id {
            job.related_object_id = Some(related_object_id);
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_as_started(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .filter(|j| !j.status.is_terminal())
            .ok_or(Error::JobNotFound(id))?;

        let now = Utc::now();
        job.status = JobStatus::ProcessingSource;
        job.last_attempt_at = Some(now);
        job.attempts += 1;
        job.updated_at = now;
        Ok(())
    }

    async fn mark_as_completed(&self, id: Uuid, related_object_id: Option<Uuid>) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .filter(|j| !j.status.is_terminal())
            .ok_or(Error::JobNotFound(id))?;

        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        job.updated_at = now;
        if related_object_id.is_some() {
            job.related_object_id = related_object_id;
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
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .filter(|j| !j.status.is_terminal())
            .ok_or(Error::JobNotFound(id))?;

        let now = Utc::now();
        job.status = JobStatus::RetryPending;
        job.next_attempt_at = Some(now.timestamp_millis() + delay_ms);
        job.error_info = Some(error_info.to_string());
        job.failed_stage = Some(failed_stage.to_string());
        job.updated_at = now;
        Ok(())
    }

    async fn mark_as_failed(&self, id: Uuid, error_info: &str, failed_stage: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .filter(|j| !j.status.is_terminal())
            .ok_or(Error::JobNotFound(id))?;

        let now = Utc::now();
        job.status = JobStatus::Failed;
        job.error_info = Some(error_info.to_string());
        job.failed_stage = Some(failed_stage.to_string());
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn get_by_status(
        &self,
        status: JobStatus,
        limit: Option<i64>,
    ) -> Result<Vec<IngestionJob>> {
        let jobs = self.jobs.lock().unwrap();
        let mut matching: Vec<IngestionJob> = jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            matching.truncate(limit.max(0) as usize);
        }
        Ok(matching)
    }

    async fn get_stats(&self) -> Result<QueueStats> {
        let jobs = self.jobs.lock().unwrap();
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            *stats.counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn cleanup_old_jobs(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.unwrap_or(job.updated_at) < cutoff)
        });
        Ok((before - jobs.len()) as u64)
    }
}

// =============================================================================
// SOURCE OBJECTS
// =============================================================================

/// In-memory implementation of [`ObjectRepository`].
#[derive(Default)]
pub struct MemoryObjectRepository {
    objects: Mutex<HashMap<Uuid, SourceObject>>,
}

impl MemoryObjectRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object (test setup).
    pub fn insert(&self, object: SourceObject) {
        self.objects.lock().unwrap().insert(object.id, object);
    }

    /// Build and seed a parsed object with the given text.
    pub fn insert_parsed(&self, object_type: JobType, text: &str) -> Uuid {
        let now = Utc::now();
        let object = SourceObject {
            id: new_v7(),
            notebook_id: Some(new_v7()),
            title: Some("test object".to_string()),
            object_type,
            cleaned_text: Some(text.to_string()),
            status: ObjectStatus::Parsed,
            created_at: now,
            updated_at: now,
        };
        let id = object.id;
        self.insert(object);
        id
    }
}

#[async_trait]
impl ObjectRepository for MemoryObjectRepository {
    async fn get(&self, id: Uuid) -> Result<SourceObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(Error::ObjectNotFound(id))
    }

    async fn update_status(&self, id: Uuid, status: ObjectStatus) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let object = objects.get_mut(&id).ok_or(Error::ObjectNotFound(id))?;
        object.status = status;
        object.updated_at = Utc::now();
        Ok(())
    }
}

// =============================================================================
// CHUNKS
// =============================================================================

/// In-memory implementation of [`ChunkRepository`].
#[derive(Default)]
pub struct MemoryChunkRepository {
    chunks: Mutex<HashMap<Uuid, Chunk>>,
    fail_next_add: AtomicU32,
}

impl MemoryChunkRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` `add_bulk` calls fail with a transient error.
    pub fn fail_next_adds(&self, n: u32) {
        self.fail_next_add.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChunkRepository for MemoryChunkRepository {
    async fn add_bulk(&self, payloads: &[ChunkPayload]) -> Result<Vec<Uuid>> {
        if self.fail_next_add.load(Ordering::SeqCst) > 0 {
            self.fail_next_add.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }

        let now = Utc::now();
        let mut chunks = self.chunks.lock().unwrap();
        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let chunk = Chunk {
                id: new_v7(),
                object_id: payload.object_id,
                notebook_id: payload.notebook_id,
                chunk_idx: payload.chunk_idx,
                content: payload.content.clone(),
                summary: payload.summary.clone(),
                tags_json: payload.tags_json.clone(),
                propositions_json: payload.propositions_json.clone(),
                token_count: payload.token_count,
                created_at: now,
            };
            ids.push(chunk.id);
            chunks.insert(chunk.id, chunk);
        }
        Ok(ids)
    }

    async fn list_by_object(&self, object_id: Uuid) -> Result<Vec<Chunk>> {
        let chunks = self.chunks.lock().unwrap();
        let mut matching: Vec<Chunk> = chunks
            .values()
            .filter(|c| c.object_id == object_id)
            .cloned()
            .collect();
        matching.sort_by_key(|c| c.chunk_idx);
        Ok(matching)
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<()> {
        let mut chunks = self.chunks.lock().unwrap();
        for id in ids {
            chunks.remove(id);
        }
        Ok(())
    }

    async fn count_for_object(&self, object_id: Uuid) -> Result<i64> {
        let chunks = self.chunks.lock().unwrap();
        Ok(chunks.values().filter(|c| c.object_id == object_id).count() as i64)
    }
}

// =============================================================================
// EMBEDDING RECORDS
// =============================================================================

/// In-memory implementation of [`EmbeddingRepository`].
#[derive(Default)]
pub struct MemoryEmbeddingRepository {
    records: Mutex<Vec<EmbeddingRecord>>,
    fail_next_add: AtomicU32,
}

impl MemoryEmbeddingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` `add_records` calls fail with a transient error.
    pub fn fail_next_adds(&self, n: u32) {
        self.fail_next_add.store(n, Ordering::SeqCst);
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl EmbeddingRepository for MemoryEmbeddingRepository {
    async fn add_records(&self, records: &[EmbeddingRecord]) -> Result<()> {
        if self.fail_next_add.load(Ordering::SeqCst) > 0 {
            self.fail_next_add.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }

        self.records.lock().unwrap().extend_from_slice(records);
        Ok(())
    }

    async fn delete_by_chunk_ids(&self, chunk_ids: &[Uuid]) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .retain(|r| !chunk_ids.contains(&r.chunk_id));
        Ok(())
    }

    async fn list_by_chunk_ids(&self, chunk_ids: &[Uuid]) -> Result<Vec<EmbeddingRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| chunk_ids.contains(&r.chunk_id))
            .cloned()
            .collect())
    }
}

// =============================================================================
// VECTOR INDEX
// =============================================================================

/// In-memory stand-in for the external vector index, with scripted
/// failures for exercising saga compensation.
#[derive(Default)]
pub struct MemoryVectorIndex {
    entries: Mutex<HashMap<String, VectorDocument>>,
    deleted_ids: Mutex<Vec<String>>,
    fail_next_add: AtomicU32,
    /// Number of ids to withhold from the next `add_documents` response,
    /// simulating a contract-violating backend.
    short_next_add_by: AtomicU32,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` `add_documents` calls fail with a transient error.
    pub fn fail_next_adds(&self, n: u32) {
        self.fail_next_add.store(n, Ordering::SeqCst);
    }

    /// On the next `add_documents` call, index and return `n` fewer
    /// entries than were submitted (vector-ID count mismatch).
    pub fn short_next_add_by(&self, n: u32) {
        self.short_next_add_by.store(n, Ordering::SeqCst);
    }

    /// Number of entries currently indexed.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Every vector id passed to `delete_by_ids`, in call order.
    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn add_documents(&self, documents: &[VectorDocument]) -> Result<Vec<String>> {
        if self.fail_next_add.load(Ordering::SeqCst) > 0 {
            self.fail_next_add.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::VectorIndex("index unavailable".to_string()));
        }

        let short_by = self.short_next_add_by.swap(0, Ordering::SeqCst) as usize;
        let take = documents.len().saturating_sub(short_by);

        let mut entries = self.entries.lock().unwrap();
        let mut ids = Vec::with_capacity(take);
        for document in &documents[..take] {
            let vector_id = format!("vec-{}", new_v7());
            entries.insert(vector_id.clone(), document.clone());
            ids.push(vector_id);
        }
        Ok(ids)
    }

    async fn delete_by_ids(&self, vector_ids: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        for id in vector_ids {
            entries.remove(id);
        }
        self.deleted_ids
            .lock()
            .unwrap()
            .extend(vector_ids.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet_job() -> CreateJobRequest {
        CreateJobRequest::new(JobType::TextSnippet, "inline:hello")
    }

    #[tokio::test]
    async fn test_create_starts_queued_with_zero_attempts() {
        let repo = MemoryJobRepository::new();
        let job = repo.create(snippet_job()).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.priority, JobType::TextSnippet.default_priority());
    }

    #[tokio::test]
    async fn test_mark_as_started_increments_attempts_once() {
        let repo = MemoryJobRepository::new();
        let job = repo.create(snippet_job()).await.unwrap();

        repo.mark_as_started(job.id).await.unwrap();
        let started = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(started.status, JobStatus::ProcessingSource);
        assert_eq!(started.attempts, 1);
        assert!(started.last_attempt_at.is_some());

        repo.mark_as_started(job.id).await.unwrap();
        let again = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn test_get_next_jobs_never_returns_future_retries() {
        let repo = MemoryJobRepository::new();
        let due = repo.create(snippet_job()).await.unwrap();
        let not_due = repo.create(snippet_job()).await.unwrap();

        // Far-future backoff vs already-elapsed backoff.
        repo.mark_as_retryable(not_due.id, "err", "vectorizing", 3_600_000)
            .await
            .unwrap();
        repo.mark_as_retryable(due.id, "err", "vectorizing", -1_000)
            .await
            .unwrap();

        let jobs = repo.get_next_jobs(10, &[]).await.unwrap();
        let ids: Vec<Uuid> = jobs.iter().map(|j| j.id).collect();
        assert!(ids.contains(&due.id));
        assert!(!ids.contains(&not_due.id));
    }

    #[tokio::test]
    async fn test_get_next_jobs_orders_by_priority_then_age() {
        let repo = MemoryJobRepository::new();
        let mut low = snippet_job();
        low.priority = Some(1);
        let mut high = snippet_job();
        high.priority = Some(9);

        let low = repo.create(low).await.unwrap();
        let high = repo.create(high).await.unwrap();

        let jobs = repo.get_next_jobs(10, &[]).await.unwrap();
        assert_eq!(jobs[0].id, high.id);
        assert_eq!(jobs[1].id, low.id);
    }

    #[tokio::test]
    async fn test_get_next_jobs_filters_by_type() {
        let repo = MemoryJobRepository::new();
        repo.create(snippet_job()).await.unwrap();
        let pdf = repo
            .create(CreateJobRequest::new(JobType::Pdf, "report.pdf"))
            .await
            .unwrap();

        let jobs = repo.get_next_jobs(10, &[JobType::Pdf]).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, pdf.id);
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_immutable() {
        let repo = MemoryJobRepository::new();
        let job = repo.create(snippet_job()).await.unwrap();
        repo.mark_as_completed(job.id, None).await.unwrap();

        // Partial update is rejected.
        let updated = repo
            .update(
                job.id,
                UpdateJobRequest {
                    priority: Some(99),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated);

        // Transition attempts error.
        assert!(repo.mark_as_failed(job.id, "late", "none").await.is_err());
        assert!(repo.mark_as_started(job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_stats_counts_per_status() {
        let repo = MemoryJobRepository::new();
        let a = repo.create(snippet_job()).await.unwrap();
        repo.create(snippet_job()).await.unwrap();
        repo.mark_as_started(a.id).await.unwrap();

        let stats = repo.get_stats().await.unwrap();
        assert_eq!(stats.count(JobStatus::Queued), 1);
        assert_eq!(stats.count(JobStatus::ProcessingSource), 1);
        assert_eq!(stats.count(JobStatus::Completed), 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_old_terminal_jobs() {
        let repo = MemoryJobRepository::new();
        let old_done = repo.create(snippet_job()).await.unwrap();
        let fresh_done = repo.create(snippet_job()).await.unwrap();
        let active = repo.create(snippet_job()).await.unwrap();

        repo.mark_as_completed(old_done.id, None).await.unwrap();
        repo.mark_as_completed(fresh_done.id, None).await.unwrap();

        // Backdate one completed job past the retention window.
        {
            let mut jobs = repo.jobs.lock().unwrap();
            let job = jobs.get_mut(&old_done.id).unwrap();
            job.completed_at = Some(Utc::now() - Duration::days(30));
        }

        let deleted = repo.cleanup_old_jobs(7).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.get(old_done.id).await.unwrap().is_none());
        assert!(repo.get(fresh_done.id).await.unwrap().is_some());
        assert!(repo.get(active.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_vector_index_short_add_returns_fewer_ids() {
        let index = MemoryVectorIndex::new();
        index.short_next_add_by(1);

        let docs = vec![
            VectorDocument {
                id: new_v7(),
                content: "one".to_string(),
            },
            VectorDocument {
                id: new_v7(),
                content: "two".to_string(),
            },
        ];
        let ids = index.add_documents(&docs).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(index.entry_count(), 1);

        // Shorting is one-shot.
        let ids = index.add_documents(&docs).await.unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_vector_index_records_deletions() {
        let index = MemoryVectorIndex::new();
        let docs = vec![VectorDocument {
            id: new_v7(),
            content: "text".to_string(),
        }];
        let ids = index.add_documents(&docs).await.unwrap();
        index.delete_by_ids(&ids).await.unwrap();

        assert_eq!(index.entry_count(), 0);
        assert_eq!(index.deleted_ids(), ids);
    }
}
