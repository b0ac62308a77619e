//! Content ingestion pipeline.
//!
//! Runs the embedding phase of an ingestion job as a compensating saga
//! across two stores: the relational database (chunks, embedding records)
//! and the external vector index. Either every chunk ends up inserted,
//! indexed, and linked, or the saga rolls all of it back and the job is
//! rescheduled or failed.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use tessera_core::{
    defaults, Chunk, ChunkPayload, ChunkRepository, EmbeddingRecord, EmbeddingRepository, Error,
    IngestionJob, JobProgress, JobRepository, JobStatus, ObjectRepository, ObjectStatus, Result,
    Splitter, UpdateJobRequest, VectorDocument, VectorIndex,
};
use tessera_saga::{execute_saga, SagaContext, SagaResult, SagaStep};

/// What happened to the job after one pipeline run.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Saga succeeded; job is `completed`, object is `embedded`.
    Completed { object_id: Uuid, saga: SagaResult },
    /// Transient failure with retry budget left; job is `retry_pending`.
    Retried { error: String },
    /// Permanent failure or exhausted budget; job is `failed`.
    Failed { error: String },
}

/// Ingestion pipeline over abstract repositories.
///
/// All collaborators are trait objects so the pipeline runs identically
/// against PostgreSQL and the in-memory implementations.
pub struct IngestionPipeline {
    jobs: Arc<dyn JobRepository>,
    objects: Arc<dyn ObjectRepository>,
    chunks: Arc<dyn ChunkRepository>,
    embeddings: Arc<dyn EmbeddingRepository>,
    index: Arc<dyn VectorIndex>,
    splitter: Arc<dyn Splitter>,
    embed_model: String,
}

impl IngestionPipeline {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        objects: Arc<dyn ObjectRepository>,
        chunks: Arc<dyn ChunkRepository>,
        embeddings: Arc<dyn EmbeddingRepository>,
        index: Arc<dyn VectorIndex>,
        splitter: Arc<dyn Splitter>,
    ) -> Self {
        Self {
            jobs,
            objects,
            chunks,
            embeddings,
            index,
            splitter,
            embed_model: defaults::EMBED_MODEL.to_string(),
        }
    }

    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    /// Process one claimed job end to end, including queue bookkeeping.
    ///
    /// The caller must have already marked the job as started; `job.attempts`
    /// is read to decide between rescheduling and terminal failure. Errors
    /// returned here are bookkeeping failures only; pipeline failures are
    /// reported through [`PipelineOutcome`].
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = ?job.job_type))]
    pub async fn process_job(&self, job: &IngestionJob) -> Result<PipelineOutcome> {
        match self.run_pipeline(job).await {
            Ok(saga) if saga.success => {
                // Object id was validated by run_pipeline.
                let object_id = job
                    .related_object_id
                    .ok_or_else(|| Error::Internal("related_object_id vanished".into()))?;

                self.objects
                    .update_status(object_id, ObjectStatus::Embedded)
                    .await?;
                self.jobs.mark_as_completed(job.id, Some(object_id)).await?;

                info!(
                    subsystem = "ingest",
                    op = "process_job",
                    job_id = %job.id,
                    object_id = %object_id,
                    steps = saga.completed_steps.len(),
                    "Ingestion completed"
                );
                Ok(PipelineOutcome::Completed { object_id, saga })
            }
            Ok(saga) => {
                let (error, stage, retryable) = match &saga.failed_step {
                    Some(failed) => (
                        failed.error.clone(),
                        stage_for_step(&failed.step_name).to_string(),
                        failed.retryable,
                    ),
                    None => (
                        saga.error
                            .clone()
                            .unwrap_or_else(|| "saga failed".to_string()),
                        JobStatus::PersistingData.as_str().to_string(),
                        false,
                    ),
                };
                self.handle_failure(job, error, &stage, retryable).await
            }
            Err(e) => {
                let retryable = e.is_retryable();
                self.handle_failure(
                    job,
                    e.to_string(),
                    JobStatus::ParsingContent.as_str(),
                    retryable,
                )
                .await
            }
        }
    }

    /// Resolve the object, split its text, and run the embedding saga.
    async fn run_pipeline(&self, job: &IngestionJob) -> Result<SagaResult> {
        let object_id = job
            .related_object_id
            .ok_or_else(|| Error::InvalidInput("job has no related object".to_string()))?;
        let object = self.objects.get(object_id).await?;

        set_stage(
            &self.jobs,
            job.id,
            JobStatus::ParsingContent,
            10,
            "splitting content",
        )
        .await;
        self.objects
            .update_status(object_id, ObjectStatus::Embedding)
            .await?;

        // Re-embedding an object that already has chunks must not insert
        // (or ever roll back) those chunks; the saga simply starts at the
        // fetch step.
        let existing = self.chunks.count_for_object(object_id).await?;
        let payloads = if existing > 0 {
            Vec::new()
        } else {
            self.splitter
                .split(&object, job.job_specific_data.as_ref())
                .await?
        };
        if existing == 0 && payloads.is_empty() {
            return Err(Error::InvalidInput(
                "object produced no chunks to ingest".to_string(),
            ));
        }

        let reembed = existing > 0;
        let (steps, superseded) = self.build_steps(job.id, object_id, payloads, reembed);
        let ctx = SagaContext::new(format!("ingest-{object_id}"));
        let result = execute_saga(&steps, &ctx).await;

        // The new links are committed; the superseded index entries are
        // garbage now. Removal is best effort, a leftover entry is
        // unreferenced and harmless.
        if result.success && reembed {
            let old_ids: Vec<String> = superseded
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.vector_id.clone())
                .collect();
            if !old_ids.is_empty() {
                if let Err(e) = self.index.delete_by_ids(&old_ids).await {
                    warn!(
                        subsystem = "ingest",
                        object_id = %object_id,
                        count = old_ids.len(),
                        error = %e,
                        "Failed to remove superseded index entries"
                    );
                }
            }
        }

        Ok(result)
    }

    /// Assemble the saga. Also returns the slot that, on a re-embed run,
    /// holds the superseded link records so the caller can retire their
    /// index entries once the saga has committed.
    fn build_steps(
        &self,
        job_id: Uuid,
        object_id: Uuid,
        payloads: Vec<ChunkPayload>,
        reembed: bool,
    ) -> (Vec<SagaStep>, Arc<Mutex<Vec<EmbeddingRecord>>>) {
        let inserted_ids: Arc<Mutex<Vec<Uuid>>> = Arc::default();
        let fetched: Arc<Mutex<Vec<Chunk>>> = Arc::default();
        let vector_ids: Arc<Mutex<Vec<String>>> = Arc::default();
        let superseded: Arc<Mutex<Vec<EmbeddingRecord>>> = Arc::default();

        let mut steps = Vec::new();

        if !reembed {
            let payloads = Arc::new(payloads);
            let chunks = self.chunks.clone();
            let jobs = self.jobs.clone();
            let slot = inserted_ids.clone();
            let insert = SagaStep::new("insert-chunks-to-sql", move || {
                let chunks = chunks.clone();
                let jobs = jobs.clone();
                let payloads = payloads.clone();
                let slot = slot.clone();
                async move {
                    set_stage(&jobs, job_id, JobStatus::PersistingData, 30, "inserting chunks")
                        .await;
                    let ids = chunks.add_bulk(&payloads).await?;
                    let count = ids.len();
                    *slot.lock().unwrap() = ids;
                    Ok(json!({ "inserted": count }))
                }
            })
            .retryable(defaults::STEP_MAX_RETRIES)
            .with_compensation({
                let chunks = self.chunks.clone();
                let slot = inserted_ids.clone();
                move || {
                    let chunks = chunks.clone();
                    let ids = slot.lock().unwrap().clone();
                    async move { chunks.delete_by_ids(&ids).await }
                }
            });
            steps.push(insert);
        }

        let fetch = SagaStep::new("fetch-inserted-chunks", {
            let chunks = self.chunks.clone();
            let slot = fetched.clone();
            move || {
                let chunks = chunks.clone();
                let slot = slot.clone();
                async move {
                    let rows = chunks.list_by_object(object_id).await?;
                    if rows.is_empty() {
                        return Err(Error::Internal(format!(
                            "object {object_id} has no chunks to embed"
                        )));
                    }
                    let count = rows.len();
                    *slot.lock().unwrap() = rows;
                    Ok(json!({ "fetched": count }))
                }
            }
        })
        .retryable(defaults::STEP_MAX_RETRIES);
        steps.push(fetch);

        // Re-embedding replaces the chunk links wholesale: the old records
        // move aside here (and come back on rollback), so the link step
        // below owns every record it inserts. The superseded index entries
        // stay live until the saga commits.
        if reembed {
            let remove = SagaStep::new("remove-superseded-links", {
                let embeddings = self.embeddings.clone();
                let fetched = fetched.clone();
                let slot = superseded.clone();
                move || {
                    let embeddings = embeddings.clone();
                    let fetched = fetched.clone();
                    let slot = slot.clone();
                    async move {
                        let chunk_ids: Vec<Uuid> =
                            fetched.lock().unwrap().iter().map(|c| c.id).collect();
                        let old = embeddings.list_by_chunk_ids(&chunk_ids).await?;
                        embeddings.delete_by_chunk_ids(&chunk_ids).await?;
                        let count = old.len();
                        *slot.lock().unwrap() = old;
                        Ok(json!({ "superseded": count }))
                    }
                }
            })
            .retryable(defaults::STEP_MAX_RETRIES)
            .with_compensation({
                let embeddings = self.embeddings.clone();
                let slot = superseded.clone();
                move || {
                    let embeddings = embeddings.clone();
                    let old = slot.lock().unwrap().clone();
                    async move { embeddings.add_records(&old).await }
                }
            });
            steps.push(remove);
        }

        let embed = SagaStep::new("create-embeddings", {
            let index = self.index.clone();
            let jobs = self.jobs.clone();
            let fetched = fetched.clone();
            let slot = vector_ids.clone();
            move || {
                let index = index.clone();
                let jobs = jobs.clone();
                let fetched = fetched.clone();
                let slot = slot.clone();
                async move {
                    set_stage(&jobs, job_id, JobStatus::Vectorizing, 60, "creating embeddings")
                        .await;
                    let documents: Vec<VectorDocument> = fetched
                        .lock()
                        .unwrap()
                        .iter()
                        .map(|chunk| VectorDocument {
                            id: chunk.id,
                            content: chunk.content.clone(),
                        })
                        .collect();

                    let ids = index.add_documents(&documents).await?;
                    if ids.len() != documents.len() {
                        // The index broke its 1:1 contract; whatever it did
                        // write is unattributable, so remove what it told us
                        // about and refuse the batch.
                        if let Err(e) = index.delete_by_ids(&ids).await {
                            warn!(
                                subsystem = "ingest",
                                object_id = %object_id,
                                error = %e,
                                "Failed to remove partial index entries"
                            );
                        }
                        return Err(Error::InvalidInput(format!(
                            "vector ID count mismatch: submitted {} documents, index returned {} ids",
                            documents.len(),
                            ids.len()
                        )));
                    }

                    let count = ids.len();
                    *slot.lock().unwrap() = ids;
                    Ok(json!({ "indexed": count }))
                }
            }
        })
        .retryable(defaults::STEP_MAX_RETRIES)
        .with_compensation({
            let index = self.index.clone();
            let slot = vector_ids.clone();
            move || {
                let index = index.clone();
                let ids = slot.lock().unwrap().clone();
                async move { index.delete_by_ids(&ids).await }
            }
        });
        steps.push(embed);

        let link = SagaStep::new("link-embeddings", {
            let embeddings = self.embeddings.clone();
            let fetched = fetched.clone();
            let vector_ids = vector_ids.clone();
            let model = self.embed_model.clone();
            move || {
                let embeddings = embeddings.clone();
                let fetched = fetched.clone();
                let vector_ids = vector_ids.clone();
                let model = model.clone();
                async move {
                    let now = chrono::Utc::now();
                    let records: Vec<EmbeddingRecord> = {
                        let chunks = fetched.lock().unwrap();
                        let ids = vector_ids.lock().unwrap();
                        chunks
                            .iter()
                            .zip(ids.iter())
                            .map(|(chunk, vector_id)| EmbeddingRecord {
                                chunk_id: chunk.id,
                                model: model.clone(),
                                vector_id: vector_id.clone(),
                                created_at: now,
                            })
                            .collect()
                    };
                    let count = records.len();
                    embeddings.add_records(&records).await?;
                    Ok(json!({ "linked": count }))
                }
            }
        })
        .retryable(defaults::STEP_MAX_RETRIES)
        .with_compensation({
            let embeddings = self.embeddings.clone();
            let index = self.index.clone();
            let fetched = fetched.clone();
            let vector_ids = vector_ids.clone();
            move || {
                let embeddings = embeddings.clone();
                let index = index.clone();
                let chunk_ids: Vec<Uuid> =
                    fetched.lock().unwrap().iter().map(|c| c.id).collect();
                let ids = vector_ids.lock().unwrap().clone();
                async move {
                    embeddings.delete_by_chunk_ids(&chunk_ids).await?;
                    index.delete_by_ids(&ids).await
                }
            }
        });
        steps.push(link);

        (steps, superseded)
    }

    /// Move a failed run to `retry_pending` or `failed` based on the
    /// error class and remaining attempt budget.
    async fn handle_failure(
        &self,
        job: &IngestionJob,
        error: String,
        failed_stage: &str,
        retryable: bool,
    ) -> Result<PipelineOutcome> {
        if retryable && job.attempts < job.max_retries() {
            self.jobs
                .mark_as_retryable(job.id, &error, failed_stage, defaults::JOB_RETRY_BACKOFF_MS)
                .await?;
            warn!(
                subsystem = "ingest",
                op = "process_job",
                job_id = %job.id,
                attempts = job.attempts,
                max_retries = job.max_retries(),
                error = %error,
                "Ingestion failed, job rescheduled"
            );
            return Ok(PipelineOutcome::Retried { error });
        }

        self.jobs.mark_as_failed(job.id, &error, failed_stage).await?;
        if let Some(object_id) = job.related_object_id {
            if let Err(e) = self
                .objects
                .update_status(object_id, ObjectStatus::EmbedFailed)
                .await
            {
                warn!(
                    subsystem = "ingest",
                    job_id = %job.id,
                    object_id = %object_id,
                    error = %e,
                    "Failed to mark object as embed_failed"
                );
            }
        }
        warn!(
            subsystem = "ingest",
            op = "process_job",
            job_id = %job.id,
            attempts = job.attempts,
            retryable,
            error = %error,
            "Ingestion failed permanently"
        );
        Ok(PipelineOutcome::Failed { error })
    }
}

/// Queue stage corresponding to a saga step, for `failed_stage` reporting.
fn stage_for_step(step_name: &str) -> &'static str {
    match step_name {
        "insert-chunks-to-sql" | "fetch-inserted-chunks" | "remove-superseded-links" => {
            JobStatus::PersistingData.as_str()
        }
        "create-embeddings" | "link-embeddings" => JobStatus::Vectorizing.as_str(),
        _ => JobStatus::ProcessingSource.as_str(),
    }
}

/// Best-effort status and progress update; a bookkeeping miss never
/// interrupts the run.
async fn set_stage(
    jobs: &Arc<dyn JobRepository>,
    job_id: Uuid,
    status: JobStatus,
    percent: i32,
    message: &str,
) {
    let req = UpdateJobRequest {
        status: Some(status),
        progress: Some(JobProgress {
            stage: status.as_str().to_string(),
            percent,
            message: Some(message.to_string()),
        }),
        ..Default::default()
    };
    if let Err(e) = jobs.update(job_id, req).await {
        warn!(
            subsystem = "ingest",
            job_id = %job_id,
            status = status.as_str(),
            error = %e,
            "Failed to record job progress"
        );
    }
}
