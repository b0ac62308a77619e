//! Core data model for tessera.
//!
//! Defines the persisted shapes shared by every crate: ingestion jobs and
//! their lifecycle, source objects, chunks, and embedding records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// JOB TYPES & STATUS
// =============================================================================

/// Kind of source content an ingestion job processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Pdf,
    Url,
    TextSnippet,
}

impl JobType {
    /// String form used in the database and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Pdf => "pdf",
            JobType::Url => "url",
            JobType::TextSnippet => "text_snippet",
        }
    }

    /// Parse the database string form. Unknown strings are rejected rather
    /// than mapped to a fallback: a job row with an unrecognized type is
    /// corrupt, not reinterpretable.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(JobType::Pdf),
            "url" => Some(JobType::Url),
            "text_snippet" => Some(JobType::TextSnippet),
            _ => None,
        }
    }

    /// Default queue priority for this job type (higher = sooner).
    pub fn default_priority(&self) -> i32 {
        match self {
            // Snippets are small and user-visible immediately
            JobType::TextSnippet => 5,
            JobType::Pdf => 3,
            // URL fetches depend on remote latency, schedule last
            JobType::Url => 2,
        }
    }
}

/// Lifecycle state of an ingestion job.
///
/// Progression: `queued → processing_source → parsing_content →
/// ai_processing → persisting_data → vectorizing → completed`. Any
/// processing stage may divert to `retry_pending` (budget remaining) or
/// `failed`. `cancelled` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    ProcessingSource,
    ParsingContent,
    AiProcessing,
    PersistingData,
    Vectorizing,
    RetryPending,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::ProcessingSource => "processing_source",
            JobStatus::ParsingContent => "parsing_content",
            JobStatus::AiProcessing => "ai_processing",
            JobStatus::PersistingData => "persisting_data",
            JobStatus::Vectorizing => "vectorizing",
            JobStatus::RetryPending => "retry_pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing_source" => Some(JobStatus::ProcessingSource),
            "parsing_content" => Some(JobStatus::ParsingContent),
            "ai_processing" => Some(JobStatus::AiProcessing),
            "persisting_data" => Some(JobStatus::PersistingData),
            "vectorizing" => Some(JobStatus::Vectorizing),
            "retry_pending" => Some(JobStatus::RetryPending),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are never mutated again except by retention cleanup.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// All states, in lifecycle order. Used for stats reporting.
    pub fn all() -> [JobStatus; 10] {
        [
            JobStatus::Queued,
            JobStatus::ProcessingSource,
            JobStatus::ParsingContent,
            JobStatus::AiProcessing,
            JobStatus::PersistingData,
            JobStatus::Vectorizing,
            JobStatus::RetryPending,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ]
    }
}

// =============================================================================
// STRUCTURED JOB FIELDS
// =============================================================================

/// Point-in-time progress of a running job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Stage label, usually a [`JobStatus`] string form or a saga step name.
    pub stage: String,
    pub percent: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobProgress {
    pub fn new(stage: impl Into<String>, percent: i32) -> Self {
        Self {
            stage: stage.into(),
            percent,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Parse a persisted JSON value defensively.
    ///
    /// Malformed persisted data is logged and treated as absent; it must
    /// never make a job row unreadable.
    pub fn from_value(value: Option<&JsonValue>) -> Option<Self> {
        let value = value?;
        match serde_json::from_value(value.clone()) {
            Ok(progress) => Some(progress),
            Err(e) => {
                tracing::warn!(
                    subsystem = "core",
                    component = "models",
                    error = %e,
                    "Malformed job progress JSON, treating as absent"
                );
                None
            }
        }
    }
}

/// Per-job structured options supplied at creation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSpecificData {
    /// Chunking strategy hint for the splitter ("paragraph", "fixed", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunking_strategy: Option<String>,
    /// Override for the queue-level retry budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i32>,
    /// HTTP headers to send when fetching URL sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<HashMap<String, String>>,
    /// Notebook the resulting object belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notebook_id: Option<Uuid>,
}

impl JobSpecificData {
    /// Parse a persisted JSON value defensively (see [`JobProgress::from_value`]).
    pub fn from_value(value: Option<&JsonValue>) -> Option<Self> {
        let value = value?;
        match serde_json::from_value(value.clone()) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(
                    subsystem = "core",
                    component = "models",
                    error = %e,
                    "Malformed job_specific_data JSON, treating as absent"
                );
                None
            }
        }
    }
}

// =============================================================================
// INGESTION JOB
// =============================================================================

/// A persisted unit of ingestion work.
///
/// Invariants: `attempts` only increases; a terminal job is never mutated
/// again except by retention cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: Uuid,
    pub job_type: JobType,
    /// File path, URL, or inline identifier of the source content.
    pub source_identifier: String,
    pub original_file_name: Option<String>,
    pub status: JobStatus,
    /// Higher runs sooner.
    pub priority: i32,
    /// Number of times this job has been started.
    pub attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Epoch milliseconds; governs retry eligibility while `retry_pending`.
    pub next_attempt_at: Option<i64>,
    pub progress: Option<JobProgress>,
    pub error_info: Option<String>,
    /// Stage or saga step name where the last failure occurred.
    pub failed_stage: Option<String>,
    pub job_specific_data: Option<JobSpecificData>,
    /// Source object produced by (or re-processed by) this job.
    pub related_object_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestionJob {
    /// Effective retry budget: the per-job override, or the queue default.
    pub fn max_retries(&self) -> i32 {
        self.job_specific_data
            .as_ref()
            .and_then(|d| d.max_retries)
            .unwrap_or(crate::defaults::JOB_MAX_RETRIES)
    }
}

/// Parameters for creating a new ingestion job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub job_type: JobType,
    pub source_identifier: String,
    pub original_file_name: Option<String>,
    /// Defaults to [`JobType::default_priority`] when absent.
    pub priority: Option<i32>,
    pub job_specific_data: Option<JobSpecificData>,
    pub related_object_id: Option<Uuid>,
}

impl CreateJobRequest {
    pub fn new(job_type: JobType, source_identifier: impl Into<String>) -> Self {
        Self {
            job_type,
            source_identifier: source_identifier.into(),
            original_file_name: None,
            priority: None,
            job_specific_data: None,
            related_object_id: None,
        }
    }
}

/// Partial update applied to a job row. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateJobRequest {
    pub status: Option<JobStatus>,
    pub priority: Option<i32>,
    pub progress: Option<JobProgress>,
    pub error_info: Option<String>,
    pub failed_stage: Option<String>,
    pub next_attempt_at: Option<i64>,
    pub related_object_id: Option<Uuid>,
}

/// Job counts per status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub counts: HashMap<JobStatus, i64>,
}

impl QueueStats {
    pub fn count(&self, status: JobStatus) -> i64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

// =============================================================================
// SOURCE OBJECTS
// =============================================================================

/// Embedding lifecycle of a source object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    New,
    /// Cleaned text is available; chunks may or may not exist yet.
    Parsed,
    Embedding,
    /// Terminal success: chunks persisted, embedded, and linked.
    Embedded,
    EmbedFailed,
}

impl ObjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectStatus::New => "new",
            ObjectStatus::Parsed => "parsed",
            ObjectStatus::Embedding => "embedding",
            ObjectStatus::Embedded => "embedded",
            ObjectStatus::EmbedFailed => "embed_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(ObjectStatus::New),
            "parsed" => Some(ObjectStatus::Parsed),
            "embedding" => Some(ObjectStatus::Embedding),
            "embedded" => Some(ObjectStatus::Embedded),
            "embed_failed" => Some(ObjectStatus::EmbedFailed),
            _ => None,
        }
    }
}

/// A piece of source content (document, web page, snippet) owned by a
/// notebook and ingested into searchable chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceObject {
    pub id: Uuid,
    pub notebook_id: Option<Uuid>,
    pub title: Option<String>,
    pub object_type: JobType,
    /// Text extracted and cleaned by the parsing stage.
    pub cleaned_text: Option<String>,
    pub status: ObjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// CHUNKS & EMBEDDINGS
// =============================================================================

/// A chunk as produced by the splitter, before it has a row id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub object_id: Uuid,
    pub notebook_id: Option<Uuid>,
    /// Position within the object; `(object_id, chunk_idx)` is unique.
    pub chunk_idx: i32,
    pub content: String,
    pub summary: Option<String>,
    pub tags_json: Option<String>,
    pub propositions_json: Option<String>,
    pub token_count: Option<i32>,
}

/// A persisted content fragment belonging to one object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub object_id: Uuid,
    pub notebook_id: Option<Uuid>,
    pub chunk_idx: i32,
    pub content: String,
    pub summary: Option<String>,
    pub tags_json: Option<String>,
    pub propositions_json: Option<String>,
    pub token_count: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// SQL-side link between a chunk and its vector-index entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub chunk_id: Uuid,
    pub model: String,
    /// Key of the corresponding entry in the external vector index.
    pub vector_id: String,
    pub created_at: DateTime<Utc>,
}

/// Input to [`crate::VectorIndex::add_documents`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    pub id: Uuid,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_round_trip() {
        for jt in [JobType::Pdf, JobType::Url, JobType::TextSnippet] {
            assert_eq!(JobType::parse(jt.as_str()), Some(jt));
        }
    }

    #[test]
    fn test_job_type_parse_unknown() {
        assert_eq!(JobType::parse("docx"), None);
        assert_eq!(JobType::parse(""), None);
        assert_eq!(JobType::parse("PDF"), None);
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in JobStatus::all() {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_job_status_strings_are_unique() {
        let mut strings: Vec<&str> = JobStatus::all().iter().map(|s| s.as_str()).collect();
        strings.sort();
        strings.dedup();
        assert_eq!(strings.len(), JobStatus::all().len());
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::RetryPending.is_terminal());
        assert!(!JobStatus::Vectorizing.is_terminal());
    }

    #[test]
    fn test_object_status_round_trip() {
        for status in [
            ObjectStatus::New,
            ObjectStatus::Parsed,
            ObjectStatus::Embedding,
            ObjectStatus::Embedded,
            ObjectStatus::EmbedFailed,
        ] {
            assert_eq!(ObjectStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_job_progress_from_value_valid() {
        let value = serde_json::json!({
            "stage": "vectorizing",
            "percent": 80,
            "message": "embedding 12 chunks"
        });
        let progress = JobProgress::from_value(Some(&value)).unwrap();
        assert_eq!(progress.stage, "vectorizing");
        assert_eq!(progress.percent, 80);
        assert_eq!(progress.message.as_deref(), Some("embedding 12 chunks"));
    }

    #[test]
    fn test_job_progress_from_value_malformed_is_none() {
        // Wrong shape: percent is a string
        let value = serde_json::json!({"stage": "x", "percent": "eighty"});
        assert!(JobProgress::from_value(Some(&value)).is_none());
        // Not an object at all
        let value = serde_json::json!("free text");
        assert!(JobProgress::from_value(Some(&value)).is_none());
        assert!(JobProgress::from_value(None).is_none());
    }

    #[test]
    fn test_job_specific_data_from_value_partial() {
        let value = serde_json::json!({"max_retries": 5});
        let data = JobSpecificData::from_value(Some(&value)).unwrap();
        assert_eq!(data.max_retries, Some(5));
        assert!(data.chunking_strategy.is_none());
        assert!(data.request_headers.is_none());
    }

    #[test]
    fn test_job_specific_data_from_value_malformed_is_none() {
        let value = serde_json::json!({"max_retries": "five"});
        assert!(JobSpecificData::from_value(Some(&value)).is_none());
    }

    #[test]
    fn test_max_retries_override() {
        let mut job = sample_job();
        assert_eq!(job.max_retries(), crate::defaults::JOB_MAX_RETRIES);

        job.job_specific_data = Some(JobSpecificData {
            max_retries: Some(7),
            ..Default::default()
        });
        assert_eq!(job.max_retries(), 7);
    }

    #[test]
    fn test_queue_stats_missing_status_is_zero() {
        let stats = QueueStats::default();
        assert_eq!(stats.count(JobStatus::Queued), 0);
    }

    fn sample_job() -> IngestionJob {
        IngestionJob {
            id: Uuid::new_v4(),
            job_type: JobType::TextSnippet,
            source_identifier: "inline".to_string(),
            original_file_name: None,
            status: JobStatus::Queued,
            priority: 5,
            attempts: 0,
            last_attempt_at: None,
            next_attempt_at: None,
            progress: None,
            error_info: None,
            failed_stage: None,
            job_specific_data: None,
            related_object_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }
}
