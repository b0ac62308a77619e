//! Centralized default constants for tessera.
//!
//! **This module is the single source of truth** for all shared default
//! values. Crates reference these constants instead of defining their own
//! magic numbers. When adding new constants, place them in the appropriate
//! section and document the rationale for the chosen value.

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default maximum retry count for failed jobs (queue level).
pub const JOB_MAX_RETRIES: i32 = 3;

/// Fixed delay before a retry-pending job becomes due again, in
/// milliseconds. The backoff policy is fixed-delay, not exponential.
pub const JOB_RETRY_BACKOFF_MS: i64 = 30_000;

/// Default polling interval for the ingest worker (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Default maximum number of concurrently processed jobs.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Days a terminal job is retained before cleanup deletes it.
pub const JOB_RETENTION_DAYS: i64 = 7;

/// How often the worker run loop triggers retention cleanup (seconds).
pub const JOB_CLEANUP_INTERVAL_SECS: u64 = 3_600;

// =============================================================================
// SAGA STEPS
// =============================================================================

/// Default in-saga retry budget for retryable steps. Retries here are
/// immediate; scheduled backoff belongs to the job queue, not to a single
/// saga run.
pub const STEP_MAX_RETRIES: u32 = 2;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name recorded on embedding records.
pub const EMBED_MODEL: &str = "nomic-embed-text";

/// Timeout for vector index requests in seconds.
pub const VECTOR_INDEX_TIMEOUT_SECS: u64 = 30;

/// Default vector index base URL.
pub const VECTOR_INDEX_URL: &str = "http://127.0.0.1:6333";

// =============================================================================
// CHUNKING
// =============================================================================

/// Maximum characters per chunk for the default splitter.
pub const CHUNK_SIZE: usize = 1000;

/// Minimum characters per chunk (smaller paragraphs are merged forward).
pub const CHUNK_MIN_SIZE: usize = 100;

// =============================================================================
// EVENTS
// =============================================================================

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;
