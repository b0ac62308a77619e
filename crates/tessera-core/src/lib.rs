//! # tessera-core
//!
//! Core types, traits, and abstractions for tessera's content-ingestion
//! engine.
//!
//! This crate provides:
//! - The ingestion job data model and its lifecycle state machine
//! - Repository traits for jobs, objects, chunks, embeddings, and the
//!   external vector index (implemented by `tessera-db` and by in-memory
//!   fakes)
//! - The shared error taxonomy, including the transient/fatal split the
//!   saga executor relies on
//! - Centralized defaults and UUIDv7 helpers

pub mod defaults;
pub mod error;
pub mod models;
pub mod traits;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use models::{
    Chunk, ChunkPayload, CreateJobRequest, EmbeddingRecord, IngestionJob, JobProgress,
    JobSpecificData, JobStatus, JobType, ObjectStatus, QueueStats, SourceObject,
    UpdateJobRequest, VectorDocument,
};
pub use traits::{
    ChunkRepository, EmbeddingRepository, JobRepository, ObjectRepository, Splitter, VectorIndex,
};
pub use uuid_utils::new_v7;
