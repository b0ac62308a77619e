//! Ingestion pipeline, worker, and backends for tessera.
//!
//! This crate ties the pieces together: the [`IngestionPipeline`] runs the
//! embedding phase of a job as a compensating saga, the [`IngestWorker`]
//! drains the durable queue into the pipeline, and [`HttpVectorIndex`] and
//! [`ParagraphSplitter`] are the default production backends for the
//! `tessera-core` seams.

pub mod pipeline;
pub mod splitter;
pub mod vector_index;
pub mod worker;

pub use pipeline::{IngestionPipeline, PipelineOutcome};
pub use splitter::ParagraphSplitter;
pub use vector_index::HttpVectorIndex;
pub use worker::{IngestWorker, WorkerConfig, WorkerEvent, WorkerHandle};
