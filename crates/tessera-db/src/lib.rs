//! PostgreSQL persistence layer for the tessera ingestion engine.
//!
//! Provides the concrete repositories behind the `tessera-core` traits:
//! the durable job queue, source objects, chunks, and embedding records,
//! plus in-memory implementations for tests and embedded use.
//!
//! All queries are runtime-checked (`sqlx::query`), so the crate builds
//! without a live database.

pub mod chunks;
pub mod embeddings;
pub mod jobs;
pub mod memory;
pub mod objects;
pub mod pool;
pub mod schema;

pub use chunks::PgChunkRepository;
pub use embeddings::PgEmbeddingRepository;
pub use jobs::PgJobRepository;
pub use memory::{
    MemoryChunkRepository, MemoryEmbeddingRepository, MemoryJobRepository,
    MemoryObjectRepository, MemoryVectorIndex,
};
pub use objects::PgObjectRepository;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use schema::{apply_schema, SCHEMA};

// Re-export the core types so downstream crates can depend on this one alone.
pub use tessera_core::*;
