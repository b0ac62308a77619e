//! # tessera-saga
//!
//! Generic, domain-agnostic saga executor: an ordered list of steps, each
//! with an action, an optional compensation, and an optional retry policy,
//! used to approximate an atomic transaction across stores that cannot
//! share one.
//!
//! This crate knows nothing about chunks, embeddings, or jobs.
//!
//! ## Example
//!
//! ```ignore
//! use tessera_saga::{execute_saga, SagaContext, SagaStep};
//!
//! let steps = vec![
//!     SagaStep::new("reserve", || async { /* ... */ Ok(serde_json::json!(null)) })
//!         .with_compensation(|| async { /* release */ Ok(()) })
//!         .retryable(2),
//!     SagaStep::new("confirm", || async { Ok(serde_json::json!(null)) }),
//! ];
//!
//! let result = execute_saga(&steps, &SagaContext::new("reservation")).await;
//! assert!(result.success);
//! ```

pub mod executor;
pub mod step;

pub use executor::{execute_saga, CompletedStep, FailedStep, SagaContext, SagaResult};
pub use step::{ActionFuture, CompensateFuture, SagaStep};
