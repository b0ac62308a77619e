//! Saga step definition.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value as JsonValue;

use tessera_core::Result;

/// Boxed future returned by a step action.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<JsonValue>> + Send>>;

/// Boxed future returned by a step compensation.
pub type CompensateFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

type ActionFn = Box<dyn Fn() -> ActionFuture + Send + Sync>;
type CompensateFn = Box<dyn Fn() -> CompensateFuture + Send + Sync>;

/// A named unit of saga work: an action, an optional compensation that
/// undoes the action's effect, and an optional retry policy.
///
/// Actions and compensations are factories, not futures: the executor may
/// invoke them more than once (retries), so they must be re-callable.
/// A step with no side effects (pure read) should omit the compensation;
/// every side-effecting step must supply one for the saga to be safely
/// reversible.
pub struct SagaStep {
    name: String,
    action: ActionFn,
    compensate: Option<CompensateFn>,
    retryable: bool,
    max_retries: u32,
}

impl SagaStep {
    /// Create a non-retryable step with no compensation.
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonValue>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(move || Box::pin(action())),
            compensate: None,
            retryable: false,
            max_retries: 0,
        }
    }

    /// Attach a compensation that undoes this step's effect.
    pub fn with_compensation<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.compensate = Some(Box::new(move || Box::pin(compensate())));
        self
    }

    /// Allow up to `max_retries` additional immediate attempts after a
    /// transient failure. Scheduled backoff belongs to the job queue, not
    /// to a single saga run.
    pub fn retryable(mut self, max_retries: u32) -> Self {
        self.retryable = true;
        self.max_retries = max_retries;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub(crate) fn run_action(&self) -> ActionFuture {
        (self.action)()
    }

    pub(crate) fn run_compensation(&self) -> Option<CompensateFuture> {
        self.compensate.as_ref().map(|c| c())
    }
}

impl std::fmt::Debug for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaStep")
            .field("name", &self.name)
            .field("has_compensation", &self.compensate.is_some())
            .field("retryable", &self.retryable)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_step_builder_defaults() {
        let step = SagaStep::new("read-rows", || async { Ok(json!(null)) });
        assert_eq!(step.name(), "read-rows");
        assert!(!step.is_retryable());
        assert_eq!(step.max_retries(), 0);
        assert!(step.run_compensation().is_none());
    }

    #[tokio::test]
    async fn test_step_action_is_recallable() {
        let step = SagaStep::new("count", || async { Ok(json!(1)) }).retryable(3);
        assert_eq!(step.run_action().await.unwrap(), json!(1));
        assert_eq!(step.run_action().await.unwrap(), json!(1));
        assert!(step.is_retryable());
        assert_eq!(step.max_retries(), 3);
    }

    #[tokio::test]
    async fn test_step_compensation_runs() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let undone = Arc::new(AtomicUsize::new(0));
        let undone_clone = undone.clone();
        let step = SagaStep::new("write", || async { Ok(json!(null)) }).with_compensation(
            move || {
                let undone = undone_clone.clone();
                async move {
                    undone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );

        step.run_compensation().unwrap().await.unwrap();
        assert_eq!(undone.load(Ordering::SeqCst), 1);
    }
}
