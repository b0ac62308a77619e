//! Saga execution: strict-order actions, immediate retries, reverse-order
//! best-effort compensation.

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::step::SagaStep;

/// Context for one saga run.
#[derive(Debug, Clone)]
pub struct SagaContext {
    /// Name used in logs to correlate a run's steps and compensations.
    pub saga_name: String,
}

impl SagaContext {
    pub fn new(saga_name: impl Into<String>) -> Self {
        Self {
            saga_name: saga_name.into(),
        }
    }
}

/// A step that ran to success.
#[derive(Debug, Clone)]
pub struct CompletedStep {
    pub step_name: String,
    pub result: JsonValue,
    /// Retries consumed before success (0 = first attempt succeeded).
    pub retries: u32,
}

/// The step that ended a failed run.
#[derive(Debug, Clone)]
pub struct FailedStep {
    pub step_name: String,
    /// Retries consumed before giving up.
    pub retries: u32,
    pub error: String,
    /// Whether the terminal error was transient. Callers use this to decide
    /// if re-running the whole saga later could succeed.
    pub retryable: bool,
}

/// Outcome of one [`execute_saga`] call.
///
/// `completed_steps` holds only steps that succeeded, in execution order;
/// the failed step is never among them. `compensated_steps` is a subset of
/// the completed steps' names, in the (reverse) order compensation was
/// attempted, excluding compensations that themselves failed.
#[derive(Debug, Clone, Default)]
pub struct SagaResult {
    pub success: bool,
    pub completed_steps: Vec<CompletedStep>,
    pub failed_step: Option<FailedStep>,
    pub error: Option<String>,
    pub compensated_steps: Vec<String>,
}

/// Execute the steps strictly in order.
///
/// Each step's action is attempted, with up to `max_retries` immediate
/// re-attempts if the step is retryable and the error is transient
/// ([`tessera_core::Error::is_retryable`]). Shape and configuration errors
/// fail the step at once regardless of its retry policy; retrying the same
/// inputs cannot fix them.
///
/// When a step fails, compensations of all previously completed steps run
/// in strict reverse order. A compensation failure is logged and recorded
/// by omission from `compensated_steps`, but never aborts compensation of
/// the remaining steps: the run's failure is already determined, and
/// rollback exists to minimize residual state, not to resurrect success.
///
/// An empty step list succeeds trivially.
pub async fn execute_saga(steps: &[SagaStep], ctx: &SagaContext) -> SagaResult {
    let mut result = SagaResult {
        success: true,
        ..Default::default()
    };

    debug!(
        subsystem = "saga",
        op = "execute",
        saga = %ctx.saga_name,
        step_count = steps.len(),
        "Starting saga"
    );

    for (idx, step) in steps.iter().enumerate() {
        let mut retries: u32 = 0;
        let outcome = loop {
            match step.run_action().await {
                Ok(value) => break Ok(value),
                Err(e) => {
                    let budget_left = step.is_retryable() && retries < step.max_retries();
                    if budget_left && e.is_retryable() {
                        retries += 1;
                        warn!(
                            subsystem = "saga",
                            saga = %ctx.saga_name,
                            step = step.name(),
                            retry = retries,
                            max_retries = step.max_retries(),
                            error = %e,
                            "Step failed, retrying immediately"
                        );
                        continue;
                    }
                    break Err(e);
                }
            }
        };

        match outcome {
            Ok(value) => {
                debug!(
                    subsystem = "saga",
                    saga = %ctx.saga_name,
                    step = step.name(),
                    retries,
                    "Step completed"
                );
                result.completed_steps.push(CompletedStep {
                    step_name: step.name().to_string(),
                    result: value,
                    retries,
                });
            }
            Err(e) => {
                warn!(
                    subsystem = "saga",
                    saga = %ctx.saga_name,
                    step = step.name(),
                    retries,
                    error = %e,
                    "Step failed, compensating completed steps"
                );
                result.success = false;
                result.error = Some(e.to_string());
                result.failed_step = Some(FailedStep {
                    step_name: step.name().to_string(),
                    retries,
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                });

                compensate(&steps[..idx], ctx, &mut result).await;

                info!(
                    subsystem = "saga",
                    op = "execute",
                    saga = %ctx.saga_name,
                    failed_step = step.name(),
                    completed = result.completed_steps.len(),
                    compensated = result.compensated_steps.len(),
                    "Saga failed"
                );
                return result;
            }
        }
    }

    info!(
        subsystem = "saga",
        op = "execute",
        saga = %ctx.saga_name,
        completed = result.completed_steps.len(),
        "Saga completed"
    );
    result
}

/// Run compensations for the given completed steps in reverse order.
async fn compensate(completed: &[SagaStep], ctx: &SagaContext, result: &mut SagaResult) {
    for step in completed.iter().rev() {
        let Some(fut) = step.run_compensation() else {
            // Pure read, nothing to undo.
            debug!(
                subsystem = "saga",
                saga = %ctx.saga_name,
                step = step.name(),
                "No compensation for step, skipping"
            );
            continue;
        };

        match fut.await {
            Ok(()) => {
                debug!(
                    subsystem = "saga",
                    saga = %ctx.saga_name,
                    step = step.name(),
                    "Compensated step"
                );
                result.compensated_steps.push(step.name().to_string());
            }
            Err(e) => {
                // Best effort: residual state is logged, later steps still
                // get their chance to roll back.
                warn!(
                    subsystem = "saga",
                    saga = %ctx.saga_name,
                    step = step.name(),
                    error = %e,
                    "Compensation failed, continuing rollback"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::SagaStep;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tessera_core::Error;

    fn ok_step(name: &str, log: &Arc<Mutex<Vec<String>>>) -> SagaStep {
        let action_log = log.clone();
        let comp_log = log.clone();
        let step_name = name.to_string();
        let comp_name = name.to_string();
        SagaStep::new(name, move || {
            let log = action_log.clone();
            let name = step_name.clone();
            async move {
                log.lock().unwrap().push(format!("run:{name}"));
                Ok(json!(name))
            }
        })
        .with_compensation(move || {
            let log = comp_log.clone();
            let name = comp_name.clone();
            async move {
                log.lock().unwrap().push(format!("undo:{name}"));
                Ok(())
            }
        })
    }

    fn failing_step(name: &str) -> SagaStep {
        SagaStep::new(name, || async {
            Err(Error::VectorIndex("boom".to_string()))
        })
    }

    #[tokio::test]
    async fn test_empty_saga_succeeds_trivially() {
        let result = execute_saga(&[], &SagaContext::new("empty")).await;
        assert!(result.success);
        assert!(result.completed_steps.is_empty());
        assert!(result.compensated_steps.is_empty());
        assert!(result.failed_step.is_none());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let steps = vec![ok_step("a", &log), ok_step("b", &log)];

        let result = execute_saga(&steps, &SagaContext::new("happy")).await;

        assert!(result.success);
        assert_eq!(result.completed_steps.len(), 2);
        assert_eq!(result.completed_steps[0].step_name, "a");
        assert_eq!(result.completed_steps[0].result, json!("a"));
        assert_eq!(result.completed_steps[0].retries, 0);
        assert!(result.compensated_steps.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["run:a", "run:b"]);
    }

    // Scenario A: 3-step saga, step 3 throws. Two completed steps are
    // compensated in reverse order; the failed step is not compensated.
    #[tokio::test]
    async fn test_failure_compensates_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let steps = vec![
            ok_step("step1", &log),
            ok_step("step2", &log),
            failing_step("step3"),
        ];

        let result = execute_saga(&steps, &SagaContext::new("scenario-a")).await;

        assert!(!result.success);
        assert_eq!(result.completed_steps.len(), 2);
        assert_eq!(result.compensated_steps, vec!["step2", "step1"]);
        assert!(!result.compensated_steps.contains(&"step3".to_string()));
        let failed = result.failed_step.unwrap();
        assert_eq!(failed.step_name, "step3");
        assert_eq!(failed.retries, 0);
        assert!(failed.error.contains("boom"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["run:step1", "run:step2", "undo:step2", "undo:step1"]
        );
    }

    // Scenario C: fails twice then succeeds with max_retries = 3.
    #[tokio::test]
    async fn test_retryable_step_eventually_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let steps = vec![SagaStep::new("flaky", move || {
            let attempts = attempts_clone.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Request("transient".to_string()))
                } else {
                    Ok(json!("done"))
                }
            }
        })
        .retryable(3)];

        let result = execute_saga(&steps, &SagaContext::new("scenario-c")).await;

        assert!(result.success);
        assert_eq!(result.completed_steps[0].retries, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    // Retry budget respected: max_retries = M means at most M+1 attempts.
    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let steps = vec![SagaStep::new("always-fails", move || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::Request("still down".to_string()))
            }
        })
        .retryable(2)];

        let result = execute_saga(&steps, &SagaContext::new("budget")).await;

        assert!(!result.success);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(result.failed_step.unwrap().retries, 2);
    }

    // Non-retryable steps fail fast with retries = 0.
    #[tokio::test]
    async fn test_non_retryable_step_fails_fast() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let steps = vec![SagaStep::new("once", move || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::Request("down".to_string()))
            }
        })];

        let result = execute_saga(&steps, &SagaContext::new("fail-fast")).await;

        assert!(!result.success);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(result.failed_step.unwrap().retries, 0);
    }

    // A shape error must not consume the retry budget even on a retryable
    // step: retrying the same inputs cannot fix a contract violation.
    #[tokio::test]
    async fn test_fatal_error_short_circuits_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let steps = vec![SagaStep::new("mismatch", move || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::InvalidInput("vector ID count mismatch".to_string()))
            }
        })
        .retryable(5)];

        let result = execute_saga(&steps, &SagaContext::new("shape-error")).await;

        assert!(!result.success);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        let failed = result.failed_step.unwrap();
        assert_eq!(failed.retries, 0);
        assert!(!failed.retryable);
        assert!(failed.error.contains("count mismatch"));
    }

    // Scenario D: one compensation throws; the other completed step's
    // compensation still runs and is recorded.
    #[tokio::test]
    async fn test_compensation_failure_does_not_abort_rollback() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();

        let bad_comp = SagaStep::new("step2", || async { Ok(json!(null)) }).with_compensation(
            || async { Err(Error::VectorIndex("undo failed".to_string())) },
        );

        let steps = vec![ok_step("step1", &log_clone), bad_comp, failing_step("step3")];

        let result = execute_saga(&steps, &SagaContext::new("scenario-d")).await;

        assert!(!result.success);
        // step2's compensation failed and is excluded; step1's still ran.
        assert_eq!(result.compensated_steps, vec!["step1"]);
        assert!(log.lock().unwrap().contains(&"undo:step1".to_string()));
    }

    // Steps without compensation are skipped during rollback without error.
    #[tokio::test]
    async fn test_pure_read_steps_are_skipped_in_rollback() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let read_step = SagaStep::new("read", || async { Ok(json!([1, 2, 3])) });
        let steps = vec![ok_step("write", &log), read_step, failing_step("fail")];

        let result = execute_saga(&steps, &SagaContext::new("pure-read")).await;

        assert!(!result.success);
        assert_eq!(result.completed_steps.len(), 2);
        assert_eq!(result.compensated_steps, vec!["write"]);
    }
}
