//! Execution engine for a single classified intent
//!
//! Invokes the tool behind an intent with a per-attempt timeout, retries
//! retryable failures with exponential backoff, and records every attempt
//! as an `ExecutionStep`. Cancellation is observed both during the call and
//! while waiting to retry.
//!
//! Each call runs on its own task, so a panicking tool fails its step
//! instead of unwinding through the turn.

use crate::config::AgentConfig;
use crate::error::OrchestrationError;
use crate::models::{ExecutionStep, Intent, Query, StepError, StepStatus, TurnState};
use crate::tools::{InvocationContext, ToolDescriptor};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{AbortHandle, JoinError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Every attempt made for one intent, and how it ended
#[derive(Debug)]
pub struct StepOutcome {
    pub attempts: Vec<ExecutionStep>,
    pub result: Result<Value>,
}

pub struct ExecutionEngine {
    config: AgentConfig,
}

impl ExecutionEngine {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Attempts allowed for `descriptor`: the retry budget for idempotent
    /// tools, exactly one otherwise, never above the tool's own cap.
    pub fn attempt_limit(&self, descriptor: &ToolDescriptor) -> u32 {
        let budget = if descriptor.idempotent {
            self.config.retry_budget.max(1)
        } else {
            1
        };
        descriptor
            .max_attempts
            .map_or(budget, |cap| budget.min(cap.max(1)))
    }

    pub async fn execute(
        &self,
        intent_index: usize,
        intent: &Intent,
        descriptor: &ToolDescriptor,
        query: &Query,
        cancel: &CancellationToken,
        trace: &mut Vec<TurnState>,
    ) -> StepOutcome {
        let mut attempts = Vec::new();

        let missing = descriptor.schema.missing_required(&intent.params);
        if !missing.is_empty() {
            let err = OrchestrationError::InvalidInput(format!(
                "{} is missing required parameters: {}",
                descriptor.name,
                missing.join(", ")
            ));
            let mut step = ExecutionStep::pending(intent_index, 1, descriptor.name, intent.params.clone());
            fail(&mut step, &err);
            attempts.push(step);
            return StepOutcome {
                attempts,
                result: Err(err),
            };
        }

        let limit = self.attempt_limit(descriptor);
        let timeout = descriptor.timeout.unwrap_or(self.config.default_tool_timeout);
        let timeout_ms = timeout.as_millis() as u64;
        let mut attempt = 1;

        loop {
            let mut step =
                ExecutionStep::pending(intent_index, attempt, descriptor.name, intent.params.clone());
            step.status = StepStatus::Running;

            let ctx = InvocationContext {
                session_id: query.session_id.clone(),
                query_id: query.id,
                attempt,
            };

            debug!(
                query_id = %query.id,
                tool = %descriptor.name,
                attempt,
                limit,
                "Invoking tool"
            );

            let handler = Arc::clone(&descriptor.handler);
            let params = intent.params.clone();
            let call = tokio::spawn(async move { handler.invoke(&ctx, &params).await });
            // Timeouts and cancellation must not leave the call running.
            let _guard = AbortOnDrop(call.abort_handle());

            let start = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(OrchestrationError::Cancelled(format!(
                    "{} cancelled during attempt {}",
                    descriptor.name, attempt
                ))),
                joined = tokio::time::timeout(timeout, call) => match joined {
                    Ok(Ok(invoked)) => invoked,
                    Ok(Err(err)) => Err(join_failure(descriptor, err)),
                    Err(_) => Err(OrchestrationError::Timeout(timeout_ms)),
                },
            };
            step.elapsed_ms = start.elapsed().as_millis() as u64;

            let err = match result {
                Ok(value) => {
                    step.status = StepStatus::Succeeded;
                    step.result = Some(value.clone());
                    attempts.push(step);
                    return StepOutcome {
                        attempts,
                        result: Ok(value),
                    };
                }
                Err(err) => err,
            };

            fail(&mut step, &err);
            attempts.push(step);

            if !err.is_retryable() || attempt >= limit {
                warn!(
                    query_id = %query.id,
                    tool = %descriptor.name,
                    attempts = attempt,
                    error = %err,
                    "Tool failed"
                );
                return StepOutcome {
                    attempts,
                    result: Err(err),
                };
            }

            attempt += 1;
            let delay = self.config.backoff_for(attempt);
            trace.push(TurnState::Retrying);
            warn!(
                query_id = %query.id,
                tool = %descriptor.name,
                error = %err,
                retry_attempt = attempt,
                retry_in_ms = delay.as_millis() as u64,
                "Retrying tool after retryable error"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return StepOutcome {
                        attempts,
                        result: Err(OrchestrationError::Cancelled(format!(
                            "{} cancelled while waiting to retry",
                            descriptor.name
                        ))),
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
            trace.push(TurnState::Executing);
        }
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn join_failure(descriptor: &ToolDescriptor, err: JoinError) -> OrchestrationError {
    if err.is_panic() {
        OrchestrationError::Internal(format!("{} panicked", descriptor.name))
    } else {
        OrchestrationError::Internal(format!("{} task aborted", descriptor.name))
    }
}

fn fail(step: &mut ExecutionStep, err: &OrchestrationError) {
    step.status = StepStatus::Failed;
    step.error = Some(StepError {
        kind: err.kind(),
        detail: err.to_string(),
    });
}
