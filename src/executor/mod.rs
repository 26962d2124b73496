//! Step-by-step plan execution.

pub mod actions;
pub mod continuation;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ExecutorConfig;
use crate::error::{ToolError, ToolResult};
use crate::policy::{Authorization, PolicyEngine};
use crate::task::{
    ErrorRecord, ExecutionContext, ExecutionResult, ExecutionStatus, Plan, Step, StepStatus,
};
use crate::tools::{validate_arguments, ToolContext, ToolRegistry};

pub use actions::PseudoAction;
pub use continuation::{Continuation, ContinuationPolicy, ContinueUnlessFatal, StopOnError};

/// How the in-flight step ended.
enum StepOutcome {
    Finished(ToolResult<Value>),
    Cancelled,
    DeadlineExceeded,
}

/// Drives a plan's steps, strictly in order, through the tool registry.
///
/// Every step goes through the same gate: pseudo-action or registry lookup,
/// argument validation, policy authorization (with confirmation if the
/// policy asks for it), then the tool under the per-tool deadline. Tool
/// failures, panics included, become step failures; `execute` always
/// returns a complete [`ExecutionResult`].
pub struct Executor {
    registry: Arc<ToolRegistry>,
    policy: Arc<PolicyEngine>,
    continuation: Arc<dyn ContinuationPolicy>,
    tool_timeout: Duration,
    max_execution_time: Duration,
}

impl Executor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        policy: Arc<PolicyEngine>,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            policy,
            continuation: continuation::from_mode(config.continuation),
            tool_timeout: config.tool_timeout(),
            max_execution_time: config.max_execution_time(),
        }
    }

    pub fn with_continuation(mut self, continuation: Arc<dyn ContinuationPolicy>) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute(&self, plan: Plan, context: Option<ExecutionContext>) -> ExecutionResult {
        self.execute_with_cancel(plan, context, CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but stops when `cancel` fires.
    ///
    /// Cancellation is checked before each step and raced against the step
    /// in flight; a cancelled step is marked failed with kind `cancelled`.
    pub async fn execute_with_cancel(
        &self,
        mut plan: Plan,
        context: Option<ExecutionContext>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut context = context.unwrap_or_else(|| ExecutionContext::for_plan(&plan));
        let limit = self.max_execution_time.min(self.policy.max_execution_time());
        let deadline = clock + limit;
        let mut cancelled = false;
        let mut run_error: Option<String> = None;

        info!(
            "[{}] Executing plan: {} ({} steps)",
            context.task_id,
            plan.goal,
            plan.steps.len()
        );

        for index in 0..plan.steps.len() {
            let number = plan.steps[index].step;
            if plan.steps[index].status == StepStatus::Skipped {
                debug!("[{}] Step {number} marked skipped", context.task_id);
                continue;
            }
            if cancel.is_cancelled() {
                cancelled = true;
                run_error = Some(format!("run cancelled before step {number}"));
                break;
            }
            if Instant::now() >= deadline {
                run_error = Some(deadline_message(limit));
                break;
            }

            let action = plan.steps[index].action.clone();
            let arguments = plan.steps[index].arguments.clone();
            plan.steps[index].status = StepStatus::Running;
            plan.steps[index].timestamp = Some(Utc::now());
            context.current_step = number;
            info!("[{}] Step {number}: {action}", context.task_id);

            let step_clock = Instant::now();
            let outcome = {
                let run = AssertUnwindSafe(self.run_step(number, &action, &arguments, &mut context))
                    .catch_unwind();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => StepOutcome::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => StepOutcome::DeadlineExceeded,
                    result = run => StepOutcome::Finished(result.unwrap_or_else(|panic| {
                        Err(ToolError::Execution(format!(
                            "tool panicked: {}",
                            panic_message(panic.as_ref())
                        )))
                    })),
                }
            };

            let step = &mut plan.steps[index];
            step.duration_ms = step_clock.elapsed().as_millis() as u64;

            match outcome {
                StepOutcome::Finished(Ok(value)) => {
                    step.status = StepStatus::Success;
                    step.result = Some(value.clone());
                    context.observe(number, value);
                    info!(
                        "[{}] Step {number} succeeded in {}ms",
                        context.task_id, step.duration_ms
                    );
                }
                StepOutcome::Finished(Err(e)) => {
                    record_failure(step, &mut context, &e);
                    match self.continuation.decide(step, e.kind(), &context) {
                        Continuation::Stop => {
                            run_error = Some(format!("step {number} ({action}) failed: {e}"));
                            break;
                        }
                        Continuation::Continue => {
                            warn!("[{}] Continuing after failed step {number}", context.task_id);
                        }
                    }
                }
                StepOutcome::Cancelled => {
                    record_failure(step, &mut context, &ToolError::Cancelled);
                    cancelled = true;
                    run_error = Some(format!("run cancelled during step {number}"));
                    break;
                }
                StepOutcome::DeadlineExceeded => {
                    let e = ToolError::Timeout {
                        secs: limit.as_secs(),
                    };
                    record_failure(step, &mut context, &e);
                    run_error = Some(deadline_message(limit));
                    break;
                }
            }
        }

        let status = if cancelled {
            ExecutionStatus::Cancelled
        } else if run_error.is_none() && plan.all_succeeded() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };
        if status == ExecutionStatus::Failed && run_error.is_none() {
            run_error = Some(format!(
                "{} step(s) failed",
                plan.count_with_status(StepStatus::Failed)
            ));
        }

        let summary = summarize(&plan);
        info!("[{}] Plan finished ({status:?}): {summary}", context.task_id);

        ExecutionResult {
            status,
            plan,
            context,
            error: run_error,
            summary,
            duration_ms: clock.elapsed().as_millis() as u64,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Everything between "step is running" and "step has a result".
    async fn run_step(
        &self,
        number: u32,
        action: &str,
        arguments: &Map<String, Value>,
        context: &mut ExecutionContext,
    ) -> ToolResult<Value> {
        if let Some(pseudo) = PseudoAction::parse(action) {
            return pseudo.perform(number, arguments, context).await;
        }

        let tool = self
            .registry
            .get(action)
            .ok_or_else(|| ToolError::UnknownTool(action.to_string()))?;
        let args = validate_arguments(&tool.parameters(), arguments)?;
        let accesses = tool.accesses(&args);
        let task_id = context.task_id.clone();

        match self.policy.authorize(Some(&task_id), action, &args, &accesses) {
            Authorization::Allowed => {}
            Authorization::Denied(reason) => {
                warn!("[{task_id}] Step {number} denied: {reason}");
                return Err(ToolError::PermissionDenied(reason));
            }
            Authorization::NeedsConfirmation(prompt) => {
                let confirmed = self.policy.confirm(Some(&task_id), action, &prompt).await;
                context.push_metadata(
                    "confirmations",
                    json!({
                        "step": number,
                        "action": action,
                        "prompt": prompt,
                        "confirmed": confirmed,
                    }),
                );
                if !confirmed {
                    return Err(ToolError::PermissionDenied(format!("not confirmed: {prompt}")));
                }
            }
        }

        let ctx = ToolContext::new(task_id, number, self.tool_timeout);
        if tool.enforces_timeout() {
            return tool.invoke(&args, &ctx).await;
        }
        match tokio::time::timeout(self.tool_timeout, tool.invoke(&args, &ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                secs: self.tool_timeout.as_secs(),
            }),
        }
    }
}

fn record_failure(step: &mut Step, context: &mut ExecutionContext, err: &ToolError) {
    let kind = err.kind();
    step.status = StepStatus::Failed;
    step.error = Some(err.to_string());
    step.error_kind = Some(kind);
    context.errors.push(ErrorRecord {
        step: step.step,
        action: step.action.clone(),
        error: err.to_string(),
        kind,
    });
    error!(
        "[{}] Step {} ({}) failed [{kind}]: {err}",
        context.task_id, step.step, step.action
    );
}

fn deadline_message(limit: Duration) -> String {
    format!("run exceeded max execution time of {}s", limit.as_secs())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn summarize(plan: &Plan) -> String {
    format!(
        "{} of {} steps succeeded ({} failed, {} skipped, {} not run)",
        plan.count_with_status(StepStatus::Success),
        plan.steps.len(),
        plan.count_with_status(StepStatus::Failed),
        plan.count_with_status(StepStatus::Skipped),
        plan.count_with_status(StepStatus::Pending),
    )
}
