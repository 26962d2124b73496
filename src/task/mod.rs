//! Plan, step and run records shared by the executor and its callers.

pub mod context;
pub mod plan;

pub use context::{ErrorRecord, ExecutionContext, ExecutionResult, ExecutionStatus};
pub use plan::{Plan, PlanError, Step, StepStatus};
