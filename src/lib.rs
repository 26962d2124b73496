//! Executes multi-step task plans. Each step invokes a tool after the
//! policy engine has cleared it, and shell commands run inside throwaway
//! containers.

pub mod config;
pub mod error;
pub mod executor;
pub mod policy;
pub mod sandbox;
pub mod task;
pub mod tools;

pub use config::Config;
pub use error::{ErrorKind, ToolError};
pub use executor::Executor;
pub use policy::{Policy, PolicyEngine};
pub use sandbox::SandboxRuntime;
pub use task::{ExecutionContext, ExecutionResult, ExecutionStatus, Plan, Step, StepStatus};
pub use tools::{Tool, ToolRegistry};
