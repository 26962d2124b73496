//! Disposable, resource-bounded containers for running shell commands.

pub mod docker;
pub mod engine;
pub mod probe;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use docker::DockerEngine;
pub use engine::{CommandOutput, ContainerEngine, ContainerSpec, Mount, SANDBOX_LABEL};
pub use runtime::{HealthReport, SandboxRuntime};
