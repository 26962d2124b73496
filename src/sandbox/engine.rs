use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::MountMode;

/// Label attached to every container the runtime creates.
pub const SANDBOX_LABEL: &str = "cowork.sandbox=true";

#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    pub host: String,
    pub target: String,
    pub mode: MountMode,
}

/// Everything needed to start one disposable container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Shell command, run as `sh -c <command>`.
    pub command: String,
    pub working_dir: String,
    pub memory_mb: u64,
    pub cpu_shares: u64,
    pub network: String,
    pub mounts: Vec<Mount>,
    pub environment: BTreeMap<String, String>,
    pub labels: Vec<String>,
    pub stdin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The container engine behind the sandbox.
///
/// `run` blocks until the container's command exits. It does not remove
/// the container: teardown is always a separate `remove` call made by the
/// runtime, whatever happened to `run`.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Fails if the engine daemon cannot be reached.
    async fn ping(&self) -> anyhow::Result<()>;

    async fn run(&self, spec: &ContainerSpec) -> anyhow::Result<CommandOutput>;

    /// Force-removes a container. Removing a missing container is not an error.
    async fn remove(&self, name: &str) -> anyhow::Result<()>;

    /// Names of all containers (running or not) carrying `label`.
    async fn list(&self, label: &str) -> anyhow::Result<Vec<String>>;
}
