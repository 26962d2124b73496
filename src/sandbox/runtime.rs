use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::engine::{CommandOutput, ContainerEngine, ContainerSpec, Mount, SANDBOX_LABEL};
use super::probe::{wait_for_engine, Backoff};
use crate::config::SandboxConfig;
use crate::error::ToolError;

type InFlight = Arc<Mutex<HashSet<String>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashSet<String>> {
    in_flight.lock().unwrap_or_else(|p| p.into_inner())
}

/// Result of [`SandboxRuntime::health_check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub engine_reachable: bool,
    /// Labelled containers that no invocation currently owns.
    pub leaked: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.engine_reachable && self.leaked.is_empty()
    }
}

/// Runs one shell command per call inside a fresh, disposable container.
///
/// Commands are refused until [`start`](Self::start) has seen the engine
/// answer. Every container is removed after its command finishes, fails or
/// times out; if the calling future is dropped first, the removal is spawned
/// onto the tokio runtime instead.
pub struct SandboxRuntime {
    engine: Arc<dyn ContainerEngine>,
    config: SandboxConfig,
    network: String,
    available: AtomicBool,
    in_flight: InFlight,
}

impl SandboxRuntime {
    /// `allow_network` comes from the policy; when false the container
    /// network is "none" whatever the config says.
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        config: SandboxConfig,
        allow_network: bool,
    ) -> Self {
        let network = if allow_network {
            config.network.clone()
        } else {
            "none".to_string()
        };
        Self {
            engine,
            config,
            network,
            available: AtomicBool::new(false),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Probes the engine. Commands are accepted only after this succeeds.
    pub async fn start(&self) -> Result<(), ToolError> {
        if !self.config.enabled {
            return Err(ToolError::SandboxUnavailable(
                "sandbox disabled in configuration".to_string(),
            ));
        }
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(5), 2);
        match wait_for_engine(self.engine.as_ref(), self.config.probe_attempts, backoff).await {
            Ok(()) => {
                self.available.store(true, Ordering::SeqCst);
                info!("Sandbox ready: {}", self.config.describe());
                Ok(())
            }
            Err(e) => {
                self.available.store(false, Ordering::SeqCst);
                Err(ToolError::SandboxUnavailable(e.to_string()))
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Runs `command` with `sh -c` in a new container.
    ///
    /// A non-zero exit code is returned as output, not as an error.
    pub async fn run_command(
        &self,
        command: &str,
        working_dir: Option<&str>,
        input: Option<&str>,
    ) -> Result<CommandOutput, ToolError> {
        self.run_command_within(command, working_dir, input, self.config.timeout())
            .await
    }

    /// [`run_command`](Self::run_command) bounded by the smaller of `limit`
    /// and the configured timeout. The container is gone by the time a
    /// `timeout` error is returned.
    pub async fn run_command_within(
        &self,
        command: &str,
        working_dir: Option<&str>,
        input: Option<&str>,
        limit: Duration,
    ) -> Result<CommandOutput, ToolError> {
        if !self.is_available() {
            return Err(ToolError::SandboxUnavailable(
                "container engine has not passed its health check".to_string(),
            ));
        }

        let name = container_name();
        let spec = self.container_spec(&name, command, working_dir, input);
        info!("Sandbox {name}: {command}");

        let guard = TeardownGuard::arm(self.engine.clone(), self.in_flight.clone(), name.clone());
        let limit = limit.min(self.config.timeout());
        let outcome = tokio::time::timeout(limit, self.engine.run(&spec)).await;
        guard.teardown().await;

        match outcome {
            Ok(Ok(output)) => {
                debug!("Sandbox {name} exited with {}", output.exit_code);
                Ok(output)
            }
            Ok(Err(e)) => Err(ToolError::Execution(format!("container {name} failed: {e}"))),
            Err(_) => {
                warn!("Sandbox {name} exceeded {}s, container removed", limit.as_secs());
                Err(ToolError::Timeout {
                    secs: limit.as_secs(),
                })
            }
        }
    }

    /// Engine reachability plus any labelled containers nobody is running.
    pub async fn health_check(&self) -> HealthReport {
        if let Err(e) = self.engine.ping().await {
            warn!("Sandbox health check: engine unreachable: {e}");
            return HealthReport {
                engine_reachable: false,
                leaked: Vec::new(),
            };
        }
        let names = match self.engine.list(SANDBOX_LABEL).await {
            Ok(names) => names,
            Err(e) => {
                warn!("Sandbox health check: cannot list containers: {e}");
                return HealthReport {
                    engine_reachable: false,
                    leaked: Vec::new(),
                };
            }
        };
        let in_flight = lock(&self.in_flight);
        let mut leaked: Vec<String> = names
            .into_iter()
            .filter(|n| !in_flight.contains(n))
            .collect();
        leaked.sort();
        HealthReport {
            engine_reachable: true,
            leaked,
        }
    }

    fn container_spec(
        &self,
        name: &str,
        command: &str,
        working_dir: Option<&str>,
        input: Option<&str>,
    ) -> ContainerSpec {
        let mounts = self
            .config
            .mounts
            .iter()
            .map(|m| Mount {
                host: m.host.display().to_string(),
                target: m
                    .target
                    .clone()
                    .unwrap_or_else(|| default_target(&self.config.working_dir, &m.host)),
                mode: m.mode,
            })
            .collect();
        ContainerSpec {
            name: name.to_string(),
            image: self.config.image.clone(),
            command: command.to_string(),
            working_dir: working_dir
                .filter(|w| !w.is_empty())
                .unwrap_or(&self.config.working_dir)
                .to_string(),
            memory_mb: self.config.memory_mb,
            cpu_shares: self.config.cpu_shares,
            network: self.network.clone(),
            mounts,
            environment: self.config.environment.clone(),
            labels: vec![SANDBOX_LABEL.to_string()],
            stdin: input.map(str::to_string),
        }
    }
}

fn container_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("cowork-{}", &id[..12])
}

/// `<working_dir>/<basename of host>`
fn default_target(working_dir: &str, host: &Path) -> String {
    match host.file_name() {
        Some(base) => format!(
            "{}/{}",
            working_dir.trim_end_matches('/'),
            base.to_string_lossy()
        ),
        None => working_dir.to_string(),
    }
}

/// Owns one container name until it has been removed.
struct TeardownGuard {
    engine: Arc<dyn ContainerEngine>,
    in_flight: InFlight,
    name: String,
    armed: bool,
}

impl TeardownGuard {
    fn arm(engine: Arc<dyn ContainerEngine>, in_flight: InFlight, name: String) -> Self {
        lock(&in_flight).insert(name.clone());
        Self {
            engine,
            in_flight,
            name,
            armed: true,
        }
    }

    async fn teardown(mut self) {
        remove_container(self.engine.as_ref(), &self.in_flight, &self.name).await;
        // Only disarm once removal finished; a drop mid-removal retries it.
        self.armed = false;
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let engine = self.engine.clone();
        let in_flight = self.in_flight.clone();
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Sandbox {name} abandoned, removing in background");
                handle.spawn(async move {
                    remove_container(engine.as_ref(), &in_flight, &name).await;
                });
            }
            Err(_) => warn!("No async runtime to remove container {name}"),
        }
    }
}

async fn remove_container(engine: &dyn ContainerEngine, in_flight: &InFlight, name: &str) {
    if let Err(e) = engine.remove(name).await {
        warn!("Failed to remove container {name}: {e}");
    }
    lock(in_flight).remove(name);
}
