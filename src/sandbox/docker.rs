//! Container engine backed by the `docker` CLI.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::engine::{CommandOutput, ContainerEngine, ContainerSpec};

/// Deadline for engine housekeeping calls (version, rm, ps).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DockerEngine {
    binary: String,
}

impl DockerEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn control(&self, args: &[&str]) -> Result<std::process::Output> {
        let output = tokio::time::timeout(
            CONTROL_TIMEOUT,
            Command::new(&self.binary)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| anyhow!("{} {} timed out", self.binary, args.join(" ")))??;
        Ok(output)
    }
}

/// Arguments for `docker run`, without the binary itself.
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        format!("--memory={}m", spec.memory_mb),
        format!("--cpu-shares={}", spec.cpu_shares),
        format!("--network={}", spec.network),
        format!("--workdir={}", spec.working_dir),
        "--security-opt".to_string(),
        "no-new-privileges".to_string(),
    ];
    if spec.stdin.is_some() {
        args.push("--interactive".to_string());
    }
    for label in &spec.labels {
        args.push("--label".to_string());
        args.push(label.clone());
    }
    for mount in &spec.mounts {
        args.push("-v".to_string());
        args.push(format!("{}:{}:{}", mount.host, mount.target, mount.mode.as_str()));
    }
    for (key, value) in &spec.environment {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(spec.image.clone());
    args.push("sh".to_string());
    args.push("-c".to_string());
    args.push(spec.command.clone());
    args
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        let output = self
            .control(&["version", "--format", "{{.Server.Version}}"])
            .await?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} daemon not reachable: {}",
                self.binary,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        debug!(
            "Container engine {} server {}",
            self.binary,
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<CommandOutput> {
        let mut child = Command::new(&self.binary)
            .args(run_args(spec))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping this future (deadline, cancellation) kills the client;
            // the runtime removes the container itself.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("Cannot start {}: {e}", self.binary))?;

        // Input is fed while output is drained; a command may write before it
        // reads, and a full pipe on either side would otherwise stall both.
        let stdin = child.stdin.take();
        let feed = async move {
            let (Some(input), Some(mut stdin)) = (spec.stdin.as_deref(), stdin) else {
                return Ok(());
            };
            match stdin.write_all(input.as_bytes()).await {
                // The command exited without reading all of its input.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                result => result,
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed.map_err(|e| anyhow!("Cannot write stdin of {}: {e}", spec.name))?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let output = self.control(&["rm", "-f", name]).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() || stderr.contains("No such container") {
            Ok(())
        } else {
            Err(anyhow!("rm -f {name} failed: {}", stderr.trim()))
        }
    }

    async fn list(&self, label: &str) -> Result<Vec<String>> {
        let filter = format!("label={label}");
        let output = self
            .control(&["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"])
            .await?;
        if !output.status.success() {
            return Err(anyhow!(
                "ps failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}
