use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationMode {
    /// Stop the run at the first failed step.
    #[default]
    StopOnError,
    /// Stop only on argument/lookup errors; keep going otherwise.
    ContinueUnlessFatal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorConfig {
    /// Deadline for a single tool invocation
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// Deadline for a whole run (capped further by the policy)
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time_secs: u64,
    #[serde(default)]
    pub continuation: ContinuationMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Container engine CLI binary
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    /// Relative CPU weight (1024 = one full share)
    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: u64,
    /// Network mode; forced to "none" unless the policy allows network
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
    /// Supports ${ENV_VAR} substitution
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Engine reachability probes before giving up at startup
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MountConfig {
    pub host: PathBuf,
    /// Defaults to `<working_dir>/<host basename>`
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub mode: MountMode,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MountMode {
    #[default]
    Ro,
    Rw,
}

impl MountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountMode::Ro => "ro",
            MountMode::Rw => "rw",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PolicyConfig {
    /// Policy file (TOML). Without one, no folder is accessible.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_max_execution_time() -> u64 {
    3600
}

fn default_engine() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "python:3.11-slim".to_string()
}

fn default_sandbox_timeout() -> u64 {
    60
}

fn default_memory_mb() -> u64 {
    512
}

fn default_cpu_shares() -> u64 {
    512
}

fn default_network() -> String {
    "none".to_string()
}

fn default_working_dir() -> String {
    "/work".to_string()
}

fn default_probe_attempts() -> u32 {
    3
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout(),
            max_execution_time_secs: default_max_execution_time(),
            continuation: ContinuationMode::default(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engine: default_engine(),
            image: default_image(),
            timeout_secs: default_sandbox_timeout(),
            memory_mb: default_memory_mb(),
            cpu_shares: default_cpu_shares(),
            network: default_network(),
            working_dir: default_working_dir(),
            mounts: Vec::new(),
            environment: BTreeMap::new(),
            probe_attempts: default_probe_attempts(),
        }
    }
}

impl ExecutorConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn max_execution_time(&self) -> Duration {
        Duration::from_secs(self.max_execution_time_secs)
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Human-readable summary of the limits, for startup logs
    pub fn describe(&self) -> String {
        format!(
            "{} via {} ({}MB, {} cpu shares, network {}, {}s timeout)",
            self.image,
            self.engine,
            self.memory_mb,
            self.cpu_shares,
            self.network,
            self.timeout_secs
        )
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        // Expand environment variables like ${WORKSPACE}
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}
