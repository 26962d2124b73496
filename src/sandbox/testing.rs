//! In-memory container engine for tests.
//!
//! Commands understood by `run`:
//! - `sleep N`: waits N seconds (tokio time, so paused clocks apply)
//! - `exit N`: exits with code N
//! - `fail`: the engine itself errors
//! - anything else: exit 0, stdout echoes the command (plus stdin if any)

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::engine::{CommandOutput, ContainerEngine, ContainerSpec};

#[derive(Default)]
pub struct MockEngine {
    reachable: AtomicBool,
    failing_pings: AtomicU32,
    pings: AtomicU32,
    /// Containers created and not yet removed.
    live: Mutex<BTreeSet<String>>,
    specs: Mutex<Vec<ContainerSpec>>,
    removed: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn unreachable() -> Self {
        Self::default()
    }

    /// The next `n` pings fail even if the engine is reachable.
    pub fn fail_pings(&self, n: u32) {
        self.failing_pings.store(n, Ordering::SeqCst);
    }

    pub fn ping_count(&self) -> u32 {
        self.pings.load(Ordering::SeqCst)
    }

    /// Simulates a container left behind by some earlier process.
    pub fn leak(&self, name: &str) {
        self.live.lock().unwrap().insert(name.to_string());
    }

    pub fn live(&self) -> Vec<String> {
        self.live.lock().unwrap().iter().cloned().collect()
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(anyhow!("mock engine unreachable"));
        }
        let pending = self.failing_pings.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_pings.store(pending - 1, Ordering::SeqCst);
            return Err(anyhow!("mock engine unreachable (starting)"));
        }
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<CommandOutput> {
        self.live.lock().unwrap().insert(spec.name.clone());
        self.specs.lock().unwrap().push(spec.clone());

        let command = spec.command.trim();
        if let Some(secs) = command.strip_prefix("sleep ") {
            let secs: u64 = secs.trim().parse()?;
            tokio::time::sleep(Duration::from_secs(secs)).await;
            return Ok(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            });
        }
        if let Some(code) = command.strip_prefix("exit ") {
            return Ok(CommandOutput {
                exit_code: code.trim().parse()?,
                stdout: String::new(),
                stderr: format!("exited with {}", code.trim()),
            });
        }
        if command == "fail" {
            return Err(anyhow!("mock engine failure"));
        }
        let mut stdout = format!("{command}\n");
        if let Some(input) = &spec.stdin {
            stdout.push_str(input);
        }
        Ok(CommandOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        })
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.live.lock().unwrap().remove(name);
        self.removed.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn list(&self, _label: &str) -> Result<Vec<String>> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(anyhow!("mock engine unreachable"));
        }
        Ok(self.live())
    }
}
