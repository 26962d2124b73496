//! Startup probing of the container engine.
//!
//! The daemon may still be coming up when the runner starts, so the
//! probe retries with exponential backoff before declaring the engine
//! unreachable.

use std::time::Duration;

use tracing::{info, warn};

use super::engine::ContainerEngine;

/// Exponential delay sequence, capped at `max_delay`.
pub struct Backoff {
    max_delay: Duration,
    multiplier: u32,
    current_delay: Duration,
    /// Delays handed out so far.
    pub attempt: u32,
}

impl Backoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: u32) -> Self {
        Self {
            max_delay,
            multiplier,
            current_delay: initial_delay,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay;
        self.attempt += 1;
        self.current_delay = (self.current_delay * self.multiplier).min(self.max_delay);
        delay
    }
}

/// Pings `engine` up to `attempts` times. Returns the last error if it
/// never answers.
pub async fn wait_for_engine(
    engine: &dyn ContainerEngine,
    attempts: u32,
    mut backoff: Backoff,
) -> anyhow::Result<()> {
    let attempts = attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match engine.ping().await {
            Ok(()) => {
                info!("Container engine reachable (attempt {attempt})");
                return Ok(());
            }
            Err(e) => {
                warn!("Container engine probe {attempt}/{attempts} failed: {e}");
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("container engine not reachable")))
}
