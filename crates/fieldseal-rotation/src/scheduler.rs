//! Periodic driver for scheduled rotation checks.
//!
//! Thin wrapper over a tokio interval; hosts with their own scheduling
//! infrastructure can ignore this and call `KeyRotationService::tick`
//! directly.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::error;

use crate::krs::KeyRotationService;

/// Runs `tick()` at a fixed interval until stopped or dropped.
pub struct RotationScheduler {
    handle: JoinHandle<()>,
}

impl RotationScheduler {
    /// Spawn the tick loop. The first pass runs after one full interval,
    /// not immediately — startup recovery already covers "now".
    pub fn start(krs: Arc<KeyRotationService>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval's first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = krs.tick() {
                    error!(%e, "scheduled rotation pass failed; will retry next interval");
                }
            }
        });
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for RotationScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
