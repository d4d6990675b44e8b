//! # Device Poller
//!
//! The one long-lived task that drives [`DeviceRegistry::refresh`] on a fixed
//! interval until the shutdown token fires.
//!
//! ## Workflow:
//! 1.  The first tick fires immediately, so viewers get a list right away.
//! 2.  Each tick runs one refresh; the registry publishes when it changed.
//! 3.  A refresh that overruns the interval delays the next tick instead of
//!     bursting to catch up.
//! 4.  Cancellation is checked at every suspension point. An in-flight refresh
//!     is bounded by the gateway timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::registry::DeviceRegistry;

/// Floor for the poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct Poller {
    registry: Arc<DeviceRegistry>,
    interval: Duration,
}

impl Poller {
    pub fn new(registry: Arc<DeviceRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs until `shutdown` is cancelled. Returns the number of refreshes.
    pub async fn run(self, shutdown: CancellationToken) -> u64 {
        info!(interval = ?self.interval, "device poller started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.registry.refresh() => {
                    cycles += 1;
                    if outcome.changed {
                        debug!(cycle = cycles, devices = outcome.snapshot.len(), "poll picked up a change");
                    }
                }
            }
        }

        info!(cycles, "device poller stopped");
        cycles
    }
}
