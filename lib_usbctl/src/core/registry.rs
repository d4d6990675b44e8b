//! # Device Registry
//!
//! Owns the canonical [`Snapshot`]. A refresh enumerates devices through the
//! gateway, parses the listing, asks the [`BindProbe`] for each device's bound
//! state, swaps the new snapshot in and, when the positional `(busid, bound)`
//! comparison says something changed, publishes it through the dispatcher.
//!
//! Refreshes are serialized: the poller and post-mutation refreshes never
//! interleave, so publishes reach every subscriber in commit order. Readers
//! only ever clone an `Arc` out of the lock and never wait on enumeration.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use tracing::{debug, error, info, warn};

use crate::core::dispatcher::Dispatcher;
use crate::core::orchestrator::BindOrchestrator;
use crate::errors::GatewayError;
use crate::gateway::{BindProbe, CommandSet, Gateway};
use crate::models::{BusId, Snapshot};
use crate::parser;

/// Result of one [`DeviceRegistry::refresh`].
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// The canonical snapshot after this refresh.
    pub snapshot: Arc<Snapshot>,
    /// Whether it differs from the previous one (and was therefore published).
    pub changed: bool,
}

/// Enumerator availability, as seen by the refresh loop.
#[derive(Debug, Clone, Default)]
pub struct EnumeratorHealth {
    pub consecutive_failures: u64,
    /// The failure currently being suppressed, if any.
    pub last_error: Option<String>,
    pub last_success: Option<SystemTime>,
}

impl EnumeratorHealth {
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }
}

/// What happened to each persisted ID during [`DeviceRegistry::restore`].
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub restored: Vec<BusId>,
    pub failed: Vec<(BusId, String)>,
}

pub struct DeviceRegistry {
    gateway: Gateway,
    commands: CommandSet,
    probe: Arc<dyn BindProbe>,
    dispatcher: Arc<Dispatcher>,
    current: RwLock<Arc<Snapshot>>,
    refresh_lock: tokio::sync::Mutex<()>,
    health: Mutex<EnumeratorHealth>,
}

impl DeviceRegistry {
    pub fn new(
        gateway: Gateway,
        commands: CommandSet,
        probe: Arc<dyn BindProbe>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            gateway,
            commands,
            probe,
            dispatcher,
            current: RwLock::new(Arc::new(Snapshot::default())),
            refresh_lock: tokio::sync::Mutex::new(()),
            health: Mutex::new(EnumeratorHealth::default()),
        }
    }

    /// The current canonical snapshot. Never blocks on a refresh in progress.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn health(&self) -> EnumeratorHealth {
        self.health.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Whether the bound flags in snapshots come from a real state source.
    pub fn probe_is_authoritative(&self) -> bool {
        self.probe.is_authoritative()
    }

    /// # Refresh
    ///
    /// Re-enumerates and commits a new snapshot. When the enumerator is
    /// unavailable the current snapshot is kept and `changed` is `false`; the
    /// failure is logged once per distinct failure, not once per call.
    pub async fn refresh(&self) -> RefreshOutcome {
        let _serial = self.refresh_lock.lock().await;

        let text = match self.enumerate().await {
            Ok(text) => {
                self.note_success();
                text
            }
            Err(err) => {
                self.note_failure(&err);
                return RefreshOutcome {
                    snapshot: self.snapshot(),
                    changed: false,
                };
            }
        };

        let mut devices = parser::parse(&text);
        for device in &mut devices {
            device.bound = self.probe.is_bound(&device.busid);
        }
        let next = Arc::new(Snapshot::new(devices));

        let changed = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let changed = !current.same_state(&next);
            // Descriptions may differ even when the state does not.
            *current = Arc::clone(&next);
            changed
        };

        if changed {
            let report = self.dispatcher.publish(Arc::clone(&next));
            debug!(
                devices = next.len(),
                bound = next.bound_ids().len(),
                delivered = report.delivered,
                "device list changed"
            );
        }

        RefreshOutcome { snapshot: next, changed }
    }

    /// # Restore
    ///
    /// Re-binds persisted devices, in order, through the orchestrator's bind
    /// path. Individual failures are logged and skipped. Meant to run once at
    /// startup, before the poller.
    pub async fn restore(&self, ids: &[BusId], orchestrator: &BindOrchestrator) -> RestoreReport {
        let mut report = RestoreReport::default();
        if ids.is_empty() {
            return report;
        }
        info!(count = ids.len(), "restoring previously bound devices");

        for id in ids {
            match orchestrator.restore_bind(id).await {
                Ok(_) => {
                    info!(busid = %id, "restored device binding");
                    report.restored.push(id.clone());
                }
                Err(err) => {
                    warn!(busid = %id, error = %err, "failed to restore device binding, continuing");
                    report.failed.push((id.clone(), err.to_string()));
                }
            }
        }

        info!(
            restored = report.restored.len(),
            failed = report.failed.len(),
            "restore finished"
        );
        report
    }

    /// Runs the listing candidates in order; the first success wins.
    ///
    /// A candidate that timed out ends the attempt, so one refresh never
    /// costs more than a single gateway timeout.
    async fn enumerate(&self) -> Result<String, GatewayError> {
        let mut last_err = None;
        for command in self.commands.list_candidates() {
            match self.gateway.exec(&command).await {
                Ok(output) => return Ok(output),
                Err(err @ GatewayError::Timeout { .. }) => {
                    debug!(command = %command, error = %err, "listing command timed out, not trying further candidates");
                    return Err(err);
                }
                Err(err) => {
                    debug!(command = %command, error = %err, "listing command failed, trying next");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| GatewayError::NotAllowed(String::from("<no listing command>"))))
    }

    fn note_success(&self) {
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        if health.consecutive_failures > 0 {
            info!(
                failures = health.consecutive_failures,
                "device enumeration recovered"
            );
        }
        health.consecutive_failures = 0;
        health.last_error = None;
        health.last_success = Some(SystemTime::now());
    }

    fn note_failure(&self, err: &GatewayError) {
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        health.consecutive_failures += 1;
        let message = err.to_string();
        if health.last_error.as_deref() == Some(message.as_str()) {
            debug!(failures = health.consecutive_failures, error = %message, "device enumeration still failing");
            return;
        }
        if err.is_not_found() {
            error!(error = %message, "usbip tools not found; install them to list devices");
        } else {
            error!(error = %message, "device enumeration failed, keeping last device list");
        }
        health.last_error = Some(message);
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("commands", &self.commands)
            .field("devices", &self.snapshot().len())
            .finish_non_exhaustive()
    }
}
