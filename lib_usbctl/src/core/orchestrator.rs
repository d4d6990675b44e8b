//! # Bind Orchestrator
//!
//! Runs bind/unbind requests end to end:
//!
//! 1.  validate the bus ID (nothing is spawned for a bad one),
//! 2.  claim the ID so a second request for the same device is rejected as
//!     busy while the first is running,
//! 3.  run the platform command through the gateway,
//! 4.  refresh the registry (which publishes when the list changed),
//! 5.  persist the new bound set, recomputed from the latest snapshot.
//!
//! Requests for different devices run their external commands in parallel.
//! A persistence failure is logged and does not fail the request.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::configs::ConfigStore;
use crate::core::registry::DeviceRegistry;
use crate::errors::OperationError;
use crate::gateway::{CommandSet, Gateway, Verb};
use crate::models::{BusId, Snapshot};

pub struct BindOrchestrator {
    gateway: Gateway,
    commands: CommandSet,
    registry: Arc<DeviceRegistry>,
    store: Arc<ConfigStore>,
    in_flight: Mutex<HashSet<BusId>>,
}

impl BindOrchestrator {
    pub fn new(
        gateway: Gateway,
        commands: CommandSet,
        registry: Arc<DeviceRegistry>,
        store: Arc<ConfigStore>,
    ) -> Self {
        Self {
            gateway,
            commands,
            registry,
            store,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Binds `busid` and returns the refreshed device list.
    pub async fn bind(&self, busid: &str) -> Result<Arc<Snapshot>, OperationError> {
        let id = Self::validate(Verb::Bind, busid)?;
        self.execute(Verb::Bind, &id, true).await
    }

    /// Unbinds `busid` and returns the refreshed device list.
    pub async fn unbind(&self, busid: &str) -> Result<Arc<Snapshot>, OperationError> {
        let id = Self::validate(Verb::Unbind, busid)?;
        self.execute(Verb::Unbind, &id, true).await
    }

    /// Bind path used while restoring persisted devices. Leaves the config
    /// untouched so a device that fails to come back is retried next start.
    pub(crate) async fn restore_bind(&self, id: &BusId) -> Result<Arc<Snapshot>, OperationError> {
        self.execute(Verb::Bind, id, false).await
    }

    /// Bus IDs with an operation currently running.
    pub fn in_flight(&self) -> Vec<BusId> {
        let mut ids: Vec<BusId> = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn validate(verb: Verb, raw: &str) -> Result<BusId, OperationError> {
        BusId::parse(raw).inspect_err(|_| debug!(%verb, busid = raw, "rejected invalid bus ID"))
    }

    async fn execute(&self, verb: Verb, id: &BusId, persist: bool) -> Result<Arc<Snapshot>, OperationError> {
        let _claim = self.claim(id)?;

        let command = self.commands.mutation(verb, id);
        info!(%verb, busid = %id, command = %command, "running device operation");

        if let Err(err) = self.gateway.exec(&command).await {
            let err = OperationError::from_gateway(verb, err);
            warn!(%verb, busid = %id, error = %err, "device operation failed");
            return Err(err);
        }

        let outcome = self.registry.refresh().await;
        if persist {
            self.persist(verb, id).await;
        }

        info!(%verb, busid = %id, changed = outcome.changed, "device operation succeeded");
        Ok(outcome.snapshot)
    }

    async fn persist(&self, verb: Verb, id: &BusId) {
        let authoritative = self.registry.probe_is_authoritative();
        let result = self
            .store
            .update(|record| {
                // Read under the store lock: the latest commit covers every
                // mutation persisted before this one.
                let latest = self.registry.snapshot();
                let observed = authoritative.then_some(latest.as_ref());
                record.bound_devices = reconcile_bound(&record.bound_devices, observed, verb, id);
            })
            .await;

        match result {
            Ok(record) => debug!(bound = record.bound_devices.len(), "bound devices persisted"),
            Err(err) => error!(
                %verb,
                busid = %id,
                error = %err,
                "failed to persist bound devices, operation itself succeeded"
            ),
        }
    }

    fn claim(&self, id: &BusId) -> Result<Claim<'_>, OperationError> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(id.clone()) {
            warn!(busid = %id, "rejecting operation, device is busy");
            return Err(OperationError::Busy(id.to_string()));
        }
        Ok(Claim {
            set: &self.in_flight,
            id: id.clone(),
        })
    }
}

impl std::fmt::Debug for BindOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindOrchestrator")
            .field("commands", &self.commands)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

/// Releases a per-device claim on drop, including when the request future
/// is cancelled.
struct Claim<'a> {
    set: &'a Mutex<HashSet<BusId>>,
    id: BusId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// The bound set to persist after `verb` succeeded on `target`.
///
/// With an `observed` snapshot, devices it lists keep or lose their place
/// according to their bound flag, while persisted devices that are not
/// plugged in right now are kept. Without one only `target` moves. Order is
/// preserved; new IDs are appended.
pub fn reconcile_bound(
    previous: &[BusId],
    observed: Option<&Snapshot>,
    verb: Verb,
    target: &BusId,
) -> Vec<BusId> {
    let mut next: Vec<BusId> = previous
        .iter()
        .filter(|id| match observed.and_then(|s| s.get(id.as_str())) {
            Some(device) => device.bound,
            None => true,
        })
        .cloned()
        .collect();

    if let Some(snapshot) = observed {
        for device in snapshot.devices().iter().filter(|d| d.bound) {
            if !next.contains(&device.busid) {
                next.push(device.busid.clone());
            }
        }
    }

    match verb {
        Verb::Bind => {
            if !next.contains(target) {
                next.push(target.clone());
            }
        }
        Verb::Unbind => next.retain(|id| id != target),
    }
    next
}
