//! # lib_usbctl
//!
//! The engine behind the `usbctl` USB/IP manager: it watches the devices the
//! host's USB/IP tooling can export, pushes every change to live viewers and
//! runs bind/unbind requests against the same state.
//!
//! ## Layout
//!
//! - [`gateway`]: allow-listed, timeout-bounded execution of `usbip`/`usbipd`.
//! - [`parser`]: `usbip list` / `usbipd wsl list` output to [`Device`] records.
//! - [`core`]: the registry, the broadcast dispatcher, the bind orchestrator
//!   and the poller.
//! - [`configs`]: the persisted config record and its atomic store.
//! - [`loggers`]: `tracing` bootstrap (feature `loggers`).
//!
//! ## Wiring
//!
//! ```no_run
//! use std::sync::Arc;
//! use lib_usbctl::{
//!     BindOrchestrator, CommandSet, ConfigStore, DeviceRegistry, Dispatcher, Gateway,
//!     ProcessRunner, SysfsProbe,
//! };
//!
//! # async fn wire() -> Result<(), lib_usbctl::ConfigError> {
//! let gateway = Gateway::new(Arc::new(ProcessRunner::new()));
//! let commands = CommandSet::for_current_platform();
//! let dispatcher = Arc::new(Dispatcher::new());
//! let registry = Arc::new(DeviceRegistry::new(
//!     gateway.clone(),
//!     commands,
//!     Arc::new(SysfsProbe::new()),
//!     dispatcher.clone(),
//! ));
//! let store = Arc::new(ConfigStore::open("/etc/usbctl/config").await?);
//! let orchestrator = BindOrchestrator::new(gateway, commands, registry.clone(), store);
//!
//! let mut viewer = dispatcher.subscribe();
//! registry.refresh().await;
//! orchestrator.bind("1-1.2").await.ok();
//! while let Some(frame) = viewer.try_recv() {
//!     println!("{}", frame.payload);
//! }
//! # Ok(())
//! # }
//! ```

/// Persisted configuration.
pub mod configs;
/// Registry, dispatcher, orchestrator and poller.
pub mod core;
/// Error types for every fallible boundary.
pub mod errors;
/// External command execution.
pub mod gateway;
/// Tracing subscriber setup.
#[cfg(feature = "loggers")]
pub mod loggers;
/// Data model.
pub mod models;
/// Enumerator output parsing.
pub mod parser;

pub use crate::configs::{ConfigRecord, ConfigStore};
pub use crate::core::{
    BindOrchestrator, DeviceRegistry, Dispatcher, EnumeratorHealth, Poller, PublishReport,
    RefreshOutcome, RestoreReport, SnapshotFrame, SubscriberId, Subscription,
};
pub use crate::errors::{ConfigError, ErrorKind, GatewayError, OperationError};
pub use crate::gateway::{
    BindProbe, CommandOutput, CommandRunner, CommandSet, CommandSpec, Gateway, Platform,
    ProcessRunner, SysfsProbe, UnboundProbe, Verb,
};
pub use crate::models::{BusId, Device, Snapshot};
