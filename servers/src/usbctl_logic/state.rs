use std::sync::Arc;
use std::time::Duration;

use lib_usbctl::{BindOrchestrator, DeviceRegistry, Dispatcher};
use tokio_util::sync::CancellationToken;

/// Everything the HTTP handlers need. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
    pub orchestrator: Arc<BindOrchestrator>,
    pub dispatcher: Arc<Dispatcher>,
    /// Fires once shutdown begins; event streams end on it.
    pub shutdown: CancellationToken,
    pub heartbeat: Duration,
}
