//! # Core Engine Module
//!
//! The moving parts of the service:
//!
//! - **`dispatcher`**: the broadcast hub. Owns the subscriber set and fans
//!   each committed snapshot out to bounded per-subscriber queues.
//!
//! - **`registry`**: owns the canonical device list, refreshes it from the
//!   enumerator and publishes when the list changed.
//!
//! - **`orchestrator`**: bind/unbind with validation, per-device
//!   serialization, post-mutation refresh and persistence.
//!
//! - **`poller`**: the interval task that keeps the registry fresh.
//!
//! Each of these owns its own lock; none of them share one.

/// The broadcast hub for snapshot frames.
pub mod dispatcher;
/// Bind/unbind request handling.
pub mod orchestrator;
/// Interval-driven refresh loop.
pub mod poller;
/// The canonical device list and its refresh logic.
pub mod registry;

pub use dispatcher::{
    Dispatcher, PublishReport, SnapshotFrame, SubscriberId, SubscriberStats, Subscription,
    SUBSCRIBER_QUEUE_CAPACITY,
};
pub use orchestrator::{reconcile_bound, BindOrchestrator};
pub use poller::Poller;
pub use registry::{DeviceRegistry, EnumeratorHealth, RefreshOutcome, RestoreReport};
