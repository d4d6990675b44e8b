//! # Snapshot Dispatcher
//!
//! The broadcast hub. It owns the set of live subscribers and fans every
//! published [`Snapshot`] out to them.
//!
//! ## Core Design Principles:
//!
//! 1.  **Serialize once**: `publish` renders the JSON payload a single time and
//!     wraps it, together with the snapshot, in an `Arc<SnapshotFrame>`. Every
//!     subscriber receives a pointer to the same frame.
//!
//! 2.  **Never block the publisher**: each subscriber owns a bounded queue of
//!     [`SUBSCRIBER_QUEUE_CAPACITY`] frames. Enqueueing uses `try_send`; a full
//!     queue means this update is dropped for that subscriber only.
//!
//! 3.  **Transport-owned teardown**: the hub never polls for liveness. The
//!     transport drops its [`Subscription`] (or calls
//!     [`Dispatcher::unsubscribe`]) when its connection breaks. A queue whose
//!     receiver has already gone is pruned on the next publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Instant, SystemTime};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace};

use crate::models::Snapshot;

/// Frames a subscriber may have pending before updates are dropped.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 10;

/// # Snapshot Frame
///
/// What subscribers actually receive: the snapshot plus its wire payload,
/// rendered once per publish.
#[derive(Debug)]
pub struct SnapshotFrame {
    /// Monotonic publish counter, starting at 1.
    pub sequence: u64,
    pub snapshot: Arc<Snapshot>,
    /// JSON array of `{busid, info, bound}` objects.
    pub payload: Arc<str>,
}

/// Opaque handle identifying one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct ClientHandle {
    sender: mpsc::Sender<Arc<SnapshotFrame>>,
    connected_at: SystemTime,
    last_activity: Instant,
    delivered: u64,
    dropped: u64,
}

/// Point-in-time copy of one subscriber's bookkeeping.
#[derive(Debug, Clone)]
pub struct SubscriberStats {
    pub id: SubscriberId,
    pub connected_at: SystemTime,
    /// Time since the last successful enqueue (or since connecting).
    pub idle_for: std::time::Duration,
    pub delivered: u64,
    pub dropped: u64,
}

/// Outcome of one [`Dispatcher::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that got the frame queued.
    pub delivered: usize,
    /// Subscribers skipped because their queue was full.
    pub dropped: usize,
    /// Subscribers found disconnected and pruned.
    pub closed: usize,
}

type ClientTable = Mutex<HashMap<SubscriberId, ClientHandle>>;

fn lock(table: &ClientTable) -> MutexGuard<'_, HashMap<SubscriberId, ClientHandle>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// # Dispatcher
///
/// Shared across tasks behind an `Arc`. All methods take `&self` and hold the
/// subscriber table lock only for the duration of a map operation.
pub struct Dispatcher {
    clients: Arc<ClientTable>,
    next_id: AtomicU64,
    sequence: AtomicU64,
    capacity: usize,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_QUEUE_CAPACITY)
    }

    /// Hub whose subscriber queues hold `capacity` frames (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            sequence: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// # Subscribe
    ///
    /// Registers a fresh bounded queue and hands back its receiving side. The
    /// caller drains it; dropping the [`Subscription`] unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.capacity);
        let handle = ClientHandle {
            sender,
            connected_at: SystemTime::now(),
            last_activity: Instant::now(),
            delivered: 0,
            dropped: 0,
        };

        let total = {
            let mut clients = lock(&self.clients);
            clients.insert(id, handle);
            clients.len()
        };
        info!(subscriber = %id, total, "subscriber connected");

        Subscription {
            id,
            receiver,
            clients: Arc::downgrade(&self.clients),
        }
    }

    /// Removes and closes a subscriber's queue. Returns `false` when it was
    /// already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        remove_client(&self.clients, id)
    }

    /// # Publish
    ///
    /// Renders `snapshot` once and attempts a non-blocking enqueue to every
    /// subscriber. Full queues drop this frame; closed queues are pruned.
    pub fn publish(&self, snapshot: Arc<Snapshot>) -> PublishReport {
        let payload: Arc<str> = Arc::from(snapshot.to_json());
        let mut report = PublishReport::default();
        let now = Instant::now();
        let mut clients = lock(&self.clients);

        // Numbered under the table lock so sequence order matches queue order.
        let frame = Arc::new(SnapshotFrame {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            snapshot,
            payload,
        });

        clients.retain(|id, client| match client.sender.try_send(Arc::clone(&frame)) {
            Ok(()) => {
                client.delivered += 1;
                client.last_activity = now;
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                client.dropped += 1;
                report.dropped += 1;
                debug!(subscriber = %id, dropped = client.dropped, "subscriber queue full, update dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                report.closed += 1;
                info!(subscriber = %id, "subscriber gone, pruning");
                false
            }
        });
        drop(clients);

        trace!(
            sequence = frame.sequence,
            delivered = report.delivered,
            dropped = report.dropped,
            closed = report.closed,
            "snapshot published"
        );
        report
    }

    /// Closes every subscriber queue. Receivers see end-of-stream once they
    /// have drained what was already queued.
    pub fn close_all(&self) -> usize {
        let mut clients = lock(&self.clients);
        let count = clients.len();
        clients.clear();
        if count > 0 {
            info!(count, "closed all subscriber queues");
        }
        count
    }

    pub fn len(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Vec<SubscriberStats> {
        let now = Instant::now();
        let mut stats: Vec<SubscriberStats> = lock(&self.clients)
            .iter()
            .map(|(id, c)| SubscriberStats {
                id: *id,
                connected_at: c.connected_at,
                idle_for: now.saturating_duration_since(c.last_activity),
                delivered: c.delivered,
                dropped: c.dropped,
            })
            .collect();
        stats.sort_by_key(|s| s.id);
        stats
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_client(clients: &ClientTable, id: SubscriberId) -> bool {
    let removed = lock(clients).remove(&id);
    match removed {
        Some(handle) => {
            info!(
                subscriber = %id,
                delivered = handle.delivered,
                dropped = handle.dropped,
                "subscriber disconnected"
            );
            true
        }
        None => false,
    }
}

/// # Subscription
///
/// The transport's end of one subscriber. Yields frames in publish order.
/// Dropping it removes the subscriber from the hub.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<SnapshotFrame>>,
    clients: Weak<ClientTable>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next frame, or `None` once the hub closed this queue and it is drained.
    pub async fn recv(&mut self) -> Option<Arc<SnapshotFrame>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<SnapshotFrame>> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(clients) = self.clients.upgrade() {
            remove_client(&clients, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BusId, Device};

    fn snapshot(ids: &[&str]) -> Arc<Snapshot> {
        Arc::new(
            ids.iter()
                .map(|id| Device::new(BusId::parse(id).unwrap(), ""))
                .collect(),
        )
    }

    #[test]
    fn test_publish_reaches_every_subscriber_with_shared_payload() {
        let hub = Dispatcher::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        let report = hub.publish(snapshot(&["1-1"]));
        assert_eq!(report.delivered, 2);

        let fa = a.try_recv().unwrap();
        let fb = b.try_recv().unwrap();
        assert!(Arc::ptr_eq(&fa, &fb));
        assert_eq!(&*fa.payload, r#"[{"busid":"1-1","info":"","bound":false}]"#);
        assert_eq!(fa.sequence, 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let hub = Dispatcher::new();
        let sub = hub.subscribe();
        let id = sub.id();
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        drop(sub);
        assert!(hub.is_empty());
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let hub = Dispatcher::new();
        let sub = hub.subscribe();
        assert_eq!(hub.len(), 1);
        drop(sub);
        assert_eq!(hub.len(), 0);
    }

    #[test]
    fn test_full_queue_drops_only_that_subscriber() {
        let hub = Dispatcher::with_capacity(2);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        for i in 0..5 {
            let report = hub.publish(snapshot(&["1-1"]));
            if i >= 2 {
                assert_eq!(report.dropped, 1);
            }
            assert!(fast.try_recv().is_some());
        }

        assert_eq!(slow.try_recv().unwrap().sequence, 1);
        assert_eq!(slow.try_recv().unwrap().sequence, 2);
        assert!(slow.try_recv().is_none());

        let stats = hub.stats();
        let slow_stats = stats.iter().find(|s| s.id == slow.id()).unwrap();
        assert_eq!(slow_stats.delivered, 2);
        assert_eq!(slow_stats.dropped, 3);
    }

    #[tokio::test]
    async fn test_close_all_ends_streams_after_drain() {
        let hub = Dispatcher::new();
        let mut sub = hub.subscribe();
        hub.publish(snapshot(&["1-1"]));
        assert_eq!(hub.close_all(), 1);
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_subscription_outliving_hub_drops_cleanly() {
        let hub = Dispatcher::new();
        let sub = hub.subscribe();
        drop(hub);
        drop(sub);
    }
}
