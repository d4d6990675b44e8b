use std::time::{Duration, Instant};

use lib_usbctl::Poller;
use project_tests::{FakeHost, Harness};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_first_poll_runs_immediately() {
    let harness = Harness::new(FakeHost::new().with_device("1-1", "Keyboard"));
    let mut viewer = harness.dispatcher.subscribe();
    let token = CancellationToken::new();

    let poller = Poller::new(harness.registry.clone(), Duration::from_secs(60));
    let task = tokio::spawn(poller.run(token.clone()));

    let frame = tokio::time::timeout(Duration::from_secs(2), viewer.recv())
        .await
        .expect("initial poll publishes")
        .unwrap();
    assert_eq!(frame.snapshot.len(), 1);

    token.cancel();
    let cycles = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("poller stops promptly")
        .unwrap();
    assert_eq!(cycles, 1);
}

#[tokio::test]
async fn test_poller_tracks_changes_between_ticks() {
    let harness = Harness::new(FakeHost::new().with_device("1-1", "Keyboard"));
    let mut viewer = harness.dispatcher.subscribe();
    let token = CancellationToken::new();
    let task = tokio::spawn(Poller::new(harness.registry.clone(), Duration::from_millis(100)).run(token.clone()));

    let first = tokio::time::timeout(Duration::from_secs(2), viewer.recv()).await.unwrap().unwrap();
    assert!(!first.snapshot.get("1-1").unwrap().bound);

    harness.host.set_bound("1-1", true);
    let second = tokio::time::timeout(Duration::from_secs(2), viewer.recv()).await.unwrap().unwrap();
    assert!(second.snapshot.get("1-1").unwrap().bound);
    assert!(second.sequence > first.sequence);

    token.cancel();
    let cycles = task.await.unwrap();
    assert!(cycles >= 2);
}

#[tokio::test]
async fn test_shutdown_interrupts_a_hung_enumeration() {
    let harness = Harness::new(FakeHost::new().with_device("1-1", "Keyboard"));
    harness.host.set_hang_listing(true);
    let token = CancellationToken::new();
    let task = tokio::spawn(Poller::new(harness.registry.clone(), Duration::from_millis(100)).run(token.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = Instant::now();
    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("poller stops without waiting for the enumerator")
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(250));
}

#[tokio::test]
async fn test_close_all_ends_viewer_streams() {
    let harness = Harness::new(FakeHost::new().with_device("1-1", "Keyboard"));
    let mut viewer = harness.dispatcher.subscribe();
    harness.registry.refresh().await;

    harness.dispatcher.close_all();
    assert!(viewer.recv().await.is_some());
    assert!(viewer.recv().await.is_none());
    assert!(harness.dispatcher.is_empty());
}
