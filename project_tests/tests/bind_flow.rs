use std::time::{Duration, Instant};

use lib_usbctl::{ConfigRecord, ConfigStore, ErrorKind, OperationError};
use project_tests::{FakeHost, Harness, busid};

fn two_devices() -> FakeHost {
    FakeHost::new()
        .with_bound_device("1-1.2", "Logitech, Inc. : Unifying Receiver")
        .with_device("2-1.1", "SanDisk Corp. : Ultra Fit")
}

#[tokio::test]
async fn test_bind_marks_device_bound_and_persists_it() {
    let harness = Harness::new(two_devices());
    harness.registry.refresh().await;

    let snapshot = harness.orchestrator.bind("2-1.1").await.unwrap();
    assert!(snapshot.get("2-1.1").unwrap().bound);

    harness.registry.refresh().await;
    assert_eq!(
        harness.state(),
        vec![("1-1.2".to_string(), true), ("2-1.1".to_string(), true)]
    );

    let persisted = ConfigStore::load(&harness.config_path).await.unwrap();
    assert_eq!(persisted.bound_devices, vec![busid("1-1.2"), busid("2-1.1")]);
    assert_eq!(harness.host.mutations(), vec!["usbip bind -b 2-1.1"]);
}

#[tokio::test]
async fn test_unbind_delivers_exactly_one_update() {
    let harness = Harness::new(two_devices());
    harness.registry.refresh().await;
    let mut viewer = harness.dispatcher.subscribe();

    let snapshot = harness.orchestrator.unbind("1-1.2").await.unwrap();
    assert!(!snapshot.get("1-1.2").unwrap().bound);
    assert!(!harness.registry.snapshot().get("1-1.2").unwrap().bound);

    let frame = viewer.try_recv().expect("one update after unbind");
    assert!(!frame.snapshot.get("1-1.2").unwrap().bound);
    assert!(viewer.try_recv().is_none());

    let persisted = ConfigStore::load(&harness.config_path).await.unwrap();
    assert!(persisted.bound_devices.is_empty());
}

#[tokio::test]
async fn test_invalid_ids_never_reach_the_gateway() {
    let harness = Harness::new(two_devices());

    for bad in ["../etc/passwd", "1-1;reboot", "", "1-1 2", "1-1.2\n", "$(id)"] {
        let err = harness.orchestrator.bind(bad).await.unwrap_err();
        assert!(matches!(err, OperationError::InvalidIdentifier(_)), "{bad:?}: {err}");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = harness.orchestrator.unbind(bad).await.unwrap_err();
        assert!(matches!(err, OperationError::InvalidIdentifier(_)));
    }

    assert!(harness.host.calls().is_empty());
    assert!(!harness.config_path.exists());
}

#[tokio::test]
async fn test_tool_failure_is_reported_with_diagnostics() {
    let harness = Harness::new(two_devices());
    harness.registry.refresh().await;

    let err = harness.orchestrator.bind("9-9").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalTool);
    let message = err.to_string();
    assert!(message.starts_with("failed to bind device"), "{message}");
    assert!(message.contains("does not exist"), "{message}");

    assert!(!harness.config_path.exists());
}

#[tokio::test]
async fn test_hung_tool_times_out() {
    let harness = Harness::new(two_devices());
    harness.host.set_hang_mutations(true);

    let started = Instant::now();
    let err = harness.orchestrator.bind("2-1.1").await.unwrap_err();
    assert!(matches!(err, OperationError::Timeout { .. }));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(3));

    // The claim is released, so a retry is not reported as busy.
    harness.host.set_hang_mutations(false);
    assert!(harness.orchestrator.bind("2-1.1").await.is_ok());
}

#[tokio::test]
async fn test_same_device_is_serialized() {
    let harness = Harness::new(two_devices());
    harness.host.set_mutation_delay(Duration::from_millis(200));

    let (first, second) = tokio::join!(
        harness.orchestrator.bind("2-1.1"),
        harness.orchestrator.bind("2-1.1"),
    );

    let busy = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(OperationError::Busy(_))))
        .count();
    assert_eq!(busy, 1);
    assert!(first.is_ok() || second.is_ok());
    assert_eq!(harness.host.mutations().len(), 1);
    assert!(harness.orchestrator.in_flight().is_empty());
}

#[tokio::test]
async fn test_different_devices_run_in_parallel() {
    let harness = Harness::new(two_devices());
    harness.host.set_mutation_delay(Duration::from_millis(250));

    let started = Instant::now();
    let (a, b) = tokio::join!(
        harness.orchestrator.bind("2-1.1"),
        harness.orchestrator.unbind("1-1.2"),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert!(started.elapsed() < Duration::from_millis(450));

    let persisted = ConfigStore::load(&harness.config_path).await.unwrap();
    assert_eq!(persisted.bound_devices, vec![busid("2-1.1")]);
}

#[tokio::test]
async fn test_persistence_failure_does_not_fail_the_operation() {
    let harness = Harness::with_unwritable_config(two_devices());
    harness.registry.refresh().await;

    let snapshot = harness.orchestrator.bind("2-1.1").await.unwrap();
    assert!(snapshot.get("2-1.1").unwrap().bound);
    assert!(harness.host.is_bound("2-1.1"));
}

#[tokio::test]
async fn test_persisted_record_keeps_server_settings() {
    let record = ConfigRecord {
        port: 8123,
        bind_address: "127.0.0.1".into(),
        poll_interval: Duration::from_secs(9),
        bound_devices: vec![busid("7-7")],
    };
    let harness = Harness::with_record(two_devices(), record);
    harness.registry.refresh().await;

    harness.orchestrator.bind("2-1.1").await.unwrap();

    let persisted = ConfigStore::load(&harness.config_path).await.unwrap();
    assert_eq!(persisted.port, 8123);
    assert_eq!(persisted.bind_address, "127.0.0.1");
    assert_eq!(persisted.poll_interval, Duration::from_secs(9));
    // 7-7 is not plugged in right now and stays remembered.
    assert_eq!(persisted.bound_devices, vec![busid("7-7"), busid("1-1.2"), busid("2-1.1")]);
}
