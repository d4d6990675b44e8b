use std::collections::BTreeSet;

use lib_usbctl::{ConfigRecord, ConfigStore};
use project_tests::{FakeHost, Harness, busid};

fn host() -> FakeHost {
    FakeHost::new()
        .with_device("1-1.2", "Receiver")
        .with_device("2-1.1", "Flash drive")
        .with_device("3-4", "Serial adapter")
}

#[tokio::test]
async fn test_saved_bound_set_is_restored_after_restart() {
    let first = Harness::new(host());
    first.registry.refresh().await;
    first.orchestrator.bind("3-4").await.unwrap();
    first.orchestrator.bind("1-1.2").await.unwrap();

    let saved = ConfigStore::load(&first.config_path).await.unwrap();
    let saved_ids: BTreeSet<String> = saved.bound_devices.iter().map(|id| id.to_string()).collect();

    // Fresh host: nothing bound, as after a reboot.
    let second = Harness::with_record(host(), saved.clone());
    let report = second.registry.restore(&saved.bound_devices, &second.orchestrator).await;
    assert!(report.failed.is_empty());
    assert_eq!(report.restored, saved.bound_devices);

    let restored_ids: BTreeSet<String> = second
        .state()
        .into_iter()
        .filter(|(_, bound)| *bound)
        .map(|(id, _)| id)
        .collect();
    assert_eq!(restored_ids, saved_ids);

    // Replay follows the persisted order.
    assert_eq!(
        second.host.mutations(),
        vec!["usbip bind -b 3-4", "usbip bind -b 1-1.2"]
    );
}

#[tokio::test]
async fn test_restore_continues_past_failures_and_keeps_the_config() {
    let record = ConfigRecord {
        bound_devices: vec![busid("1-1.2"), busid("9-9"), busid("2-1.1")],
        ..ConfigRecord::default()
    };
    let harness = Harness::with_record(host(), record.clone());

    let report = harness.registry.restore(&record.bound_devices, &harness.orchestrator).await;
    assert_eq!(report.restored, vec![busid("1-1.2"), busid("2-1.1")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, busid("9-9"));

    assert_eq!(
        harness.host.mutations(),
        vec!["usbip bind -b 1-1.2", "usbip bind -b 9-9", "usbip bind -b 2-1.1"]
    );
    // Restore never rewrites the file, so 9-9 is retried next start.
    assert!(!harness.config_path.exists());
    assert_eq!(harness.store.record().await.bound_devices, record.bound_devices);
}

#[tokio::test]
async fn test_restore_with_nothing_persisted_is_a_no_op() {
    let harness = Harness::new(host());
    let report = harness.registry.restore(&[], &harness.orchestrator).await;
    assert!(report.restored.is_empty());
    assert!(report.failed.is_empty());
    assert!(harness.host.calls().is_empty());
}

#[tokio::test]
async fn test_hand_edited_file_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    std::fs::write(
        &path,
        "# written by hand\n\nport=12000\ncolour=green\nbound_device=2-1.1\nbound_device=not valid\n  bind = 10.0.0.2  \n",
    )
    .unwrap();

    let store = ConfigStore::open(&path).await.unwrap();
    let record = store.record().await;
    assert_eq!(record.port, 12000);
    assert_eq!(record.bind_address, "10.0.0.2");
    assert_eq!(record.bound_devices, vec![busid("2-1.1")]);

    store.save(record.clone()).await.unwrap();
    let rewritten = std::fs::read_to_string(&path).unwrap();
    assert!(!rewritten.contains("colour"));
    assert_eq!(ConfigRecord::parse(&rewritten), record);
}
