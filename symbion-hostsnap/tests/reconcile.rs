use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use symbion_devkit::fixtures::reference_message;
use symbion_devkit::{SnapshotBuilder, TestHarness};
use symbion_hostsnap::engine::{AnalyzeError, DropReason, Outcome};
use symbion_hostsnap::models::{Attributes, HostRecord};

fn host(id: i64, cloud: i64, ip: &str) -> HostRecord {
    HostRecord::new(id, cloud, ip).with_attribute("bk_cpu", 2)
}

#[tokio::test]
async fn test_cpu_change_writes_once_and_patches_cache() {
    let h = TestHarness::warmed([host(7, 0, "10.0.0.5")]).await;
    let msg = SnapshotBuilder::new("10.0.0.5", 0).cpu(4).to_json();

    let outcome = h.analyze(&msg).await.unwrap();

    let mut expected = Attributes::new();
    expected.insert("bk_cpu".into(), json!(4));
    assert_eq!(outcome, Outcome::Updated { host_id: 7, changes: expected.clone() });
    assert_eq!(h.store.updates(), vec![(7, expected)]);
    assert_eq!(h.cached(0, "10.0.0.5").unwrap().attributes["bk_cpu"], json!(4));
    assert_eq!(h.store.get(7).unwrap().attributes["bk_cpu"], json!(4));
}

#[tokio::test]
async fn test_same_snapshot_twice_writes_once() {
    let h = TestHarness::warmed([HostRecord::new(7, 0, "10.0.0.5")]).await;
    let msg = reference_message("10.0.0.5", 0).to_json();

    let first = h.analyze(&msg).await.unwrap();
    let second = h.analyze(&msg).await.unwrap();

    let Outcome::Updated { changes, .. } = first else {
        panic!("expected an update, got {first:?}");
    };
    assert_eq!(changes["bk_cpu"], json!(2));
    assert_eq!(changes["bk_mem"], json!(996));
    assert_eq!(changes["bk_disk"], json!(49));
    assert_eq!(changes["bk_mac"], json!("52:54:00:19:2e:e8"));
    assert_eq!(second, Outcome::Unchanged { host_id: 7 });
    assert_eq!(h.store.updates().len(), 1);
}

#[tokio::test]
async fn test_unknown_ip_sets_negative_entry_without_write() {
    let h = TestHarness::warmed([host(7, 0, "10.0.0.5")]).await;
    let msg = SnapshotBuilder::new("10.9.9.9", 0).cpu(4).to_json();

    let outcome = h.analyze(&msg).await.unwrap();

    assert_eq!(outcome, Outcome::Dropped(DropReason::HostNotFound));
    assert!(h.store.updates().is_empty());
    assert!(h.cache.writes().is_empty());
    assert!(h.filter.exists("10.9.9.9", 0));
    assert!(!h.filter.exists("10.9.9.9", 1));
}

#[tokio::test]
async fn test_negative_entry_suppresses_store_query() {
    let h = TestHarness::warmed([]).await;
    let msg = SnapshotBuilder::new("10.9.9.9", 0).cpu(4).to_json();

    h.analyze(&msg).await.unwrap();
    let second = h.analyze(&msg).await.unwrap();

    assert_eq!(second, Outcome::Dropped(DropReason::Suppressed));
    assert_eq!(h.store.find_calls(), 1);
}

#[tokio::test]
async fn test_suppressed_ips_are_left_out_of_store_query() {
    let h = TestHarness::new([host(7, 0, "10.0.0.5")]);
    h.filter.set("10.0.0.9", 0);
    let msg = SnapshotBuilder::new("10.0.0.9", 0)
        .interface("52:54:00:00:00:01", &["10.0.0.5/24"])
        .cpu(2)
        .to_json();

    let outcome = h.analyze(&msg).await.unwrap();

    assert!(matches!(outcome, Outcome::Updated { host_id: 7, .. }));
    assert_eq!(h.store.find_calls(), 1);
}

#[tokio::test]
async fn test_cache_miss_backfills_generation() {
    let h = TestHarness::new([host(7, 0, "10.0.0.5")]);
    let msg = SnapshotBuilder::new("10.0.0.5", 0).cpu(2).to_json();

    assert_eq!(h.analyze(&msg).await.unwrap(), Outcome::Unchanged { host_id: 7 });
    assert_eq!(h.analyze(&msg).await.unwrap(), Outcome::Unchanged { host_id: 7 });

    assert_eq!(h.store.find_calls(), 1);
    assert!(h.cached(0, "10.0.0.5").is_some());
}

#[tokio::test]
async fn test_refresh_picks_up_store_changes() {
    let h = TestHarness::warmed([host(7, 0, "10.0.0.5")]).await;

    h.store.set_attribute(7, "bk_cpu", json!(8));
    assert_eq!(h.cached(0, "10.0.0.5").unwrap().attributes["bk_cpu"], json!(2));

    assert_eq!(h.resolver.refresh().await, Some(1));
    assert_eq!(h.cached(0, "10.0.0.5").unwrap().attributes["bk_cpu"], json!(8));
}

#[tokio::test]
async fn test_update_failure_is_an_error_and_leaves_cache_alone() {
    let h = TestHarness::warmed([host(7, 0, "10.0.0.5")]).await;
    h.store.fail_update(true);
    let msg = SnapshotBuilder::new("10.0.0.5", 0).cpu(4).to_json();

    let err = h.analyze(&msg).await.unwrap_err();

    assert!(matches!(err, AnalyzeError::Store(_)));
    assert_eq!(h.cached(0, "10.0.0.5").unwrap().attributes["bk_cpu"], json!(2));
}

#[tokio::test]
async fn test_lookup_failure_is_an_error_without_negative_entry() {
    let h = TestHarness::new([host(7, 0, "10.0.0.5")]);
    h.store.fail_find(true);
    let msg = SnapshotBuilder::new("10.0.0.5", 0).cpu(4).to_json();

    assert!(h.analyze(&msg).await.is_err());
    assert!(!h.filter.exists("10.0.0.5", 0));
}

#[tokio::test]
async fn test_snapshot_cache_failure_does_not_fail_reconciliation() {
    let h = TestHarness::warmed([host(7, 0, "10.0.0.5")]).await;
    h.cache.set_failing(true);
    let msg = SnapshotBuilder::new("10.0.0.5", 0).cpu(4).to_json();

    let outcome = h.analyze(&msg).await.unwrap();

    assert!(matches!(outcome, Outcome::Updated { host_id: 7, .. }));
    assert!(h.cache.writes().is_empty());
}

#[tokio::test]
async fn test_wrapped_message_publishes_inner_payload() {
    let h = TestHarness::warmed([host(7, 0, "10.0.0.5")]).await;
    let (outer, inner) = SnapshotBuilder::new("10.0.0.5", 0).cpu(2).wrapped();

    assert_eq!(h.analyze(&outer).await.unwrap(), Outcome::Unchanged { host_id: 7 });

    let write = h.cache.last_write().unwrap();
    assert_eq!(write.key, h.snapshot_key(7));
    assert_eq!(write.value, inner);
    assert_eq!(write.ttl, Duration::from_secs(600));
}

#[tokio::test]
async fn test_incomplete_messages_are_dropped_not_failed() {
    let h = TestHarness::warmed([host(7, 0, "10.0.0.5")]).await;

    let cases = [
        ("not json".to_string(), DropReason::Malformed),
        (
            SnapshotBuilder::new("10.0.0.5", 0).raw_cloud_id(Value::Null).to_json(),
            DropReason::MissingCloudId,
        ),
        (
            SnapshotBuilder::new("10.0.0.5", 0).raw_cloud_id(json!("abc")).to_json(),
            DropReason::MissingCloudId,
        ),
        (SnapshotBuilder::new("127.0.0.1", 0).to_json(), DropReason::NoCandidateIp),
    ];

    for (msg, reason) in cases {
        assert_eq!(h.analyze(&msg).await.unwrap(), Outcome::Dropped(reason), "message: {msg}");
    }
    assert_eq!(h.store.find_calls(), 0);
}

#[tokio::test]
async fn test_numeric_string_cloud_id_is_accepted() {
    let h = TestHarness::warmed([host(7, 3, "10.0.0.5")]).await;
    let msg = SnapshotBuilder::new("10.0.0.5", 0).raw_cloud_id(json!("3")).cpu(2).to_json();

    assert_eq!(h.analyze(&msg).await.unwrap(), Outcome::Unchanged { host_id: 7 });
}

#[tokio::test]
async fn test_host_removed_from_store_drops_update() {
    let h = TestHarness::warmed([host(7, 0, "10.0.0.5")]).await;
    h.store.remove(7);
    let msg = SnapshotBuilder::new("10.0.0.5", 0).cpu(4).to_json();

    assert_eq!(h.analyze(&msg).await.unwrap(), Outcome::Dropped(DropReason::HostNotFound));
    assert_eq!(h.cached(0, "10.0.0.5").unwrap().attributes["bk_cpu"], json!(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reconciliations_converge() {
    let h = Arc::new(TestHarness::warmed([host(7, 0, "10.0.0.5"), host(8, 0, "10.0.0.6")]).await);

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let h = Arc::clone(&h);
            let ip = if i % 2 == 0 { "10.0.0.5" } else { "10.0.0.6" };
            let msg = SnapshotBuilder::new(ip, 0).cpu(4).to_json();
            tokio::spawn(async move { h.analyze(&msg).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    for (id, ip) in [(7, "10.0.0.5"), (8, "10.0.0.6")] {
        assert_eq!(h.cached(0, ip).unwrap().attributes["bk_cpu"], json!(4));
        assert_eq!(h.store.get(id).unwrap().attributes["bk_cpu"], json!(4));
    }
    let updates = h.store.updates().len();
    assert!((2..=32).contains(&updates), "updates: {updates}");
}
