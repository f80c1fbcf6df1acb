//! Lease coordinator integration tests
//!
//! Drives the coordinator against the in-memory lock service, provisioner
//! and host key scanner:
//! - Bulk acquisition with per-node VM rollback
//! - Release and re-acquire
//! - VM readiness before metadata updates
//! - Status queries and the pool summary

use std::sync::Arc;
use std::time::Duration;

use nodelock::{
    BatchPolicy, KeyWait, LeaseCoordinator, LeaseRequest, LockContext, MockLockService,
    MockProvisioner, NodeRecord, NodeStatus, NodeUpdate, RenderFormat, StaticKeyScan, StatusQuery,
};
use tokio_util::sync::CancellationToken;

const OWNER: &str = "alice@laptop";

struct Harness {
    service: Arc<MockLockService>,
    provisioner: Arc<MockProvisioner>,
    scan: Arc<StaticKeyScan>,
    coordinator: LeaseCoordinator,
}

fn harness(service: MockLockService, provisioner: MockProvisioner, scan: StaticKeyScan) -> Harness {
    let service = Arc::new(service);
    let provisioner = Arc::new(provisioner);
    let scan = Arc::new(scan);
    let ctx = LockContext::new("http://lock.example.com", OWNER).with_key_wait(KeyWait {
        poll_interval: Duration::from_millis(5),
        timeout: Some(Duration::from_secs(2)),
    });
    let coordinator =
        LeaseCoordinator::new(ctx, service.clone(), provisioner.clone(), scan.clone());
    Harness {
        service,
        provisioner,
        scan,
        coordinator,
    }
}

fn vm(name: &str) -> NodeRecord {
    NodeRecord::new(name, "vps").on_vm_host("mira01.lab")
}

// =============================================================================
// Acquisition and release
// =============================================================================

#[tokio::test]
async fn test_vm_provisioning_failure_is_rolled_back_once() {
    let h = harness(
        MockLockService::new()
            .with_node(vm("ubuntu@vpm001.lab"))
            .with_node(vm("ubuntu@vpm002.lab"))
            .with_node(vm("ubuntu@vpm003.lab")),
        MockProvisioner::new().with_failure("ubuntu@vpm002.lab"),
        StaticKeyScan::new(),
    );

    let nodes = h
        .coordinator
        .acquirer()
        .acquire_many(&LeaseRequest::new(3, "vps"))
        .await
        .unwrap()
        .nodes;

    assert!(nodes.len() <= 3);
    assert_eq!(
        nodes.keys().collect::<Vec<_>>(),
        vec!["ubuntu@vpm001.lab", "ubuntu@vpm003.lab"]
    );
    assert_eq!(h.service.call_count("unlock:ubuntu@vpm002.lab"), 1);
    assert_eq!(h.provisioner.create_calls(), 3);
    assert!(!h.service.node("ubuntu@vpm002.lab").unwrap().locked);
    assert!(h.service.node("ubuntu@vpm001.lab").unwrap().locked);
}

#[tokio::test]
async fn test_unavailable_is_not_retried() {
    let h = harness(
        MockLockService::new()
            .with_node(NodeRecord::new("ubuntu@plana01.lab", "plana"))
            .with_unavailable(),
        MockProvisioner::new(),
        StaticKeyScan::new(),
    );

    let nodes = h
        .coordinator
        .acquirer()
        .acquire_many(&LeaseRequest::new(1, "plana"))
        .await
        .unwrap()
        .nodes;

    assert!(nodes.is_empty());
    assert_eq!(h.service.call_count("lock_many:plana"), 1);
}

#[tokio::test]
async fn test_release_then_acquire_one() {
    let name = "ubuntu@plana01.lab";
    let h = harness(
        MockLockService::new().with_node(NodeRecord::new(name, "plana").locked_by(OWNER)),
        MockProvisioner::new(),
        StaticKeyScan::new(),
    );

    // already locked
    let outcome = h.coordinator.acquirer().acquire_one(name, None, None).await.unwrap();
    assert!(!outcome.success);

    assert!(h.coordinator.releaser().release(name, None).await.unwrap());
    let outcome = h.coordinator.acquirer().acquire_one(name, None, None).await.unwrap();
    assert!(outcome.success);
}

#[tokio::test]
async fn test_force_continues_past_failures() {
    let names: Vec<String> = ["ubuntu@a.lab", "ubuntu@ghost.lab", "ubuntu@b.lab"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let service = || {
        MockLockService::new()
            .with_node(NodeRecord::new("ubuntu@a.lab", "plana"))
            .with_node(NodeRecord::new("ubuntu@b.lab", "plana"))
    };

    let h = harness(service(), MockProvisioner::new(), StaticKeyScan::new());
    let outcome = h
        .coordinator
        .acquirer()
        .lock_names(&names, None, BatchPolicy::FailFast)
        .await;
    assert_eq!(outcome.succeeded, vec!["ubuntu@a.lab"]);
    assert_eq!(outcome.skipped, vec!["ubuntu@b.lab"]);
    assert_eq!(outcome.exit_code(), 1);

    let h = harness(service(), MockProvisioner::new(), StaticKeyScan::new());
    let outcome = h
        .coordinator
        .acquirer()
        .lock_names(&names, None, BatchPolicy::from_force(true))
        .await;
    assert_eq!(outcome.succeeded, vec!["ubuntu@a.lab", "ubuntu@b.lab"]);
    assert_eq!(outcome.failed, vec!["ubuntu@ghost.lab"]);
    assert_eq!(outcome.exit_code(), 1);
}

// =============================================================================
// Updates and key refresh
// =============================================================================

#[tokio::test]
async fn test_update_waits_for_booting_vm() {
    let name = "ubuntu@vpm001.lab";
    let h = harness(
        MockLockService::new().with_node(vm(name).locked_by(OWNER)),
        MockProvisioner::new(),
        StaticKeyScan::new().with_key_after("vpm001.lab", "ssh-rsa BOOTED", 1),
    );

    let update = NodeUpdate {
        description: Some("upgrade suite".to_string()),
        status: Some(NodeStatus::Down),
        ssh_pub_key: None,
    };
    assert!(h.coordinator.updater().update(name, &update).await.unwrap());

    assert_eq!(h.scan.calls(), 2);
    // readiness polls fetch the one record, never the whole pool
    assert_eq!(h.service.call_count("list"), 0);
    let node = h.service.node(name).unwrap();
    assert_eq!(node.description.as_deref(), Some("upgrade suite"));
    assert!(!node.up);
}

#[tokio::test]
async fn test_cancelled_wait_leaves_node_untouched() {
    let name = "ubuntu@vpm001.lab";
    let cancel = CancellationToken::new();
    let h = harness(
        MockLockService::new().with_node(vm(name).locked_by(OWNER)),
        MockProvisioner::new(),
        StaticKeyScan::new(),
    );
    let updater = h.coordinator.clone().with_cancellation(cancel.clone()).updater();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let update = NodeUpdate {
        description: Some("never".to_string()),
        ..Default::default()
    };
    let result = updater.update(name, &update).await;
    canceller.await.unwrap();

    assert!(matches!(result, Err(nodelock::LockError::Cancelled(_))));
    assert!(h.service.updates().is_empty());
}

#[test]
fn test_empty_update_is_free() {
    let h = harness(
        MockLockService::new().with_node(vm("ubuntu@vpm001.lab")),
        MockProvisioner::new(),
        StaticKeyScan::new(),
    );

    let ok = tokio_test::block_on(
        h.coordinator
            .updater()
            .update("ubuntu@vpm001.lab", &NodeUpdate::default()),
    )
    .unwrap();
    assert!(ok);
    assert!(h.service.calls().is_empty());
}

#[tokio::test]
async fn test_scan_and_update_all_nodes() {
    let h = harness(
        MockLockService::new()
            .with_node(NodeRecord::new("ubuntu@host1.lab", "plana").with_key("OLD"))
            .with_node(NodeRecord::new("ubuntu@host2.lab", "plana").with_key("SAME")),
        MockProvisioner::new(),
        StaticKeyScan::new()
            .with_key("host1.lab", "NEW")
            .with_key("host2.lab", "SAME"),
    );

    let report = h.coordinator.scanner().scan_and_update(&[]).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.updated_count(), 1);
    assert_eq!(h.service.node("ubuntu@host1.lab").unwrap().pub_key(), "NEW");
}

// =============================================================================
// Status and summary
// =============================================================================

#[tokio::test]
async fn test_status_renders_brief_lines() {
    let h = harness(
        MockLockService::new()
            .with_node(
                NodeRecord::new("ubuntu@sepia-box3.example.com", "plana")
                    .locked_by(OWNER)
                    .with_description("run 7"),
            )
            .with_node(NodeRecord::new("ubuntu@sepia-box4.example.com", "plana")),
        MockProvisioner::new(),
        StaticKeyScan::new(),
    );

    let query = StatusQuery {
        all: true,
        ..Default::default()
    };
    let nodes = h.coordinator.status().query(&query).await.unwrap();
    let out = nodelock::status::render(&nodes, RenderFormat::Brief).unwrap();

    assert_eq!(
        out,
        "sepia-box3   locked alice@laptop \"run 7\"\nsepia-box4 unlocked - \"\"\n"
    );
}

#[tokio::test]
async fn test_summary_of_pool() {
    let h = harness(
        MockLockService::new()
            .with_node(NodeRecord::new("ubuntu@t1.lab", "T").locked_by("A"))
            .with_node(NodeRecord::new("ubuntu@t2.lab", "T").locked_by("A").with_up(false))
            .with_node(NodeRecord::new("ubuntu@t3.lab", "T").with_up(false)),
        MockProvisioner::new(),
        StaticKeyScan::new(),
    );

    let report = h.coordinator.summary().summarize(None).await.unwrap();
    let a = report.row("A", "T").unwrap();
    assert_eq!((a.count, a.up), (2, 1));
    let free = report.row("(free)", "T").unwrap();
    assert_eq!((free.count, free.up), (1, 0));
    assert_eq!((report.total_count, report.total_up), (3, 1));
}
