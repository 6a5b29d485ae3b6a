//! End-to-end tests for pseudo-GTID matching and master promotion.
//!
//! The marker fixtures follow one convention: each node's binlog starts at
//! the shared marker event and continues with the tail of events it has
//! applied since. Aligned tails mean aligned histories.

use std::sync::Arc;

use regraft::topology::{
    InMemoryAudit, InMemoryMaintenanceLocks, MaintenanceLocks, RefactorConfig,
    RefactorCoordinator, TopologyError,
};
use regraft::topology::{MockCluster, NodeSpec};
use regraft::types::{BinlogCoordinate, BinlogEvent, NodeKey};

struct Harness {
    cluster: MockCluster,
    locks: Arc<InMemoryMaintenanceLocks>,
    audit: Arc<InMemoryAudit>,
    coordinator: RefactorCoordinator,
}

fn harness(cluster: MockCluster) -> Harness {
    let locks = Arc::new(InMemoryMaintenanceLocks::new());
    let audit = Arc::new(InMemoryAudit::new());
    let coordinator = RefactorCoordinator::new(
        Arc::new(cluster.clone()),
        Arc::new(cluster.clone()),
        Arc::new(cluster.clone()),
        locks.clone(),
        audit.clone(),
        Arc::new(cluster.clone()),
        RefactorConfig {
            retry_probes: false,
            ..RefactorConfig::default()
        },
    );
    Harness {
        cluster,
        locks,
        audit,
        coordinator,
    }
}

fn key(host: &str) -> NodeKey {
    MockCluster::key(host)
}

/// Marker event followed by `tail` events, 60 bytes each, starting at
/// `base` in `file`.
fn stream(file: &str, base: u64, marker: &str, tail: &[&str]) -> Vec<BinlogEvent> {
    let mut events = Vec::with_capacity(tail.len() + 1);
    let mut pos = base;
    events.push(BinlogEvent::new(
        BinlogCoordinate::new(file, pos),
        BinlogCoordinate::new(file, pos + 60),
        marker,
    ));
    pos += 60;
    for info in tail {
        events.push(BinlogEvent::new(
            BinlogCoordinate::new(file, pos),
            BinlogCoordinate::new(file, pos + 60),
            *info,
        ));
        pos += 60;
    }
    events
}

// ============================================================================
// MatchBelow
// ============================================================================

/// Two cousins: T under M1, O under M2. Classic coordinates are
/// incomparable across the two lineages.
fn cousins() -> MockCluster {
    MockCluster::builder()
        .marker_prefix("PG-")
        .node(NodeSpec::master("m1", 1))
        .node(NodeSpec::master("m2", 2))
        .node(NodeSpec::replica("t", "m1", 3))
        .node(NodeSpec::replica("o", "m2", 4))
        .build()
}

#[tokio::test]
async fn match_below_resumes_at_first_unapplied_event() {
    let h = harness(cousins());
    // Shared marker PG-17; T has applied 3 events past it, O has 5, the
    // first 3 aligned.
    h.cluster
        .set_binlog(
            &key("t"),
            stream("t-bin.3", 500, "PG-17", &["ev-a", "ev-b", "ev-c"]),
        )
        .await;
    h.cluster
        .set_binlog(
            &key("o"),
            stream("o-bin.7", 9000, "PG-17", &["ev-a", "ev-b", "ev-c", "ev-d", "ev-e"]),
        )
        .await;

    let node = h
        .coordinator
        .match_below(&key("t"), &key("o"), true, true)
        .await
        .unwrap();

    // O's 4th post-marker event: 9060 + 3 * 60.
    assert_eq!(node.upstream, Some(key("o")));
    assert_eq!(node.exec_coord, BinlogCoordinate::new("o-bin.7", 9240));
    assert!(h.cluster.node(&key("t")).await.replication_running());
    assert_eq!(h.locks.held_count(), 0);
    assert_eq!(h.audit.operations().await, vec!["match-below".to_string()]);
}

#[tokio::test]
async fn match_below_identical_histories_resume_past_last_event() {
    let h = harness(cousins());
    h.cluster
        .set_binlog(&key("t"), stream("t-bin.3", 500, "PG-17", &["ev-a"]))
        .await;
    h.cluster
        .set_binlog(&key("o"), stream("o-bin.7", 9000, "PG-17", &["ev-a"]))
        .await;

    let node = h
        .coordinator
        .match_below(&key("t"), &key("o"), true, true)
        .await
        .unwrap();
    assert_eq!(node.exec_coord, BinlogCoordinate::new("o-bin.7", 9120));
}

#[tokio::test]
async fn match_below_without_marker_fails_before_repoint() {
    let h = harness(cousins());
    // T's binlog holds ordinary events but no marker.
    h.cluster
        .set_binlog(
            &key("t"),
            vec![BinlogEvent::new(
                BinlogCoordinate::new("t-bin.3", 500),
                BinlogCoordinate::new("t-bin.3", 560),
                "ev-a",
            )],
        )
        .await;
    h.cluster
        .set_binlog(&key("o"), stream("o-bin.7", 9000, "PG-17", &[]))
        .await;

    let result = h
        .coordinator
        .match_below(&key("t"), &key("o"), true, true)
        .await;
    assert_eq!(result, Err(TopologyError::MarkerNotFound(key("t"))));

    // No re-point happened; the stopped target got its restart attempt and
    // the leases came back.
    assert!(h.cluster.calls_of("change-upstream").await.is_empty());
    assert_eq!(h.cluster.calls_of("start-replica").await, vec![key("t")]);
    assert_eq!(h.cluster.node(&key("t")).await.upstream, Some(key("m1")));
    assert_eq!(h.locks.held_count(), 0);
    assert!(h.audit.entries().await.is_empty());
}

#[tokio::test]
async fn match_below_refuses_more_advanced_target() {
    let h = harness(cousins());
    h.cluster
        .set_binlog(
            &key("t"),
            stream("t-bin.3", 500, "PG-17", &["ev-a", "ev-b", "ev-c"]),
        )
        .await;
    h.cluster
        .set_binlog(&key("o"), stream("o-bin.7", 9000, "PG-17", &["ev-a"]))
        .await;

    let result = h
        .coordinator
        .match_below(&key("t"), &key("o"), true, true)
        .await;
    assert_eq!(
        result,
        Err(TopologyError::TargetMoreAdvanced {
            target: key("t"),
            other: key("o"),
        })
    );
    assert!(h.cluster.calls_of("change-upstream").await.is_empty());
    assert_eq!(h.cluster.node(&key("t")).await.upstream, Some(key("m1")));
}

#[tokio::test]
async fn match_below_same_node_is_refused() {
    let h = harness(cousins());
    let result = h
        .coordinator
        .match_below(&key("t"), &key("t"), true, true)
        .await;
    assert_eq!(result, Err(TopologyError::SameNode(key("t"))));
}

#[tokio::test]
async fn match_below_without_lock_flags_takes_no_leases() {
    let h = harness(cousins());
    h.cluster
        .set_binlog(&key("t"), stream("t-bin.3", 500, "PG-17", &[]))
        .await;
    h.cluster
        .set_binlog(&key("o"), stream("o-bin.7", 9000, "PG-17", &[]))
        .await;

    // A composing operator already holds the target's lease.
    let outer = h
        .locks
        .begin(&key("t"), "composer", "broader operation")
        .await
        .unwrap();

    h.coordinator
        .match_below(&key("t"), &key("o"), false, false)
        .await
        .unwrap();

    // The outer lease is still the only one.
    assert!(h.locks.is_held(&key("t")));
    assert_eq!(h.locks.held_count(), 1);
    h.locks.end(outer).await.unwrap();
}

#[tokio::test]
async fn match_below_lock_conflict_stops_nothing() {
    let h = harness(cousins());
    let blocker = h.locks.begin(&key("t"), "other", "held").await.unwrap();

    let result = h
        .coordinator
        .match_below(&key("t"), &key("o"), true, false)
        .await;
    assert_eq!(result, Err(TopologyError::MaintenanceUnavailable(key("t"))));
    assert!(h.cluster.calls_of("stop-replica").await.is_empty());
    h.locks.end(blocker).await.unwrap();
}

// ============================================================================
// EnslaveSiblings
// ============================================================================

#[tokio::test]
async fn enslave_siblings_with_empty_set_is_a_noop() {
    let h = harness(cousins());

    let node = h
        .coordinator
        .enslave_siblings(&key("t"), Vec::new())
        .await
        .unwrap();
    assert_eq!(node.key, key("t"));

    assert!(h.cluster.calls_of("stop-replica").await.is_empty());
    assert!(h.cluster.calls_of("change-upstream").await.is_empty());
    assert_eq!(h.locks.held_count(), 0);
    assert_eq!(
        h.audit.operations().await,
        vec!["enslave-siblings".to_string()]
    );
}

// ============================================================================
// MakeMaster
// ============================================================================

/// Dead master M over T and two siblings, with marker-aligned binlogs so
/// the siblings can match below T.
async fn dead_master_group() -> MockCluster {
    let cluster = MockCluster::builder()
        .marker_prefix("PG-")
        .node(NodeSpec::master("m", 1))
        .node(NodeSpec::replica("t", "m", 2).exec_position(200))
        .node(NodeSpec::replica("s1", "m", 3).exec_position(180))
        .node(NodeSpec::replica("s2", "m", 4).exec_position(200))
        .build();

    // T has applied two events past the shared marker, S1 one of them,
    // S2 both.
    cluster
        .set_binlog(&key("t"), stream("t-bin.1", 700, "PG-31", &["ev-a", "ev-b"]))
        .await;
    cluster
        .set_binlog(&key("s1"), stream("s1-bin.1", 300, "PG-31", &["ev-a"]))
        .await;
    cluster
        .set_binlog(
            &key("s2"),
            stream("s2-bin.1", 400, "PG-31", &["ev-a", "ev-b"]),
        )
        .await;
    cluster.kill(&key("m")).await;
    cluster
}

#[tokio::test]
async fn make_master_promotes_and_enslaves_peers() {
    let h = harness(dead_master_group().await);

    let node = h.coordinator.make_master(&key("t")).await.unwrap();

    // T is writable; both siblings were matched below it.
    assert!(!node.read_only);
    let s1 = h.cluster.node(&key("s1")).await;
    let s2 = h.cluster.node(&key("s2")).await;
    assert_eq!(s1.upstream, Some(key("t")));
    assert_eq!(s2.upstream, Some(key("t")));

    // S1 was one event behind: it resumes at T's second post-marker
    // event. S2 was aligned: it resumes just past T's last event.
    assert_eq!(s1.exec_coord, BinlogCoordinate::new("t-bin.1", 820));
    assert_eq!(s2.exec_coord, BinlogCoordinate::new("t-bin.1", 880));

    assert!(h.cluster.find_cycle().await.is_none());
    assert_eq!(h.locks.held_count(), 0);

    let mut operations = h.audit.operations().await;
    operations.sort();
    assert_eq!(
        operations,
        vec!["make-master", "match-below", "match-below"]
    );
}

#[tokio::test]
async fn make_master_refuses_less_advanced_candidate() {
    let h = harness(dead_master_group().await);

    // S1 (exec 180) is behind S2 (exec 200): promotion must refuse.
    let result = h.coordinator.make_master(&key("s1")).await;
    assert!(matches!(
        result,
        Err(TopologyError::MoreAdvancedSibling { .. })
    ));
    assert!(h.cluster.calls_of("change-upstream").await.is_empty());
    assert!(h.cluster.calls_of("set-writable").await.is_empty());
}

#[tokio::test]
async fn make_master_refuses_reachable_upstream() {
    let cluster = MockCluster::builder()
        .node(NodeSpec::master("m", 1))
        .node(NodeSpec::replica("t", "m", 2))
        .build();
    let h = harness(cluster);

    let result = h.coordinator.make_master(&key("t")).await;
    assert_eq!(
        result,
        Err(TopologyError::UpstreamStillReachable(key("m")))
    );
}

#[tokio::test]
async fn make_master_refuses_replicating_upstream() {
    let cluster = MockCluster::builder()
        .node(NodeSpec::master("g", 1))
        .node(NodeSpec::replica("m", "g", 2))
        .node(NodeSpec::replica("t", "m", 3))
        .build();
    let h = harness(cluster);

    let result = h.coordinator.make_master(&key("t")).await;
    assert_eq!(
        result,
        Err(TopologyError::UpstreamStillReplicating(key("m")))
    );
}

#[tokio::test]
async fn make_master_requires_drained_sql_thread() {
    let cluster = MockCluster::builder()
        .node(NodeSpec::master("m", 1))
        .node(
            NodeSpec::replica("t", "m", 2)
                .exec_position(180)
                .fetch_position(200),
        )
        .build();
    cluster.kill(&key("m")).await;
    let h = harness(cluster);

    let result = h.coordinator.make_master(&key("t")).await;
    assert_eq!(result, Err(TopologyError::SqlThreadBehind(key("t"))));
}

#[tokio::test]
async fn make_master_survives_one_failing_sibling() {
    let h = harness(dead_master_group().await);
    // S1's binlog loses its marker: its match fails, the other sibling's
    // succeeds, and the promotion still completes.
    h.cluster.set_binlog(&key("s1"), Vec::new()).await;

    let node = h.coordinator.make_master(&key("t")).await.unwrap();
    assert!(!node.read_only);
    assert_eq!(h.cluster.node(&key("s2")).await.upstream, Some(key("t")));
    assert_eq!(h.cluster.node(&key("s1")).await.upstream, Some(key("m")));
    assert_eq!(h.locks.held_count(), 0);
}

// ============================================================================
// MakeLocalMaster
// ============================================================================

/// G -> M -> {T, S}; M is dead, G is reachable. Binlogs share markers so T
/// matches below G and S below T.
async fn dead_intermediate_group() -> MockCluster {
    let cluster = MockCluster::builder()
        .marker_prefix("PG-")
        .node(NodeSpec::master("g", 1))
        .node(NodeSpec::replica("m", "g", 2))
        .node(NodeSpec::replica("t", "m", 3).exec_position(500))
        .node(NodeSpec::replica("s", "m", 4).exec_position(450))
        .build();

    cluster
        .set_binlog(&key("g"), stream("g-bin.1", 100, "PG-9", &["ev-a", "ev-b", "ev-c"]))
        .await;
    cluster
        .set_binlog(&key("t"), stream("t-bin.1", 900, "PG-9", &["ev-a"]))
        .await;
    cluster
        .set_binlog(&key("s"), stream("s-bin.1", 200, "PG-9", &["ev-a"]))
        .await;
    cluster.kill(&key("m")).await;
    cluster
}

#[tokio::test]
async fn make_local_master_promotes_over_failed_intermediate() {
    let h = harness(dead_intermediate_group().await);

    let node = h.coordinator.make_local_master(&key("t")).await.unwrap();

    // T hangs below the grandparent, resuming at G's second post-marker
    // event (T had applied one of the three).
    assert_eq!(node.upstream, Some(key("g")));
    assert_eq!(node.exec_coord, BinlogCoordinate::new("g-bin.1", 220));

    // S was matched below T. T's binlog fixture has one post-marker
    // event, aligned with S's: S resumes just past it.
    let s = h.cluster.node(&key("s")).await;
    assert_eq!(s.upstream, Some(key("t")));
    assert_eq!(s.exec_coord, BinlogCoordinate::new("t-bin.1", 1020));

    // T was stopped nicely and came back running.
    assert_eq!(h.cluster.calls_of("stop-replica-nicely").await, vec![key("t")]);
    assert!(h.cluster.node(&key("t")).await.replication_running());

    assert!(h.cluster.find_cycle().await.is_none());
    assert_eq!(h.locks.held_count(), 0);

    let mut operations = h.audit.operations().await;
    operations.sort();
    assert_eq!(
        operations,
        vec!["make-local-master", "match-below", "match-below"]
    );
}

#[tokio::test]
async fn make_local_master_applies_strict_advancement_check() {
    let h = harness(dead_intermediate_group().await);

    // S (exec 450) is behind T (exec 500); promoting S must refuse.
    let result = h.coordinator.make_local_master(&key("s")).await;
    assert_eq!(
        result,
        Err(TopologyError::MoreAdvancedSibling {
            target: key("s"),
            sibling: key("t"),
        })
    );
    assert!(h.cluster.calls_of("stop-replica-nicely").await.is_empty());
}

#[tokio::test]
async fn make_local_master_requires_known_upstream_row() {
    // T's upstream is configured but the inventory has no row for it.
    let cluster = MockCluster::builder()
        .node(NodeSpec::replica("t", "ghost", 2))
        .build();
    let h = harness(cluster);

    let result = h.coordinator.make_local_master(&key("t")).await;
    assert_eq!(result, Err(TopologyError::NotFound(key("ghost"))));
}
