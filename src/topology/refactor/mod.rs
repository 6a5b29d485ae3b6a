//! Topology refactoring operators.
//!
//! [`RefactorCoordinator`] reshapes a running replication tree: moving a
//! replica to a different upstream, promoting a replica to master,
//! establishing a co-master pair, or recovering a broken branch. Every
//! operator preserves the invariant that no committed transaction is lost
//! or silently duplicated across the reshape.
//!
//! # Operator skeleton
//!
//! Each operator follows the same sequence:
//!
//! 1. **Probe** the target(s) authoritatively.
//! 2. **Gate**: structural preconditions and eligibility predicates, the
//!    latter sourced from the cached inventory row. A gate failure returns
//!    a structured error before any remote mutation.
//! 3. **Acquire** maintenance leases in deterministic key order over every
//!    node the operator will mutate.
//! 4. **Drive** the replication state transitions, strictly in order.
//! 5. **Cleanup**: attempt to restart every node the operator stopped,
//!    release every lease, and write the audit record on success.
//!
//! Steps 3–5 run inside an [`OperationScope`], the crate's rendition of a
//! labeled cleanup section: the scope records every lease taken and every
//! stop attempted, and its `finish` runs the cleanup on every exit path.
//! The first error from gating, leasing or driving becomes the operator's
//! return error; cleanup failures are logged at warn level and never mask
//! it.
//!
//! # Concurrency
//!
//! Operators are synchronous from the caller's perspective. The only
//! parallelism the layer introduces is the per-sibling fan-out inside
//! enslavement (one task per sibling, a completion channel of capacity N).
//! Cross-node mutual exclusion comes solely from the maintenance-lock
//! service; no process-local lock is held across a driver call.

mod promotion;
mod relocation;

use std::sync::Arc;

use backon::Retryable;
use tracing::warn;

use super::audit::TracingAudit;
use super::config::RefactorConfig;
use super::error::TopologyResult;
use super::maintenance::MaintenanceToken;
use super::matcher::Matcher;
use super::node::Node;
use super::retry;
use super::traits::{Audit, BinlogScanner, Driver, Inventory, MaintenanceLocks, Prober};
use crate::topology::error::TopologyError;
use crate::types::NodeKey;

/// Drives topology refactoring operators over explicit collaborators.
///
/// Cheap to clone; clones share the underlying collaborators, which the
/// enslavement fan-out relies on to hand each sibling task its own handle.
#[derive(Clone)]
pub struct RefactorCoordinator {
    inventory: Arc<dyn Inventory>,
    prober: Arc<dyn Prober>,
    driver: Arc<dyn Driver>,
    locks: Arc<dyn MaintenanceLocks>,
    audit: Arc<dyn Audit>,
    matcher: Matcher,
    config: RefactorConfig,
}

impl RefactorCoordinator {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        prober: Arc<dyn Prober>,
        driver: Arc<dyn Driver>,
        locks: Arc<dyn MaintenanceLocks>,
        audit: Arc<dyn Audit>,
        scanner: Arc<dyn BinlogScanner>,
        config: RefactorConfig,
    ) -> Self {
        RefactorCoordinator {
            inventory,
            prober,
            driver,
            locks,
            audit,
            matcher: Matcher::new(scanner),
            config,
        }
    }

    /// Coordinator with a tracing-backed audit sink and default config.
    pub fn with_defaults(
        inventory: Arc<dyn Inventory>,
        prober: Arc<dyn Prober>,
        driver: Arc<dyn Driver>,
        locks: Arc<dyn MaintenanceLocks>,
        scanner: Arc<dyn BinlogScanner>,
    ) -> Self {
        let config = RefactorConfig::default();
        let audit = Arc::new(TracingAudit::new(config.actor.clone()));
        Self::new(inventory, prober, driver, locks, audit, scanner, config)
    }

    pub fn config(&self) -> &RefactorConfig {
        &self.config
    }

    /// Authoritative live read of a node, retried on unreachability when
    /// configured.
    pub(crate) async fn probe_live(&self, key: &NodeKey) -> TopologyResult<Node> {
        if !self.config.retry_probes {
            return self.prober.probe(key).await;
        }
        (|| async { self.prober.probe(key).await })
            .retry(retry::probe_policy())
            .when(|err| matches!(err, TopologyError::Unreachable { .. }))
            .await
    }

    /// The node view eligibility gates run against: the cached inventory
    /// row when one exists, else the probed snapshot itself.
    pub(crate) async fn eligibility_row(&self, probed: &Node) -> TopologyResult<Node> {
        Ok(self
            .inventory
            .read_instance(&probed.key)
            .await?
            .unwrap_or_else(|| probed.clone()))
    }
}

/// Tracks what one operator has acquired and touched, and guarantees the
/// paired cleanup on every exit path.
///
/// The contract: after [`finish`](OperationScope::finish) returns, every
/// node whose stop was attempted through the scope (plus any node
/// explicitly registered) has had a start attempted, and every lease taken
/// through the scope has been released. The audit record is written only
/// when the driving outcome was success.
pub(crate) struct OperationScope<'a> {
    coordinator: &'a RefactorCoordinator,
    operation: &'static str,
    target: NodeKey,
    leases: Vec<MaintenanceToken>,
    restarts: Vec<NodeKey>,
}

impl<'a> OperationScope<'a> {
    pub(crate) fn new(
        coordinator: &'a RefactorCoordinator,
        operation: &'static str,
        target: NodeKey,
    ) -> Self {
        OperationScope {
            coordinator,
            operation,
            target,
            leases: Vec::new(),
            restarts: Vec::new(),
        }
    }

    /// Acquire one maintenance lease.
    pub(crate) async fn lease(&mut self, key: &NodeKey, reason: &str) -> TopologyResult<()> {
        let token = self
            .coordinator
            .locks
            .begin(key, &self.coordinator.config.actor, reason)
            .await?;
        self.leases.push(token);
        Ok(())
    }

    /// Acquire several leases in deterministic key order, regardless of
    /// the order the caller listed them in.
    pub(crate) async fn lease_ordered(
        &mut self,
        mut requests: Vec<(NodeKey, String)>,
    ) -> TopologyResult<()> {
        requests.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (key, reason) in requests {
            self.lease(&key, &reason).await?;
        }
        Ok(())
    }

    /// Register a node for a start attempt in cleanup without stopping it.
    pub(crate) fn ensure_restart(&mut self, key: &NodeKey) {
        if !self.restarts.contains(key) {
            self.restarts.push(key.clone());
        }
    }

    /// Stop a node's replication, registering it for restart first so even
    /// a failed stop gets its paired start attempt.
    pub(crate) async fn stop(&mut self, key: &NodeKey) -> TopologyResult<Node> {
        self.ensure_restart(key);
        self.coordinator.driver.stop_replica(key).await
    }

    /// Like [`stop`](OperationScope::stop), but lets the SQL thread drain
    /// first.
    pub(crate) async fn stop_nicely(&mut self, key: &NodeKey) -> TopologyResult<Node> {
        self.ensure_restart(key);
        self.coordinator.driver.stop_replica_nicely(key).await
    }

    /// Run the cleanup and resolve the operator's outcome.
    ///
    /// On success the driving code supplies the refreshed node and the
    /// human summary for the audit trail.
    pub(crate) async fn finish(
        self,
        outcome: TopologyResult<(Node, String)>,
    ) -> TopologyResult<Node> {
        for key in &self.restarts {
            if let Err(error) = self.coordinator.driver.start_replica(key).await {
                warn!(
                    operation = self.operation,
                    key = %key,
                    %error,
                    "cleanup failed to restart replication"
                );
            }
        }
        for token in self.leases.into_iter().rev() {
            let key = token.key.clone();
            if let Err(error) = self.coordinator.locks.end(token).await {
                warn!(
                    operation = self.operation,
                    key = %key,
                    %error,
                    "cleanup failed to release maintenance lease"
                );
            }
        }
        match outcome {
            Ok((node, message)) => {
                self.coordinator
                    .audit
                    .record(self.operation, &self.target, &message)
                    .await;
                Ok(node)
            }
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::audit::InMemoryAudit;
    use crate::topology::maintenance::InMemoryMaintenanceLocks;
    use crate::topology::mock::{MockCluster, NodeSpec};

    fn harness() -> (
        MockCluster,
        Arc<InMemoryMaintenanceLocks>,
        Arc<InMemoryAudit>,
        RefactorCoordinator,
    ) {
        let cluster = MockCluster::builder()
            .node(NodeSpec::master("m", 1))
            .node(NodeSpec::replica("a", "m", 2))
            .node(NodeSpec::replica("b", "m", 3))
            .build();
        let locks = Arc::new(InMemoryMaintenanceLocks::new());
        let audit = Arc::new(InMemoryAudit::new());
        let coordinator = RefactorCoordinator::new(
            Arc::new(cluster.clone()),
            Arc::new(cluster.clone()),
            Arc::new(cluster.clone()),
            locks.clone(),
            audit.clone(),
            Arc::new(cluster.clone()),
            RefactorConfig::default(),
        );
        (cluster, locks, audit, coordinator)
    }

    #[tokio::test]
    async fn scope_restarts_stopped_nodes_on_failure() {
        let (cluster, _locks, _audit, coordinator) = harness();
        let a = MockCluster::key("a");

        let mut scope = OperationScope::new(&coordinator, "test-op", a.clone());
        let outcome: TopologyResult<(Node, String)> = async {
            scope.stop(&a).await?;
            Err(TopologyError::Driver {
                key: a.clone(),
                op: "change-upstream",
                message: "boom".into(),
            })
        }
        .await;
        let result = scope.finish(outcome).await;

        assert!(result.is_err());
        assert_eq!(cluster.calls_of("start-replica").await, vec![a.clone()]);
        assert!(cluster.node(&a).await.replication_running());
    }

    #[tokio::test]
    async fn scope_releases_leases_in_reverse_order() {
        let (_cluster, locks, _audit, coordinator) = harness();
        let a = MockCluster::key("a");
        let b = MockCluster::key("b");

        let mut scope = OperationScope::new(&coordinator, "test-op", a.clone());
        scope
            .lease_ordered(vec![
                (b.clone(), "second".into()),
                (a.clone(), "first".into()),
            ])
            .await
            .unwrap();
        assert!(locks.is_held(&a));
        assert!(locks.is_held(&b));

        let node = MockCluster::builder()
            .node(NodeSpec::master("x", 9))
            .build()
            .node(&MockCluster::key("x"))
            .await;
        scope.finish(Ok((node, "done".into()))).await.unwrap();
        assert_eq!(locks.held_count(), 0);
    }

    #[tokio::test]
    async fn lease_ordered_sorts_by_key() {
        let (_cluster, _locks, _audit, coordinator) = harness();
        let a = MockCluster::key("a");
        let b = MockCluster::key("b");

        let mut scope = OperationScope::new(&coordinator, "test-op", a.clone());
        scope
            .lease_ordered(vec![(b.clone(), "b".into()), (a.clone(), "a".into())])
            .await
            .unwrap();
        assert_eq!(scope.leases[0].key, a);
        assert_eq!(scope.leases[1].key, b);
        scope.finish(Err(TopologyError::NotFound(a))).await.ok();
    }

    #[tokio::test]
    async fn audit_written_only_on_success() {
        let (cluster, _locks, audit, coordinator) = harness();
        let a = MockCluster::key("a");

        let scope = OperationScope::new(&coordinator, "test-op", a.clone());
        scope
            .finish(Err(TopologyError::NotFound(a.clone())))
            .await
            .ok();
        assert!(audit.entries().await.is_empty());

        let scope = OperationScope::new(&coordinator, "test-op", a.clone());
        let node = cluster.node(&a).await;
        scope.finish(Ok((node, "all good".into()))).await.unwrap();
        let entries = audit.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "test-op");
        assert_eq!(entries[0].message, "all good");
    }

    #[tokio::test]
    async fn failed_lease_still_releases_earlier_ones() {
        let (_cluster, locks, _audit, coordinator) = harness();
        let a = MockCluster::key("a");
        let b = MockCluster::key("b");

        // Hold b so the scope's second acquisition fails.
        let blocker = locks.begin(&b, "someone-else", "held").await.unwrap();

        let mut scope = OperationScope::new(&coordinator, "test-op", a.clone());
        let outcome = scope
            .lease_ordered(vec![(a.clone(), "a".into()), (b.clone(), "b".into())])
            .await;
        assert_eq!(outcome, Err(TopologyError::MaintenanceUnavailable(b.clone())));

        let result = scope
            .finish(Err(TopologyError::MaintenanceUnavailable(b.clone())))
            .await;
        assert!(result.is_err());
        assert!(!locks.is_held(&a));
        assert!(locks.is_held(&b));

        locks.end(blocker).await.unwrap();
    }
}
