//! In-memory simulated cluster for testing.
//!
//! `MockCluster` implements [`Inventory`], [`Prober`], [`Driver`] and
//! [`BinlogScanner`] over a shared in-memory node table, so operator
//! sequences can be exercised end-to-end without a database. It also keeps
//! a journal of every probe and driver call, which tests use to assert
//! call ordering and the restart-on-cleanup guarantee.
//!
//! # Usage
//!
//! Available during unit tests, or to downstream integration tests via the
//! `test-utilities` feature:
//!
//! ```toml
//! [dev-dependencies]
//! regraft = { path = ".", features = ["test-utilities"] }
//! ```
//!
//! ```rust,ignore
//! let cluster = MockCluster::builder()
//!     .node(NodeSpec::master("m", 1))
//!     .node(NodeSpec::replica("t", "m", 2).exec_position(100))
//!     .build();
//! ```
//!
//! # Simulation semantics
//!
//! The driver implementation mimics the relevant slice of a real server's
//! replication state machine: stop clears the thread flags,
//! `start_replica_until` advances the applied position to the requested
//! coordinate (and the node's own write position by the same amount, as a
//! server logging applied updates would), and `change_upstream` refuses to
//! act while replication threads run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::error::{TopologyError, TopologyResult};
use super::node::Node;
use super::traits::{BinlogScanner, Driver, Inventory, Prober};
use crate::types::{BinlogCoordinate, BinlogEvent, NodeKey};

const MOCK_PORT: u16 = 3306;

/// Declarative description of one node for [`MockClusterBuilder`].
#[derive(Debug, Clone)]
pub struct NodeSpec {
    host: String,
    upstream: Option<String>,
    server_id: u32,
    exec_position: u64,
    fetch_position: Option<u64>,
    self_position: u64,
    running: bool,
    healthy: bool,
    log_bin_enabled: bool,
    log_replica_updates: bool,
    read_only: bool,
}

impl NodeSpec {
    /// A writable root node with no upstream.
    pub fn master(host: impl Into<String>, server_id: u32) -> Self {
        NodeSpec {
            host: host.into(),
            upstream: None,
            server_id,
            exec_position: 0,
            fetch_position: None,
            self_position: 1000,
            running: false,
            healthy: true,
            log_bin_enabled: true,
            log_replica_updates: false,
            read_only: false,
        }
    }

    /// A healthy replica of `upstream` with both threads running.
    pub fn replica(host: impl Into<String>, upstream: impl Into<String>, server_id: u32) -> Self {
        NodeSpec {
            host: host.into(),
            upstream: Some(upstream.into()),
            server_id,
            exec_position: 100,
            fetch_position: None,
            self_position: 500,
            running: true,
            healthy: true,
            log_bin_enabled: true,
            log_replica_updates: true,
            read_only: true,
        }
    }

    /// Applied position in the upstream's log (also the fetched position,
    /// unless overridden).
    pub fn exec_position(mut self, position: u64) -> Self {
        self.exec_position = position;
        self
    }

    /// Fetched position in the upstream's log, for lagging-SQL-thread
    /// scenarios.
    pub fn fetch_position(mut self, position: u64) -> Self {
        self.fetch_position = Some(position);
        self
    }

    /// Own write position.
    pub fn self_position(mut self, position: u64) -> Self {
        self.self_position = position;
        self
    }

    /// Replication configured but threads stopped.
    pub fn stopped(mut self) -> Self {
        self.running = false;
        self
    }

    /// Node fails health probes (still answers them).
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn no_binlog(mut self) -> Self {
        self.log_bin_enabled = false;
        self
    }

    pub fn no_replica_updates(mut self) -> Self {
        self.log_replica_updates = false;
        self
    }

    fn into_node(self) -> Node {
        let own_file = format!("{}-bin.000001", self.host);
        let upstream_file = self
            .upstream
            .as_deref()
            .map(|up| format!("{up}-bin.000001"))
            .unwrap_or_default();
        let fetch_position = self.fetch_position.unwrap_or(self.exec_position);
        Node {
            key: NodeKey::new(self.host, MOCK_PORT),
            upstream: self
                .upstream
                .map(|up| NodeKey::new(up, MOCK_PORT)),
            self_coord: BinlogCoordinate::new(own_file, self.self_position),
            exec_coord: BinlogCoordinate::new(upstream_file.clone(), self.exec_position),
            fetch_coord: BinlogCoordinate::new(upstream_file, fetch_position),
            io_running: self.running,
            sql_running: self.running,
            seconds_behind_upstream: self.running.then_some(0),
            last_probe_ok: self.healthy,
            server_id: self.server_id,
            log_bin_enabled: self.log_bin_enabled,
            log_replica_updates: self.log_replica_updates,
            read_only: self.read_only,
        }
    }
}

/// Builder for [`MockCluster`].
#[derive(Debug, Default)]
pub struct MockClusterBuilder {
    cluster_name: Option<String>,
    marker_prefix: Option<String>,
    specs: Vec<NodeSpec>,
}

impl MockClusterBuilder {
    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = Some(name.into());
        self
    }

    /// Event infos starting with this prefix are treated as pseudo-GTID
    /// markers by the scanner.
    pub fn marker_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.marker_prefix = Some(prefix.into());
        self
    }

    pub fn node(mut self, spec: NodeSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn build(self) -> MockCluster {
        let nodes = self
            .specs
            .into_iter()
            .map(|spec| {
                let node = spec.into_node();
                (node.key.clone(), SimNode::new(node))
            })
            .collect();
        MockCluster {
            inner: Arc::new(Inner {
                cluster_name: self.cluster_name.unwrap_or_else(|| "test-cluster".into()),
                marker_prefix: self.marker_prefix.unwrap_or_else(|| "pgtid:".into()),
                nodes: RwLock::new(nodes),
                journal: Mutex::new(Vec::new()),
                scripted_failures: Mutex::new(Vec::new()),
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct SimNode {
    node: Node,
    binlog: Vec<BinlogEvent>,
    dead: bool,
}

impl SimNode {
    fn new(node: Node) -> Self {
        SimNode {
            node,
            binlog: Vec::new(),
            dead: false,
        }
    }
}

#[derive(Debug)]
struct Inner {
    cluster_name: String,
    marker_prefix: String,
    nodes: RwLock<HashMap<NodeKey, SimNode>>,
    journal: Mutex<Vec<(String, NodeKey)>>,
    scripted_failures: Mutex<Vec<(String, NodeKey)>>,
}

/// Simulated cluster backend. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct MockCluster {
    inner: Arc<Inner>,
}

impl MockCluster {
    pub fn builder() -> MockClusterBuilder {
        MockClusterBuilder::default()
    }

    /// The key a [`NodeSpec`] host resolves to.
    pub fn key(host: &str) -> NodeKey {
        NodeKey::new(host, MOCK_PORT)
    }

    /// Current state of a node. Panics on an unknown key; this is a test
    /// helper.
    pub async fn node(&self, key: &NodeKey) -> Node {
        self.inner
            .nodes
            .read()
            .await
            .get(key)
            .unwrap_or_else(|| panic!("unknown mock node {key}"))
            .node
            .clone()
    }

    /// Replace a node's binlog fixture.
    pub async fn set_binlog(&self, key: &NodeKey, events: Vec<BinlogEvent>) {
        if let Some(sim) = self.inner.nodes.write().await.get_mut(key) {
            sim.binlog = events;
        }
    }

    /// Make the node stop answering probes. Inventory rows survive.
    pub async fn kill(&self, key: &NodeKey) {
        if let Some(sim) = self.inner.nodes.write().await.get_mut(key) {
            sim.dead = true;
            sim.node.last_probe_ok = false;
        }
    }

    /// Script the next driver call `op` against `key` to fail once.
    ///
    /// `op` names match the `op` field of
    /// [`TopologyError::Driver`]: `stop-replica`, `stop-replica-nicely`,
    /// `start-replica`, `start-replica-until`, `change-upstream`,
    /// `reset-replica`, `set-writable`.
    pub async fn fail_next(&self, op: &str, key: &NodeKey) {
        self.inner
            .scripted_failures
            .lock()
            .await
            .push((op.to_string(), key.clone()));
    }

    /// Every probe and driver call so far, in order.
    pub async fn journal(&self) -> Vec<(String, NodeKey)> {
        self.inner.journal.lock().await.clone()
    }

    /// Journal entries for one operation name.
    pub async fn calls_of(&self, op: &str) -> Vec<NodeKey> {
        self.inner
            .journal
            .lock()
            .await
            .iter()
            .filter(|(name, _)| name == op)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Walk upstream links looking for a cycle; returns the keys on the
    /// first cycle found. A co-master pair reports a 2-element cycle.
    pub async fn find_cycle(&self) -> Option<Vec<NodeKey>> {
        let nodes = self.inner.nodes.read().await;
        for start in nodes.keys() {
            let mut path = vec![start.clone()];
            let mut cursor = start.clone();
            while let Some(upstream) = nodes.get(&cursor).and_then(|sim| sim.node.upstream.clone())
            {
                if let Some(idx) = path.iter().position(|k| *k == upstream) {
                    return Some(path[idx..].to_vec());
                }
                path.push(upstream.clone());
                if !nodes.contains_key(&upstream) {
                    break;
                }
                cursor = upstream;
            }
        }
        None
    }

    async fn record(&self, op: &str, key: &NodeKey) {
        self.inner.journal.lock().await.push((op.to_string(), key.clone()));
    }

    async fn take_scripted_failure(&self, op: &str, key: &NodeKey) -> bool {
        let mut scripted = self.inner.scripted_failures.lock().await;
        if let Some(idx) = scripted
            .iter()
            .position(|(s_op, s_key)| s_op == op && s_key == key)
        {
            scripted.remove(idx);
            return true;
        }
        false
    }

    /// Shared entry for all driver mutations: journal, scripted failures,
    /// liveness.
    async fn driver_entry(&self, op: &'static str, key: &NodeKey) -> TopologyResult<()> {
        self.record(op, key).await;
        if self.take_scripted_failure(op, key).await {
            return Err(TopologyError::Driver {
                key: key.clone(),
                op,
                message: "scripted failure".into(),
            });
        }
        let nodes = self.inner.nodes.read().await;
        let sim = nodes
            .get(key)
            .ok_or_else(|| TopologyError::NotFound(key.clone()))?;
        if sim.dead {
            return Err(TopologyError::Driver {
                key: key.clone(),
                op,
                message: "node is down".into(),
            });
        }
        Ok(())
    }

    async fn mutate(
        &self,
        key: &NodeKey,
        apply: impl FnOnce(&mut Node),
    ) -> TopologyResult<Node> {
        let mut nodes = self.inner.nodes.write().await;
        let sim = nodes
            .get_mut(key)
            .ok_or_else(|| TopologyError::NotFound(key.clone()))?;
        apply(&mut sim.node);
        Ok(sim.node.clone())
    }
}

#[async_trait]
impl Inventory for MockCluster {
    async fn read_instance(&self, key: &NodeKey) -> TopologyResult<Option<Node>> {
        Ok(self
            .inner
            .nodes
            .read()
            .await
            .get(key)
            .map(|sim| sim.node.clone()))
    }

    async fn read_cluster_instances(&self, cluster: &str) -> TopologyResult<Vec<Node>> {
        if cluster != self.inner.cluster_name {
            return Ok(Vec::new());
        }
        let nodes = self.inner.nodes.read().await;
        let mut all: Vec<Node> = nodes.values().map(|sim| sim.node.clone()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }

    async fn read_replica_instances(&self, upstream: &NodeKey) -> TopologyResult<Vec<Node>> {
        let nodes = self.inner.nodes.read().await;
        let mut replicas: Vec<Node> = nodes
            .values()
            .filter(|sim| sim.node.upstream.as_ref() == Some(upstream))
            .map(|sim| sim.node.clone())
            .collect();
        replicas.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(replicas)
    }
}

#[async_trait]
impl Prober for MockCluster {
    async fn probe(&self, key: &NodeKey) -> TopologyResult<Node> {
        self.record("probe", key).await;
        let nodes = self.inner.nodes.read().await;
        let sim = nodes.get(key).ok_or_else(|| TopologyError::Unreachable {
            key: key.clone(),
            message: "unknown host".into(),
        })?;
        if sim.dead {
            return Err(TopologyError::Unreachable {
                key: key.clone(),
                message: "connection refused".into(),
            });
        }
        Ok(sim.node.clone())
    }
}

#[async_trait]
impl Driver for MockCluster {
    async fn stop_replica(&self, key: &NodeKey) -> TopologyResult<Node> {
        self.driver_entry("stop-replica", key).await?;
        self.mutate(key, |node| {
            node.io_running = false;
            node.sql_running = false;
        })
        .await
    }

    async fn stop_replica_nicely(&self, key: &NodeKey) -> TopologyResult<Node> {
        self.driver_entry("stop-replica-nicely", key).await?;
        self.mutate(key, |node| {
            // Drain: the SQL thread applies what the I/O thread fetched.
            let fetched = node.fetch_coord.clone();
            advance_applied(node, &fetched);
            node.io_running = false;
            node.sql_running = false;
        })
        .await
    }

    async fn start_replica(&self, key: &NodeKey) -> TopologyResult<Node> {
        self.driver_entry("start-replica", key).await?;
        self.mutate(key, |node| {
            if node.upstream.is_some() {
                node.io_running = true;
                node.sql_running = true;
                node.seconds_behind_upstream = Some(0);
            }
        })
        .await
    }

    async fn start_replica_until(
        &self,
        key: &NodeKey,
        until: &BinlogCoordinate,
    ) -> TopologyResult<Node> {
        self.driver_entry("start-replica-until", key).await?;
        self.mutate(key, |node| {
            advance_applied(node, until);
            // The server halts the threads once the position is reached.
            node.io_running = false;
            node.sql_running = false;
        })
        .await
    }

    async fn change_upstream(
        &self,
        key: &NodeKey,
        new_upstream: &NodeKey,
        resume: &BinlogCoordinate,
    ) -> TopologyResult<Node> {
        self.driver_entry("change-upstream", key).await?;
        {
            let nodes = self.inner.nodes.read().await;
            let sim = nodes
                .get(key)
                .ok_or_else(|| TopologyError::NotFound(key.clone()))?;
            if sim.node.io_running || sim.node.sql_running {
                return Err(TopologyError::Driver {
                    key: key.clone(),
                    op: "change-upstream",
                    message: "replication threads are running".into(),
                });
            }
        }
        self.mutate(key, |node| {
            node.upstream = Some(new_upstream.clone());
            node.exec_coord = resume.clone();
            node.fetch_coord = resume.clone();
        })
        .await
    }

    async fn reset_replica(&self, key: &NodeKey) -> TopologyResult<Node> {
        self.driver_entry("reset-replica", key).await?;
        self.mutate(key, |node| {
            node.upstream = None;
            node.io_running = false;
            node.sql_running = false;
            node.exec_coord = BinlogCoordinate::new("", 0);
            node.fetch_coord = BinlogCoordinate::new("", 0);
            node.seconds_behind_upstream = None;
        })
        .await
    }

    async fn set_writable(&self, key: &NodeKey, writable: bool) -> TopologyResult<Node> {
        self.driver_entry("set-writable", key).await?;
        self.mutate(key, |node| {
            node.read_only = !writable;
        })
        .await
    }
}

/// Advance a node's applied position to `to`, moving its own write
/// position by the same distance (the node logs applied updates).
fn advance_applied(node: &mut Node, to: &BinlogCoordinate) {
    if node.exec_coord.smaller_than(to) {
        let delta = to.position.saturating_sub(node.exec_coord.position);
        node.self_coord.position += delta;
        node.exec_coord = to.clone();
        if node.fetch_coord.smaller_than(to) {
            node.fetch_coord = to.clone();
        }
    }
}

#[async_trait]
impl BinlogScanner for MockCluster {
    async fn last_marker(
        &self,
        node: &Node,
    ) -> TopologyResult<Option<(BinlogCoordinate, String)>> {
        let nodes = self.inner.nodes.read().await;
        let Some(sim) = nodes.get(&node.key) else {
            return Ok(None);
        };
        Ok(sim
            .binlog
            .iter()
            .rev()
            .find(|event| event.info.starts_with(&self.inner.marker_prefix))
            .map(|event| (event.coord.clone(), event.info.clone())))
    }

    async fn find_marker(
        &self,
        node: &Node,
        marker: &str,
    ) -> TopologyResult<Option<BinlogCoordinate>> {
        let nodes = self.inner.nodes.read().await;
        let Some(sim) = nodes.get(&node.key) else {
            return Ok(None);
        };
        Ok(sim
            .binlog
            .iter()
            .find(|event| event.info == marker)
            .map(|event| event.coord.clone()))
    }

    async fn events_at_and_after(
        &self,
        node: &Node,
        from: &BinlogCoordinate,
    ) -> TopologyResult<Vec<BinlogEvent>> {
        let nodes = self.inner.nodes.read().await;
        let Some(sim) = nodes.get(&node.key) else {
            return Ok(Vec::new());
        };
        Ok(sim
            .binlog
            .iter()
            .filter(|event| !event.coord.smaller_than(from))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_wires_upstream_links() {
        let cluster = MockCluster::builder()
            .node(NodeSpec::master("m", 1))
            .node(NodeSpec::replica("r", "m", 2))
            .build();
        let replica = cluster.node(&MockCluster::key("r")).await;
        assert_eq!(replica.upstream, Some(MockCluster::key("m")));
        assert!(replica.replication_running());
        assert_eq!(replica.exec_coord.file, "m-bin.000001");
    }

    #[tokio::test]
    async fn stop_then_change_upstream_then_start() {
        let cluster = MockCluster::builder()
            .node(NodeSpec::master("m", 1))
            .node(NodeSpec::replica("a", "m", 2))
            .node(NodeSpec::replica("b", "m", 3))
            .build();
        let a = MockCluster::key("a");
        cluster.stop_replica(&a).await.unwrap();
        let node = cluster
            .change_upstream(&a, &MockCluster::key("b"), &BinlogCoordinate::new("b-bin.000001", 500))
            .await
            .unwrap();
        assert_eq!(node.upstream, Some(MockCluster::key("b")));
        assert_eq!(node.exec_coord.position, 500);
        let node = cluster.start_replica(&a).await.unwrap();
        assert!(node.replication_running());
    }

    #[tokio::test]
    async fn change_upstream_refuses_running_replica() {
        let cluster = MockCluster::builder()
            .node(NodeSpec::master("m", 1))
            .node(NodeSpec::replica("a", "m", 2))
            .build();
        let result = cluster
            .change_upstream(
                &MockCluster::key("a"),
                &MockCluster::key("m"),
                &BinlogCoordinate::new("m-bin.000001", 1),
            )
            .await;
        assert!(matches!(result, Err(TopologyError::Driver { .. })));
    }

    #[tokio::test]
    async fn start_until_advances_applied_and_own_positions() {
        let cluster = MockCluster::builder()
            .node(NodeSpec::master("m", 1))
            .node(NodeSpec::replica("a", "m", 2).exec_position(100).self_position(400))
            .build();
        let a = MockCluster::key("a");
        cluster.stop_replica(&a).await.unwrap();
        let node = cluster
            .start_replica_until(&a, &BinlogCoordinate::new("m-bin.000001", 160))
            .await
            .unwrap();
        assert_eq!(node.exec_coord.position, 160);
        assert_eq!(node.self_coord.position, 460);
        assert!(!node.io_running && !node.sql_running);
    }

    #[tokio::test]
    async fn scripted_failure_fires_once() {
        let cluster = MockCluster::builder()
            .node(NodeSpec::master("m", 1))
            .node(NodeSpec::replica("a", "m", 2))
            .build();
        let a = MockCluster::key("a");
        cluster.fail_next("stop-replica", &a).await;
        assert!(cluster.stop_replica(&a).await.is_err());
        assert!(cluster.stop_replica(&a).await.is_ok());
    }

    #[tokio::test]
    async fn dead_node_fails_probes_but_keeps_inventory_row() {
        let cluster = MockCluster::builder()
            .node(NodeSpec::master("m", 1))
            .build();
        let m = MockCluster::key("m");
        cluster.kill(&m).await;
        assert!(matches!(
            cluster.probe(&m).await,
            Err(TopologyError::Unreachable { .. })
        ));
        let cached = cluster.read_instance(&m).await.unwrap().unwrap();
        assert!(!cached.last_probe_ok);
    }

    #[tokio::test]
    async fn find_cycle_reports_co_master_pair() {
        let cluster = MockCluster::builder()
            .node(NodeSpec::replica("a", "b", 1))
            .node(NodeSpec::replica("b", "a", 2))
            .build();
        let cycle = cluster.find_cycle().await.unwrap();
        assert_eq!(cycle.len(), 2);
    }

    #[tokio::test]
    async fn acyclic_tree_has_no_cycle() {
        let cluster = MockCluster::builder()
            .node(NodeSpec::master("m", 1))
            .node(NodeSpec::replica("a", "m", 2))
            .node(NodeSpec::replica("b", "a", 3))
            .build();
        assert!(cluster.find_cycle().await.is_none());
    }

    #[tokio::test]
    async fn journal_records_call_order() {
        let cluster = MockCluster::builder()
            .node(NodeSpec::master("m", 1))
            .node(NodeSpec::replica("a", "m", 2))
            .build();
        let a = MockCluster::key("a");
        cluster.probe(&a).await.unwrap();
        cluster.stop_replica(&a).await.unwrap();
        cluster.start_replica(&a).await.unwrap();
        let journal = cluster.journal().await;
        let names: Vec<&str> = journal.iter().map(|(op, _)| op.as_str()).collect();
        assert_eq!(names, vec!["probe", "stop-replica", "start-replica"]);
    }
}
