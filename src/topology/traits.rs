//! Collaborator traits for the refactoring layer.
//!
//! These traits abstract the services an operator composes, allowing for:
//! - Different backend implementations (live database pools, in-memory
//!   simulation for testing)
//! - Easier testing with mock backends
//! - Clear separation of concerns
//!
//! # Available Implementations
//!
//! - [`InMemoryMaintenanceLocks`](super::maintenance::InMemoryMaintenanceLocks):
//!   process-local exclusive leases
//! - [`TracingAudit`](super::audit::TracingAudit) /
//!   [`InMemoryAudit`](super::audit::InMemoryAudit): audit sinks
//! - `MockCluster` (behind the `test-utilities` feature): a simulated
//!   cluster implementing [`Inventory`], [`Prober`], [`Driver`] and
//!   [`BinlogScanner`] in one
//!
//! # Trait Hierarchy
//!
//! - [`Inventory`]: cached node facts, for eligibility gates only
//! - [`Prober`]: authoritative live reads, for coordinate math
//! - [`Driver`]: primitive replication mutations against one node
//! - [`MaintenanceLocks`]: cluster-wide per-node mutual exclusion
//! - [`Audit`]: a durable trail of completed operators
//! - [`BinlogScanner`]: marker lookup and event streaming for the matcher

use async_trait::async_trait;

use super::error::TopologyResult;
use super::maintenance::MaintenanceToken;
use super::node::Node;
use crate::types::{BinlogCoordinate, BinlogEvent, NodeKey};

/// Read access to the discovery store's cached node facts.
///
/// Inventory rows may be stale; operators use them for *eligibility gates*
/// only, never for coordinate math.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Read the cached row for one node. `Ok(None)` means the inventory has
    /// never seen this key.
    async fn read_instance(&self, key: &NodeKey) -> TopologyResult<Option<Node>>;

    /// Read all cached rows belonging to a named cluster.
    async fn read_cluster_instances(&self, cluster: &str) -> TopologyResult<Vec<Node>>;

    /// Read all cached rows of nodes replicating from `upstream`.
    async fn read_replica_instances(&self, upstream: &NodeKey) -> TopologyResult<Vec<Node>>;
}

/// Authoritative live reads. Every operator begins by probing its targets.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Read the node's state from the live server. The returned snapshot
    /// reflects a single point-in-time read and is safe for coordinate
    /// math.
    async fn probe(&self, key: &NodeKey) -> TopologyResult<Node>;
}

/// Primitive replication operations against one node.
///
/// Every call is potentially long-running network I/O; timeouts are the
/// implementation's responsibility and surface as
/// [`TopologyError::Driver`](super::error::TopologyError::Driver). Each
/// mutation returns the refreshed node snapshot, which callers use for
/// subsequent coordinate math.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Halt both replication threads.
    async fn stop_replica(&self, key: &NodeKey) -> TopologyResult<Node>;

    /// Halt replication after letting the SQL thread drain what the I/O
    /// thread already fetched.
    async fn stop_replica_nicely(&self, key: &NodeKey) -> TopologyResult<Node>;

    /// Start both replication threads.
    async fn start_replica(&self, key: &NodeKey) -> TopologyResult<Node>;

    /// Start replication and halt automatically once the applied position
    /// reaches `until` in the upstream's log.
    async fn start_replica_until(
        &self,
        key: &NodeKey,
        until: &BinlogCoordinate,
    ) -> TopologyResult<Node>;

    /// Reconfigure the node to replicate from `new_upstream`, resuming at
    /// `resume` in the new upstream's log.
    async fn change_upstream(
        &self,
        key: &NodeKey,
        new_upstream: &NodeKey,
        resume: &BinlogCoordinate,
    ) -> TopologyResult<Node>;

    /// Wipe the node's replication configuration.
    async fn reset_replica(&self, key: &NodeKey) -> TopologyResult<Node>;

    /// Toggle the node's read-only flag.
    async fn set_writable(&self, key: &NodeKey, writable: bool) -> TopologyResult<Node>;
}

/// Cluster-wide exclusive maintenance leases, one per node key.
///
/// No two orchestrator actors may hold leases on the same key
/// simultaneously; implementations enforce this. Operators acquire every
/// lease before mutating and release on every exit path.
#[async_trait]
pub trait MaintenanceLocks: Send + Sync {
    /// Acquire an exclusive lease on `key`. Fails with
    /// [`MaintenanceUnavailable`](super::error::TopologyError::MaintenanceUnavailable)
    /// while another lease on the key is live.
    async fn begin(
        &self,
        key: &NodeKey,
        actor: &str,
        reason: &str,
    ) -> TopologyResult<MaintenanceToken>;

    /// Release a lease. Fails with
    /// [`StaleMaintenanceToken`](super::error::TopologyError::StaleMaintenanceToken)
    /// if the token no longer holds it.
    async fn end(&self, token: MaintenanceToken) -> TopologyResult<()>;
}

/// A durable trail of completed operators. Written on the success path
/// only.
#[async_trait]
pub trait Audit: Send + Sync {
    /// Record a completed operator with its target and a human summary.
    async fn record(&self, operation: &str, key: &NodeKey, message: &str);
}

/// Marker lookup and event streaming over a node's binlog.
///
/// This is the seam to the pseudo-GTID locator: implementations may
/// stream-scan binlogs, query a log index, or call a helper embedded in the
/// database. The contract is that identical marker texts in two streams
/// denote the same logical moment across the replication graph, and that
/// markers are frequent enough for the post-marker tail to stay short.
#[async_trait]
pub trait BinlogScanner: Send + Sync {
    /// The most recent marker in the node's own binlog, scanning backward:
    /// its coordinate and its text. `Ok(None)` when no marker exists in
    /// retained history.
    async fn last_marker(
        &self,
        node: &Node,
    ) -> TopologyResult<Option<(BinlogCoordinate, String)>>;

    /// The coordinate of the entry with exactly `marker` as its text in the
    /// node's binlog, or `Ok(None)` when absent.
    async fn find_marker(
        &self,
        node: &Node,
        marker: &str,
    ) -> TopologyResult<Option<BinlogCoordinate>>;

    /// The node's binlog events starting at (and including) the event at
    /// `from`, in log order.
    async fn events_at_and_after(
        &self,
        node: &Node,
        from: &BinlogCoordinate,
    ) -> TopologyResult<Vec<BinlogEvent>>;
}
