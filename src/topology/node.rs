//! Node snapshots and eligibility predicates.
//!
//! A [`Node`] is a point-in-time view of one replication participant. Two
//! sources produce them with different freshness contracts:
//!
//! - the **Prober** reads the live server; its snapshots are authoritative
//!   and safe for coordinate math
//! - the **Inventory** serves cached rows; those are used only for
//!   eligibility gates, never for coordinate math
//!
//! The `can_*` predicates are the Rust rendition of "boolean plus reason":
//! they return `Ok(())` when the node is eligible and the structured refusal
//! as the error otherwise, so operators can propagate the reason with `?`.

use serde::{Deserialize, Serialize};

use super::error::{ReplicationUnfitness, TopologyError, TopologyResult};
use crate::types::{BinlogCoordinate, NodeKey};

/// A snapshot of one replication participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identity of this node.
    pub key: NodeKey,

    /// The upstream this node is configured to replicate from, if any.
    pub upstream: Option<NodeKey>,

    /// This node's own current write position: what a downstream consuming
    /// this node's log would read up to.
    pub self_coord: BinlogCoordinate,

    /// The position in the upstream's log this node has *applied*.
    pub exec_coord: BinlogCoordinate,

    /// The position in the upstream's log this node's I/O thread has
    /// *fetched* (always at or ahead of `exec_coord`).
    pub fetch_coord: BinlogCoordinate,

    /// Whether the I/O thread is running.
    pub io_running: bool,

    /// Whether the SQL (applier) thread is running.
    pub sql_running: bool,

    /// Observed lag behind the upstream, when the server could report one.
    pub seconds_behind_upstream: Option<u64>,

    /// Whether the most recent health probe of this node succeeded.
    pub last_probe_ok: bool,

    /// The server id this node announces to its replication peers.
    pub server_id: u32,

    /// Whether this node writes a binary log at all.
    pub log_bin_enabled: bool,

    /// Whether this node also logs events it applied from its upstream,
    /// making it fit to serve downstreams of its own.
    pub log_replica_updates: bool,

    /// Whether the node currently refuses writes.
    pub read_only: bool,
}

impl Node {
    /// True if replication is configured against an upstream.
    pub fn is_replica(&self) -> bool {
        self.upstream.is_some()
    }

    /// True if replication is configured and both threads are running.
    pub fn replication_running(&self) -> bool {
        self.is_replica() && self.io_running && self.sql_running
    }

    /// True if the SQL thread has applied everything the I/O thread
    /// fetched.
    pub fn sql_thread_up_to_date(&self) -> bool {
        self.fetch_coord == self.exec_coord
    }

    /// True if the I/O thread reports zero lag behind the upstream.
    pub fn io_thread_up_to_date(&self) -> bool {
        self.seconds_behind_upstream == Some(0)
    }

    /// Gate for coordinate-based relocation: the node must be healthy,
    /// actively replicating, and have measurable lag.
    pub fn can_move(&self) -> TopologyResult<()> {
        if !self.last_probe_ok {
            return Err(TopologyError::LastProbeFailed(self.key.clone()));
        }
        if !self.io_running || !self.sql_running {
            return Err(TopologyError::ReplicationNotRunning(self.key.clone()));
        }
        if self.seconds_behind_upstream.is_none() {
            return Err(TopologyError::LagUnknown(self.key.clone()));
        }
        Ok(())
    }

    /// Gate for turning this node into one half of a co-master pair. Less
    /// strict than [`can_move`](Node::can_move): the node is about to
    /// *become* a replica, so no thread state is required.
    pub fn can_move_as_co_master(&self) -> TopologyResult<()> {
        if !self.last_probe_ok {
            return Err(TopologyError::LastProbeFailed(self.key.clone()));
        }
        Ok(())
    }

    /// Gate for marker-based relocation. Matching scans the node's own
    /// binlog for markers, so the node must log the events it applies.
    pub fn can_move_via_match(&self) -> TopologyResult<()> {
        if !self.last_probe_ok {
            return Err(TopologyError::LastProbeFailed(self.key.clone()));
        }
        if !self.log_bin_enabled || !self.log_replica_updates {
            return Err(TopologyError::MatchRequiresBinlog(self.key.clone()));
        }
        Ok(())
    }

    /// Whether this node could be re-pointed to replicate from `upstream`.
    ///
    /// The prospective upstream must write a binary log; if it is itself a
    /// replica it must also log applied events (or its downstream would
    /// silently miss them); and the two server ids must differ.
    pub fn can_replicate_from(&self, upstream: &Node) -> TopologyResult<()> {
        let refuse = |reason| TopologyError::CannotReplicateFrom {
            node: self.key.clone(),
            upstream: upstream.key.clone(),
            reason,
        };
        if !upstream.log_bin_enabled {
            return Err(refuse(ReplicationUnfitness::BinlogDisabled));
        }
        if upstream.is_replica() && !upstream.log_replica_updates {
            return Err(refuse(ReplicationUnfitness::ReplicaUpdatesNotLogged));
        }
        if self.server_id == upstream.server_id {
            return Err(refuse(ReplicationUnfitness::DuplicateServerId));
        }
        Ok(())
    }
}

/// Whether both nodes replicate from the same upstream. A node is never its
/// own sibling.
pub fn are_siblings(a: &Node, b: &Node) -> bool {
    if !a.is_replica() || !b.is_replica() {
        return false;
    }
    if a.key == b.key {
        return false;
    }
    a.upstream == b.upstream
}

/// Whether `a` is the upstream `b` replicates from.
pub fn is_upstream_of(a: &Node, b: &Node) -> bool {
    if a.key == b.key {
        return false;
    }
    b.upstream.as_ref() == Some(&a.key)
}
