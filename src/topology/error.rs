//! Error types for the topology refactoring layer.
//!
//! # Error Handling Patterns
//!
//! Operators distinguish two phases with different rules:
//!
//! ## Before mutation (fail-fast, nothing to undo)
//!
//! Precondition violations, eligibility refusals and lease acquisition
//! failures are returned as-is; no remote state has been touched.
//!
//! ## During mutation (first error wins, cleanup always runs)
//!
//! Once a driver primitive has executed, the first failing step becomes the
//! operator's return error and control jumps to cleanup: every node the
//! operator attempted to stop gets a restart attempt and every lease taken
//! is released. Cleanup's own failures are logged at warn level and never
//! mask the driving error.

use thiserror::Error;

use crate::types::{BinlogCoordinate, NodeKey};

/// Result type for topology operations.
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Errors surfaced by probes, eligibility gates, leases, driver primitives
/// and the pseudo-GTID matcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// The node could not be reached for an authoritative read.
    #[error("cannot probe node {key}: {message}")]
    Unreachable { key: NodeKey, message: String },

    /// The inventory has no record of the node.
    #[error("node not found in inventory: {0}")]
    NotFound(NodeKey),

    /// An operator was pointed at a node that is not a replica.
    #[error("node is not a replica: {0}")]
    NotAReplica(NodeKey),

    /// The target's upstream is not a replica itself, so there is no
    /// grandparent to move up to.
    #[error("upstream is not a replica itself: {0}")]
    UpstreamNotAReplica(NodeKey),

    /// A two-node operator was given the same node twice.
    #[error("attempt to operate on {0} against itself")]
    SameNode(NodeKey),

    /// The two nodes do not share an upstream.
    #[error("nodes are not siblings: {0}, {1}")]
    NotSiblings(NodeKey, NodeKey),

    /// The target is already one half of a co-master pair.
    #[error("node {node} is already co-master of {upstream}")]
    AlreadyCoMaster { node: NodeKey, upstream: NodeKey },

    /// A co-master cycle may only involve a master with no known further
    /// upstream.
    #[error("master {master} already has a known upstream: {upstream}")]
    UpstreamHasKnownUpstream { master: NodeKey, upstream: NodeKey },

    /// Eligibility refusal: the node failed its most recent health probe.
    #[error("node {0} failed its last probe")]
    LastProbeFailed(NodeKey),

    /// Eligibility refusal: replication threads are not both running.
    #[error("replication threads are not running on {0}")]
    ReplicationNotRunning(NodeKey),

    /// Eligibility refusal: the SQL thread has not caught up with the I/O
    /// thread.
    #[error("SQL thread is not up-to-date with I/O thread on {0}")]
    SqlThreadBehind(NodeKey),

    /// Eligibility refusal: replication lag could not be determined.
    #[error("cannot determine replication lag on {0}")]
    LagUnknown(NodeKey),

    /// Eligibility refusal: marker matching needs the node's own binlog.
    #[error("pseudo-GTID matching requires a binary log on {0}")]
    MatchRequiresBinlog(NodeKey),

    /// The prospective upstream cannot serve this node as a replica.
    #[error("{node} cannot replicate from {upstream}: {reason}")]
    CannotReplicateFrom {
        node: NodeKey,
        upstream: NodeKey,
        reason: ReplicationUnfitness,
    },

    /// A maintenance lease could not be acquired.
    #[error("cannot begin maintenance on {0}")]
    MaintenanceUnavailable(NodeKey),

    /// A maintenance lease release was attempted with a stale token.
    #[error("maintenance token {token_id} does not hold the lease on {key}")]
    StaleMaintenanceToken { key: NodeKey, token_id: u64 },

    /// A driver primitive failed against a node.
    #[error("driver {op} failed on {key}: {message}")]
    Driver {
        key: NodeKey,
        op: &'static str,
        message: String,
    },

    /// No pseudo-GTID marker exists in the node's recent binlog history.
    #[error("no pseudo-GTID marker found on {0}")]
    MarkerNotFound(NodeKey),

    /// A marker seen on one node has no twin on the other.
    #[error("marker {marker:?} not found on {key}")]
    MarkerNotMatched { key: NodeKey, marker: String },

    /// The forward event diff proved the target is ahead of the proposed
    /// upstream; re-pointing would lose transactions.
    #[error("{target} is more advanced than {other}; refusing to re-point")]
    TargetMoreAdvanced { target: NodeKey, other: NodeKey },

    /// Promotion refused: a sibling has applied more than the candidate.
    #[error("node {target} has a more advanced sibling: {sibling}")]
    MoreAdvancedSibling { target: NodeKey, sibling: NodeKey },

    /// Promotion refused: the candidate's upstream still replicates.
    #[error("upstream {0} appears to be replicating; refusing promotion")]
    UpstreamStillReplicating(NodeKey),

    /// Promotion refused: the candidate's upstream still answers probes.
    #[error("upstream {0} appears to be reachable; refusing promotion")]
    UpstreamStillReachable(NodeKey),

    /// A resume coordinate was expected but could not be computed.
    #[error("no resume coordinate past {past} on {key}")]
    NoResumeCoordinate { key: NodeKey, past: BinlogCoordinate },
}

/// Why a node cannot replicate from a prospective upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationUnfitness {
    /// The prospective upstream does not write a binary log.
    BinlogDisabled,
    /// The prospective upstream is a replica that does not log applied
    /// events, so its downstream would miss them.
    ReplicaUpdatesNotLogged,
    /// Both nodes report the same server id.
    DuplicateServerId,
}

impl std::fmt::Display for ReplicationUnfitness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationUnfitness::BinlogDisabled => write!(f, "binary logging is disabled"),
            ReplicationUnfitness::ReplicaUpdatesNotLogged => {
                write!(f, "replica does not log applied events")
            }
            ReplicationUnfitness::DuplicateServerId => write!(f, "server ids are identical"),
        }
    }
}
