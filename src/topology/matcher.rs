//! Pseudo-GTID matching: locating a shared logical moment in two binlogs.
//!
//! Classic coordinate math only works between a node and its direct
//! upstream, or between siblings frozen at identical applied positions.
//! When two nodes have different upstream lineages their coordinates are
//! incomparable, and the only way to re-point one under the other is to
//! find a *logical* synchronization point both have seen.
//!
//! The marker scheme provides that point: the database periodically writes
//! a distinctive, monotonically timestamped marker statement into its
//! binlog, and replication carries it everywhere. Identical marker texts in
//! two streams denote the same logical moment.
//!
//! [`Matcher`] answers three questions over the [`BinlogScanner`] seam:
//!
//! 1. the most recent marker a (stopped) target has applied, and its text
//! 2. where that same marker text sits in the other node's binlog
//! 3. given both marker positions, the coordinate in the other node's
//!    binlog from which the target should resume, or proof that the
//!    target is *ahead* of the other node and must not be re-pointed
//!
//! Question 3 is a lock-step walk of both streams from their marker
//! positions, comparing events one by one until one side runs out.

use std::sync::Arc;

use tracing::debug;

use super::error::{TopologyError, TopologyResult};
use super::node::Node;
use super::traits::BinlogScanner;
use crate::types::BinlogCoordinate;

/// Computes match points between two binlog streams.
#[derive(Clone)]
pub struct Matcher {
    scanner: Arc<dyn BinlogScanner>,
}

impl Matcher {
    pub fn new(scanner: Arc<dyn BinlogScanner>) -> Self {
        Matcher { scanner }
    }

    /// The most recent marker in `node`'s own binlog: its coordinate and
    /// text. A node with no marker in retained history cannot be matched.
    pub async fn last_marker_on(
        &self,
        node: &Node,
    ) -> TopologyResult<(BinlogCoordinate, String)> {
        self.scanner
            .last_marker(node)
            .await?
            .ok_or_else(|| TopologyError::MarkerNotFound(node.key.clone()))
    }

    /// The coordinate of the entry carrying exactly `marker` in `node`'s
    /// binlog.
    pub async fn find_marker_on(
        &self,
        node: &Node,
        marker: &str,
    ) -> TopologyResult<BinlogCoordinate> {
        self.scanner
            .find_marker(node, marker)
            .await?
            .ok_or_else(|| TopologyError::MarkerNotMatched {
                key: node.key.clone(),
                marker: marker.to_string(),
            })
    }

    /// The coordinate in `other`'s binlog from which `target` should
    /// resume, given the twin marker positions on both sides.
    ///
    /// Both streams are read starting at the marker event itself, then
    /// walked in lock-step comparing event info:
    ///
    /// - `target`'s stream exhausts first: `other` has events `target` has
    ///   not applied yet; resume at the first of those.
    /// - both streams exhaust together on aligned events: the two nodes
    ///   have applied the exact same history; resume just past `other`'s
    ///   last event.
    /// - `other`'s stream exhausts first, or an event pair disagrees:
    ///   `target` is more advanced than `other`; re-pointing would lose
    ///   transactions, so the match is refused.
    pub async fn compute_resume_coord(
        &self,
        target: &Node,
        target_marker: &BinlogCoordinate,
        other: &Node,
        other_marker: &BinlogCoordinate,
    ) -> TopologyResult<BinlogCoordinate> {
        let target_events = self
            .scanner
            .events_at_and_after(target, target_marker)
            .await?;
        let other_events = self.scanner.events_at_and_after(other, other_marker).await?;

        let more_advanced = || TopologyError::TargetMoreAdvanced {
            target: target.key.clone(),
            other: other.key.clone(),
        };

        // The marker event itself must be present on both sides; an empty
        // stream means the scanner and the marker coordinate disagree.
        if target_events.is_empty() {
            return Err(TopologyError::NoResumeCoordinate {
                key: target.key.clone(),
                past: target_marker.clone(),
            });
        }
        if other_events.is_empty() {
            return Err(TopologyError::NoResumeCoordinate {
                key: other.key.clone(),
                past: other_marker.clone(),
            });
        }

        for (i, target_event) in target_events.iter().enumerate() {
            let Some(other_event) = other_events.get(i) else {
                // Target kept going where other stopped.
                return Err(more_advanced());
            };
            if target_event.info != other_event.info {
                debug!(
                    target = %target.key,
                    other = %other.key,
                    position = i,
                    "event streams diverge after marker"
                );
                return Err(more_advanced());
            }
        }

        let aligned = target_events.len();
        let resume = match other_events.get(aligned) {
            // Other has unapplied events; resume at the first of them.
            Some(next_unapplied) => next_unapplied.coord.clone(),
            // Identical histories; resume just past other's last event.
            None => other_events[aligned - 1].next_coord.clone(),
        };
        debug!(
            target = %target.key,
            other = %other.key,
            aligned,
            resume = %resume,
            "computed resume coordinate"
        );
        Ok(resume)
    }
}
