//! Coordinate-based relocation operators.
//!
//! These operators re-point replicas using classic binlog coordinate math,
//! which is valid only where the two logs involved are made
//! transaction-equivalent first: a replica caught up to its upstream's own
//! write position has applied exactly the upstream's log, and two siblings
//! equalized on applied position have applied identical events from their
//! shared upstream.

use tracing::info;

use crate::topology::error::{TopologyError, TopologyResult};
use crate::topology::node::{self, Node};
use crate::types::NodeKey;

use super::{OperationScope, RefactorCoordinator};

impl RefactorCoordinator {
    /// Promote `key` to replicate from its grandparent, skipping its
    /// current upstream.
    ///
    /// The upstream is frozen first, the target is advanced to the
    /// upstream's own write position, and only then re-pointed at the
    /// grandparent at the position the upstream had consumed. The
    /// advance makes the two logs transaction-equivalent at the re-point,
    /// which is what makes the coordinate math sound.
    pub async fn move_up(&self, key: &NodeKey) -> TopologyResult<Node> {
        let target = self.probe_live(key).await?;
        let upstream_key = target
            .upstream
            .clone()
            .ok_or_else(|| TopologyError::NotAReplica(key.clone()))?;
        self.eligibility_row(&target).await?.can_move()?;

        let upstream = self.probe_live(&upstream_key).await?;
        let grandparent_key = upstream
            .upstream
            .clone()
            .ok_or_else(|| TopologyError::UpstreamNotAReplica(upstream_key.clone()))?;
        let grandparent = self.probe_live(&grandparent_key).await?;
        target.can_replicate_from(&grandparent)?;

        info!(target = %key, upstream = %upstream_key, "will move node up the topology");
        let mut scope = OperationScope::new(self, "move-up", key.clone());
        let outcome = self
            .drive_move_up(&mut scope, &target, &upstream, &grandparent_key)
            .await;
        scope.finish(outcome).await
    }

    async fn drive_move_up(
        &self,
        scope: &mut OperationScope<'_>,
        target: &Node,
        upstream: &Node,
        grandparent_key: &NodeKey,
    ) -> TopologyResult<(Node, String)> {
        scope
            .lease_ordered(vec![
                (target.key.clone(), "move up".to_string()),
                (
                    upstream.key.clone(),
                    format!("child {} moves up", target.key),
                ),
            ])
            .await?;

        // Freeze what the upstream will forward before touching the target.
        let upstream = scope.stop(&upstream.key).await?;
        scope.stop(&target.key).await?;
        self.driver
            .start_replica_until(&target.key, &upstream.self_coord)
            .await?;
        // The target has now applied everything the upstream produced;
        // the upstream's consumed position is exactly where the target
        // must resume from the grandparent.
        let target = self
            .driver
            .change_upstream(&target.key, grandparent_key, &upstream.exec_coord)
            .await?;

        let message = format!(
            "moved {} up below {}; previous upstream: {}",
            target.key, grandparent_key, upstream.key
        );
        Ok((target, message))
    }

    /// Move `key` below its sibling `sibling_key`.
    ///
    /// Both are stopped, the one behind is advanced to the other's applied
    /// position, and the target resumes from the sibling's own write
    /// position. With identical applied histories, the sibling's write
    /// position is a coherent resume point.
    pub async fn move_below(
        &self,
        key: &NodeKey,
        sibling_key: &NodeKey,
    ) -> TopologyResult<Node> {
        if key == sibling_key {
            return Err(TopologyError::SameNode(key.clone()));
        }
        let target = self.probe_live(key).await?;
        let sibling = self.probe_live(sibling_key).await?;

        self.eligibility_row(&target).await?.can_move()?;
        self.eligibility_row(&sibling).await?.can_move()?;
        if !node::are_siblings(&target, &sibling) {
            return Err(TopologyError::NotSiblings(key.clone(), sibling_key.clone()));
        }
        target.can_replicate_from(&sibling)?;

        info!(target = %key, sibling = %sibling_key, "will move node below its sibling");
        let mut scope = OperationScope::new(self, "move-below", key.clone());
        let outcome = self.drive_move_below(&mut scope, &target, &sibling).await;
        scope.finish(outcome).await
    }

    async fn drive_move_below(
        &self,
        scope: &mut OperationScope<'_>,
        target: &Node,
        sibling: &Node,
    ) -> TopologyResult<(Node, String)> {
        scope
            .lease_ordered(vec![
                (target.key.clone(), format!("move below {}", sibling.key)),
                (sibling.key.clone(), format!("{} moves below this", target.key)),
            ])
            .await?;

        let target = scope.stop(&target.key).await?;
        let sibling = scope.stop(&sibling.key).await?;

        // Equalize: advance whichever applied less; equal positions need
        // no equalization.
        let (target, sibling) = if target.exec_coord.smaller_than(&sibling.exec_coord) {
            let target = self
                .driver
                .start_replica_until(&target.key, &sibling.exec_coord)
                .await?;
            (target, sibling)
        } else if sibling.exec_coord.smaller_than(&target.exec_coord) {
            let sibling = self
                .driver
                .start_replica_until(&sibling.key, &target.exec_coord)
                .await?;
            (target, sibling)
        } else {
            (target, sibling)
        };
        // Both have now applied the exact same events from the shared
        // upstream.

        let target = self
            .driver
            .change_upstream(&target.key, &sibling.key, &sibling.self_coord)
            .await?;

        let message = format!("moved {} below {}", target.key, sibling.key);
        Ok((target, message))
    }

    /// Make `key` a co-master of its upstream: the upstream becomes the
    /// target's downstream while the target keeps replicating from it,
    /// forming the one permitted 2-cycle.
    ///
    /// Only works against a master with no known further upstream; a
    /// master already replicating from somewhere known refuses.
    pub async fn make_co_master(&self, key: &NodeKey) -> TopologyResult<Node> {
        let target = self.probe_live(key).await?;
        let upstream_key = target
            .upstream
            .clone()
            .ok_or_else(|| TopologyError::NotAReplica(key.clone()))?;
        let upstream = self.probe_live(&upstream_key).await?;

        self.eligibility_row(&upstream)
            .await?
            .can_move_as_co_master()?;
        self.eligibility_row(&target).await?.can_move()?;

        if upstream.upstream.as_ref() == Some(key) {
            return Err(TopologyError::AlreadyCoMaster {
                node: key.clone(),
                upstream: upstream_key,
            });
        }
        if let Some(further) = upstream.upstream.clone() {
            if self.inventory.read_instance(&further).await?.is_some() {
                return Err(TopologyError::UpstreamHasKnownUpstream {
                    master: upstream_key,
                    upstream: further,
                });
            }
        }
        upstream.can_replicate_from(&target)?;

        info!(target = %key, master = %upstream_key, "will make node co-master of its upstream");
        let mut scope = OperationScope::new(self, "make-co-master", key.clone());
        let outcome = self.drive_make_co_master(&mut scope, &target, &upstream).await;
        scope.finish(outcome).await
    }

    async fn drive_make_co_master(
        &self,
        scope: &mut OperationScope<'_>,
        target: &Node,
        upstream: &Node,
    ) -> TopologyResult<(Node, String)> {
        scope
            .lease_ordered(vec![
                (
                    target.key.clone(),
                    format!("make co-master of {}", upstream.key),
                ),
                (
                    upstream.key.clone(),
                    format!("{} turns into co-master of this", target.key),
                ),
            ])
            .await?;

        // The old master was not stopped, but cleanup must start its new
        // replication threads for the cycle to actually run.
        scope.ensure_restart(&upstream.key);
        // The target used to be an ordinary replica; point the master at
        // *some* coherent position within it, namely its current write
        // position.
        self.driver
            .change_upstream(&upstream.key, &target.key, &target.self_coord)
            .await?;

        let message = format!("{} made co-master of {}", target.key, upstream.key);
        Ok((target.clone(), message))
    }

    /// Abandon `key`'s replication configuration entirely.
    pub async fn reset_replication(&self, key: &NodeKey) -> TopologyResult<Node> {
        let target = self.probe_live(key).await?;

        info!(target = %key, "will reset replication");
        let mut scope = OperationScope::new(self, "reset-replica", key.clone());
        let outcome = self.drive_reset(&mut scope, &target).await;
        scope.finish(outcome).await
    }

    async fn drive_reset(
        &self,
        scope: &mut OperationScope<'_>,
        target: &Node,
    ) -> TopologyResult<(Node, String)> {
        scope.lease(&target.key, "reset replica").await?;
        // Reset wipes configuration, so the cleanup start is a no-op or
        // surfaces a clean state either way.
        scope.ensure_restart(&target.key);
        if target.is_replica() {
            scope.stop(&target.key).await?;
        }
        let target = self.driver.reset_replica(&target.key).await?;
        let message = format!("{} replication reset", target.key);
        Ok((target, message))
    }
}
