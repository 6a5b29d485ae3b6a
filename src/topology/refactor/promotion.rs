//! Marker-based matching and master promotion.
//!
//! Where relocation relies on coordinate math, the operators here rely on
//! pseudo-GTID markers, which work across arbitrary lineages: the `other`
//! node may be a sibling, an ancestor, or a cousin, as long as it is at
//! least as advanced as the target.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::topology::error::{TopologyError, TopologyResult};
use crate::topology::node::Node;
use crate::types::NodeKey;

use super::{OperationScope, RefactorCoordinator};

impl RefactorCoordinator {
    /// Re-point `key` below `other_key` by locating a shared pseudo-GTID
    /// marker in both binlogs and diffing the streams forward from it.
    ///
    /// Refuses, before any re-point, when the target proves to be more
    /// advanced than `other_key`. The lock flags let a composing operator
    /// that already holds a broader lease skip acquiring one here.
    pub async fn match_below(
        &self,
        key: &NodeKey,
        other_key: &NodeKey,
        lock_target: bool,
        lock_other: bool,
    ) -> TopologyResult<Node> {
        if key == other_key {
            return Err(TopologyError::SameNode(key.clone()));
        }
        let target = self.probe_live(key).await?;
        let other = self.probe_live(other_key).await?;

        self.eligibility_row(&target).await?.can_move_via_match()?;
        target.can_replicate_from(&other)?;

        info!(target = %key, other = %other_key, "will match node below another via pseudo-GTID");
        let mut scope = OperationScope::new(self, "match-below", key.clone());
        let outcome = self
            .drive_match_below(&mut scope, &target, &other, lock_target, lock_other)
            .await;
        scope.finish(outcome).await
    }

    async fn drive_match_below(
        &self,
        scope: &mut OperationScope<'_>,
        target: &Node,
        other: &Node,
        lock_target: bool,
        lock_other: bool,
    ) -> TopologyResult<(Node, String)> {
        let mut requests = Vec::new();
        if lock_target {
            requests.push((target.key.clone(), format!("match below {}", other.key)));
        }
        if lock_other {
            requests.push((other.key.clone(), format!("{} matches below this", target.key)));
        }
        scope.lease_ordered(requests).await?;

        debug!(target = %target.key, "stopping replication for marker search");
        let target = scope.stop(&target.key).await?;

        let (marker_coord, marker_text) = self.matcher.last_marker_on(&target).await?;
        let other_marker = self.matcher.find_marker_on(other, &marker_text).await?;
        let resume = self
            .matcher
            .compute_resume_coord(&target, &marker_coord, other, &other_marker)
            .await?;
        debug!(
            target = %target.key,
            other = %other.key,
            resume = %resume,
            "will match below at computed coordinate"
        );

        let target = self
            .driver
            .change_upstream(&target.key, &other.key, &resume)
            .await?;

        let message = format!("matched {} below {}", target.key, other.key);
        Ok((target, message))
    }

    /// Match every up-to-date sibling below `new_master_key`, concurrently.
    ///
    /// Takes the lease on the new master once; each sibling task leases
    /// only itself. Per-sibling failures are logged and do not abort the
    /// other siblings. An empty sibling set is a no-op.
    pub async fn enslave_siblings(
        &self,
        new_master_key: &NodeKey,
        siblings: Vec<Node>,
    ) -> TopologyResult<Node> {
        let new_master = self.probe_live(new_master_key).await?;

        info!(new_master = %new_master_key, siblings = siblings.len(), "will enslave siblings");
        let mut scope = OperationScope::new(self, "enslave-siblings", new_master_key.clone());
        let outcome = async {
            scope
                .lease(new_master_key, "siblings match below this")
                .await?;
            let attempts = self.fan_out_matches(new_master_key, &siblings).await;
            let message =
                format!("completed {attempts} sibling match attempts below {new_master_key}");
            Ok((new_master, message))
        }
        .await;
        scope.finish(outcome).await
    }

    /// The fan-out itself: one task per eligible sibling, a completion
    /// channel of capacity N. Callers hold whatever lease the new master
    /// needs. Returns the number of completed match attempts.
    async fn fan_out_matches(&self, new_master_key: &NodeKey, siblings: &[Node]) -> usize {
        let eligible: Vec<NodeKey> = siblings
            .iter()
            .filter(|s| s.key != *new_master_key && s.sql_thread_up_to_date())
            .map(|s| s.key.clone())
            .collect();
        if eligible.is_empty() {
            return 0;
        }

        let (tx, mut rx) = mpsc::channel(eligible.len());
        for sibling_key in eligible {
            let operator = self.clone();
            let new_master_key = new_master_key.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(error) = operator
                    .match_below(&sibling_key, &new_master_key, true, false)
                    .await
                {
                    warn!(
                        sibling = %sibling_key,
                        new_master = %new_master_key,
                        %error,
                        "failed to match sibling below new master"
                    );
                }
                let _ = tx.send(sibling_key).await;
            });
        }
        drop(tx);

        let mut completed = 0;
        while rx.recv().await.is_some() {
            completed += 1;
        }
        completed
    }

    /// Promote `key` to master of its peer group: match all siblings below
    /// it, then make it writable.
    ///
    /// Requires a positive signal that the current upstream is dead or
    /// non-replicating: an upstream that answers its probe and replicates,
    /// or answers and is healthy, refuses the promotion. The candidate
    /// must have applied everything it fetched and be at least as advanced
    /// as every sibling.
    pub async fn make_master(&self, key: &NodeKey) -> TopologyResult<Node> {
        let target = self.probe_live(key).await?;
        let upstream_key = target
            .upstream
            .clone()
            .ok_or_else(|| TopologyError::NotAReplica(key.clone()))?;

        match self.probe_live(&upstream_key).await {
            Ok(upstream) if upstream.is_replica() => {
                return Err(TopologyError::UpstreamStillReplicating(upstream_key));
            }
            Ok(upstream) if upstream.last_probe_ok => {
                return Err(TopologyError::UpstreamStillReachable(upstream_key));
            }
            // Answers but unhealthy and non-replicating, or unreachable:
            // the positive "dead master" signal.
            Ok(_) | Err(_) => {}
        }

        if !target.sql_thread_up_to_date() {
            return Err(TopologyError::SqlThreadBehind(key.clone()));
        }
        let siblings = self.inventory.read_replica_instances(&upstream_key).await?;
        self.require_most_advanced(&target, &siblings)?;

        info!(target = %key, "will promote node to master of its peer group");
        let mut scope = OperationScope::new(self, "make-master", key.clone());
        let outcome = self.drive_make_master(&mut scope, &target, siblings).await;
        scope.finish(outcome).await
    }

    async fn drive_make_master(
        &self,
        scope: &mut OperationScope<'_>,
        target: &Node,
        siblings: Vec<Node>,
    ) -> TopologyResult<(Node, String)> {
        scope
            .lease(&target.key, "siblings match below this")
            .await?;
        let attempts = self.fan_out_matches(&target.key, &siblings).await;
        let target = self.driver.set_writable(&target.key, true).await?;
        let message = format!(
            "made master of {}; {attempts} sibling match attempts completed",
            target.key
        );
        Ok((target, message))
    }

    /// Recover a failed *intermediate* master: promote `key` above it by
    /// matching it below its grandparent, then enslave its siblings.
    pub async fn make_local_master(&self, key: &NodeKey) -> TopologyResult<Node> {
        let target = self.probe_live(key).await?;
        let upstream_key = target
            .upstream
            .clone()
            .ok_or_else(|| TopologyError::NotAReplica(key.clone()))?;
        // The failed upstream cannot be probed; its inventory row still
        // knows the grandparent.
        let upstream_row = self
            .inventory
            .read_instance(&upstream_key)
            .await?
            .ok_or_else(|| TopologyError::NotFound(upstream_key.clone()))?;
        let grandparent_key = upstream_row
            .upstream
            .clone()
            .ok_or_else(|| TopologyError::UpstreamNotAReplica(upstream_key.clone()))?;
        self.probe_live(&grandparent_key).await?;

        let siblings = self.inventory.read_replica_instances(&upstream_key).await?;
        self.require_most_advanced(&target, &siblings)?;

        info!(
            target = %key,
            grandparent = %grandparent_key,
            "will promote node over its failed local master"
        );
        let mut scope = OperationScope::new(self, "make-local-master", key.clone());
        let outcome = self
            .drive_make_local_master(&mut scope, &target, &grandparent_key, siblings)
            .await;
        scope.finish(outcome).await
    }

    async fn drive_make_local_master(
        &self,
        scope: &mut OperationScope<'_>,
        target: &Node,
        grandparent_key: &NodeKey,
        siblings: Vec<Node>,
    ) -> TopologyResult<(Node, String)> {
        scope
            .lease(&target.key, "siblings match below this")
            .await?;
        scope.stop_nicely(&target.key).await?;
        // The scope already holds the target's lease; the inner match
        // takes none.
        let target = self
            .match_below(&target.key, grandparent_key, false, false)
            .await?;
        let attempts = self.fan_out_matches(&target.key, &siblings).await;
        let message = format!(
            "made {} local master below {}; {attempts} sibling match attempts completed",
            target.key, grandparent_key
        );
        Ok((target, message))
    }

    /// Strict promotion predicate: the candidate must not be behind any
    /// sibling's applied position.
    fn require_most_advanced(&self, target: &Node, siblings: &[Node]) -> TopologyResult<()> {
        for sibling in siblings {
            if sibling.key != target.key
                && target.exec_coord.smaller_than(&sibling.exec_coord)
            {
                return Err(TopologyError::MoreAdvancedSibling {
                    target: target.key.clone(),
                    sibling: sibling.key.clone(),
                });
            }
        }
        Ok(())
    }
}
