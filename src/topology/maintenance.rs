//! Maintenance leases: exclusive per-node mutual exclusion.
//!
//! A [`MaintenanceToken`] is the opaque handle to one active lease over one
//! node key. Operators acquire a lease on every node they will mutate, in
//! deterministic key order, before the first driver call; release happens
//! on every exit path (see `refactor::OperationScope`).
//!
//! [`InMemoryMaintenanceLocks`] is the process-local implementation. A
//! deployment spanning several orchestrator processes would substitute an
//! implementation backed by a shared store; the trait contract is the same:
//! at most one live lease per key.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{TopologyError, TopologyResult};
use super::traits::MaintenanceLocks;
use crate::constants::FIRST_MAINTENANCE_TOKEN_ID;
use crate::types::NodeKey;

/// Handle to one active exclusive lease over one node key.
///
/// Tokens are issued by [`MaintenanceLocks::begin`] and consumed by
/// [`MaintenanceLocks::end`]; the id ties the release to the exact
/// acquisition, so a stale token cannot release a lease someone else has
/// since taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceToken {
    pub id: u64,
    pub key: NodeKey,
    pub actor: String,
    pub reason: String,
    pub began_at: DateTime<Utc>,
}

/// Process-local lease table.
///
/// `begin` fails while a lease on the key is live; `end` validates the
/// token id before clearing the entry.
#[derive(Debug)]
pub struct InMemoryMaintenanceLocks {
    active: DashMap<NodeKey, MaintenanceToken>,
    next_id: AtomicU64,
}

impl InMemoryMaintenanceLocks {
    pub fn new() -> Self {
        InMemoryMaintenanceLocks {
            active: DashMap::new(),
            next_id: AtomicU64::new(FIRST_MAINTENANCE_TOKEN_ID),
        }
    }

    /// Whether a lease on `key` is currently live.
    pub fn is_held(&self, key: &NodeKey) -> bool {
        self.active.contains_key(key)
    }

    /// Number of live leases.
    pub fn held_count(&self) -> usize {
        self.active.len()
    }
}

#[async_trait]
impl MaintenanceLocks for InMemoryMaintenanceLocks {
    async fn begin(
        &self,
        key: &NodeKey,
        actor: &str,
        reason: &str,
    ) -> TopologyResult<MaintenanceToken> {
        let token = MaintenanceToken {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            key: key.clone(),
            actor: actor.to_string(),
            reason: reason.to_string(),
            began_at: Utc::now(),
        };
        // Entry-level locking makes the vacancy check and the insert one
        // atomic step.
        match self.active.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(TopologyError::MaintenanceUnavailable(key.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(key = %key, actor, reason, token_id = token.id, "maintenance lease acquired");
                slot.insert(token.clone());
                Ok(token)
            }
        }
    }

    async fn end(&self, token: MaintenanceToken) -> TopologyResult<()> {
        let removed = self
            .active
            .remove_if(&token.key, |_, active| active.id == token.id);
        match removed {
            Some(_) => {
                debug!(key = %token.key, token_id = token.id, "maintenance lease released");
                Ok(())
            }
            None => Err(TopologyError::StaleMaintenanceToken {
                key: token.key,
                token_id: token.id,
            }),
        }
    }
}
