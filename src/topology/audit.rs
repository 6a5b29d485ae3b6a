//! Audit trail for completed operators.
//!
//! Every operator that completes successfully records one [`AuditEntry`]:
//! which operation ran, against which node, who drove it, and a human
//! summary. Failed operators record nothing; their story is told by the
//! returned error and the log stream.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use super::traits::Audit;
use crate::types::NodeKey;

/// One completed operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub operation: String,
    pub target: NodeKey,
    pub message: String,
    pub actor: String,
    pub recorded_at: DateTime<Utc>,
}

/// Audit sink that emits structured tracing events.
#[derive(Debug, Clone)]
pub struct TracingAudit {
    actor: String,
}

impl TracingAudit {
    pub fn new(actor: impl Into<String>) -> Self {
        TracingAudit {
            actor: actor.into(),
        }
    }
}

#[async_trait]
impl Audit for TracingAudit {
    async fn record(&self, operation: &str, key: &NodeKey, message: &str) {
        info!(
            operation,
            target = %key,
            actor = %self.actor,
            message,
            "audit",
        );
    }
}

/// Audit sink that buffers entries in memory for later inspection.
#[derive(Debug, Default)]
pub struct InMemoryAudit {
    actor: String,
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAudit {
    pub fn new() -> Self {
        InMemoryAudit {
            actor: crate::constants::DEFAULT_ACTOR.to_string(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_actor(actor: impl Into<String>) -> Self {
        InMemoryAudit {
            actor: actor.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// All entries recorded so far, oldest first.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }

    /// Operation names recorded so far, oldest first.
    pub async fn operations(&self) -> Vec<String> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| e.operation.clone())
            .collect()
    }
}

#[async_trait]
impl Audit for InMemoryAudit {
    async fn record(&self, operation: &str, key: &NodeKey, message: &str) {
        let entry = AuditEntry {
            operation: operation.to_string(),
            target: key.clone(),
            message: message.to_string(),
            actor: self.actor.clone(),
            recorded_at: Utc::now(),
        };
        self.entries.lock().await.push(entry);
    }
}
