//! Configuration for the refactoring layer.
//!
//! This layer has deliberately few knobs: the identity it stamps on leases
//! and audit entries, and whether live probes get a retry budget. Anything
//! affecting correctness (stop ordering, lease ordering, cleanup) is not
//! configurable.

use crate::constants::{ACTOR_ENV_VAR, DEFAULT_ACTOR};

/// Configuration for [`RefactorCoordinator`](super::refactor::RefactorCoordinator).
#[derive(Debug, Clone)]
pub struct RefactorConfig {
    /// Actor identity recorded on maintenance leases and audit entries.
    pub actor: String,

    /// Whether live probes are retried per
    /// [`retry::probe_policy`](super::retry::probe_policy). Disabled in
    /// tests that script probe failures and want them surfaced verbatim.
    pub retry_probes: bool,
}

impl Default for RefactorConfig {
    fn default() -> Self {
        RefactorConfig {
            actor: DEFAULT_ACTOR.to_string(),
            retry_probes: true,
        }
    }
}

impl RefactorConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// Honors `REGRAFT_ACTOR`.
    pub fn from_env() -> Self {
        let mut config = RefactorConfig::default();
        if let Ok(actor) = std::env::var(ACTOR_ENV_VAR) {
            if !actor.is_empty() {
                config.actor = actor;
            }
        }
        config
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }
}
