//! Centralized configuration constants.
//!
//! This module consolidates the tunable defaults used throughout the
//! refactoring layer, so they can be reviewed and updated in one place.
//!
//! # Categories
//!
//! - **Identity Constants**: how the orchestrator announces itself
//! - **Lease Constants**: maintenance lease bookkeeping
//! - **Retry Constants**: read-side retry tuning (see `topology::retry`)

// =============================================================================
// Identity Constants
// =============================================================================

/// Actor name recorded on maintenance leases and audit entries when no
/// explicit actor is configured.
pub const DEFAULT_ACTOR: &str = "regraft";

/// Environment variable overriding the actor name.
pub const ACTOR_ENV_VAR: &str = "REGRAFT_ACTOR";

// =============================================================================
// Lease Constants
// =============================================================================

/// Token id the in-memory lock service starts counting from. Token ids are
/// strictly increasing within one process; zero is never a valid token.
pub const FIRST_MAINTENANCE_TOKEN_ID: u64 = 1;

// =============================================================================
// Retry Constants (read path only; driver mutations are never retried)
// =============================================================================

/// Initial backoff for live-probe retries.
pub const PROBE_RETRY_MIN_DELAY_MS: u64 = 50;

/// Backoff ceiling for live-probe retries.
pub const PROBE_RETRY_MAX_DELAY_MS: u64 = 2_000;

/// Probe attempts beyond the first.
pub const PROBE_RETRY_MAX_TIMES: usize = 2;

/// Initial backoff for inventory reads.
pub const INVENTORY_RETRY_MIN_DELAY_MS: u64 = 10;

/// Backoff ceiling for inventory reads.
pub const INVENTORY_RETRY_MAX_DELAY_MS: u64 = 250;

/// Inventory read attempts beyond the first.
pub const INVENTORY_RETRY_MAX_TIMES: usize = 3;
