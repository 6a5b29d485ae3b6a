//! Retry policies for the read side of the refactoring layer.
//!
//! Only reads are retried. A probe or inventory lookup that failed on a
//! network blip is safe to repeat; a driver mutation is not, because the
//! remote state machine may have acted on it before the response was lost.
//! A failed driver primitive therefore routes the operator to its cleanup
//! path instead of being re-issued.
//!
//! # Available Policies
//!
//! | Policy | Min Delay | Max Delay | Retries | Use Case |
//! |--------|-----------|-----------|---------|----------|
//! | `probe_policy` | 50ms | 2s | 2 | authoritative live reads |
//! | `inventory_policy` | 10ms | 250ms | 3 | cached inventory reads |
//!
//! All policies include jitter to prevent thundering herd when several
//! operators touch the same cluster.
//!
//! # Example
//!
//! ```rust,ignore
//! use backon::Retryable;
//! use regraft::topology::retry;
//!
//! let node = (|| async { prober.probe(&key).await })
//!     .retry(retry::probe_policy())
//!     .await?;
//! ```

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::constants::{
    INVENTORY_RETRY_MAX_DELAY_MS, INVENTORY_RETRY_MAX_TIMES, INVENTORY_RETRY_MIN_DELAY_MS,
    PROBE_RETRY_MAX_DELAY_MS, PROBE_RETRY_MAX_TIMES, PROBE_RETRY_MIN_DELAY_MS,
};

/// Policy for authoritative live probes.
///
/// Probes open a connection to the target server; transient connect
/// failures settle within a couple of attempts, and a server that stays
/// unreachable should fail the operator quickly rather than stall it.
pub fn probe_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(PROBE_RETRY_MIN_DELAY_MS))
        .with_max_delay(Duration::from_millis(PROBE_RETRY_MAX_DELAY_MS))
        .with_max_times(PROBE_RETRY_MAX_TIMES)
        .with_jitter()
}

/// Policy for cached inventory reads.
///
/// Inventory reads hit the local discovery store; failures are rare and
/// short, so the policy retries fast and gives up fast.
pub fn inventory_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(INVENTORY_RETRY_MIN_DELAY_MS))
        .with_max_delay(Duration::from_millis(INVENTORY_RETRY_MAX_DELAY_MS))
        .with_max_times(INVENTORY_RETRY_MAX_TIMES)
        .with_jitter()
}
