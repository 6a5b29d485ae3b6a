//! # Regraft
//! Topology refactoring core for binlog-replication clusters.
//!
//! This crate reshapes a running master/replica replication tree (moving
//! a replica to a different upstream, promoting a replica to master,
//! establishing a co-master pair, or recovering a broken branch) while
//! preserving the invariant that no committed transaction is lost or
//! silently duplicated across the reshape.
//!
//! # Goals
//! - Safe-to-interrupt multi-node state transitions: every stop has a
//!   paired restart attempt, every lease a guaranteed release
//! - Two matching strategies: classic coordinate math where logs are
//!   comparable, pseudo-GTID marker matching where they are not
//! - Explicit collaborators at every seam, so backends and test doubles
//!   plug in without process-wide state
//!
//! ## Getting started
//! Install `regraft` with `cargo add regraft` or include the following
//! snippet in your `Cargo.toml` dependencies:
//! ```toml
//! regraft = "0.1"
//! ```
//!
//! ### Reshaping a topology
//! [`RefactorCoordinator`](topology::RefactorCoordinator) is the entry
//! point. Hand it your backends for the collaborator traits in
//! [`topology::traits`] and call the operators:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use regraft::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> regraft::Result<()> {
//!     let coordinator = RefactorCoordinator::with_defaults(
//!         inventory, prober, driver,
//!         Arc::new(InMemoryMaintenanceLocks::new()),
//!         scanner,
//!     );
//!
//!     // Skip a replica over its upstream, directly below its grandparent.
//!     let node = coordinator.move_up(&NodeKey::new("replica-7", 3306)).await?;
//!     println!("now replicating from {:?}", node.upstream);
//!     Ok(())
//! }
//! ```
//!
//! The `test-utilities` feature exposes an in-memory simulated cluster
//! implementing all backend traits, which this crate's own integration
//! tests drive end-to-end.

#![forbid(unsafe_code)]

pub mod constants;
pub mod error;
pub mod telemetry;
pub mod topology;
pub mod types;

pub use error::{Error, Result};

pub mod prelude {
    //! Main exports for embedding applications.
    pub use crate::error::{Error, Result};
    pub use crate::topology::{
        InMemoryMaintenanceLocks, Node, RefactorConfig, RefactorCoordinator, TopologyError,
        TopologyResult,
    };
    pub use crate::types::{BinlogCoordinate, BinlogEvent, NodeKey};

    pub mod traits {
        //! Collaborator seams to implement against your backends.
        pub use crate::topology::traits::*;
    }
}
