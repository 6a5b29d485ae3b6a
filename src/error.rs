//! Crate-level errors.
//!
//! The crate uses a two-layer error hierarchy:
//!
//! - [`Error`]: configuration and environment failures at the crate surface
//! - [`TopologyError`](crate::topology::TopologyError): probe, eligibility,
//!   lease, driver and matcher failures inside the refactoring layer
//!
//! [`TopologyError`] converts into [`Error`] via `From`, so refactoring
//! failures propagate through callers that only deal in the crate-level
//! type.

use std::{io, result};

use thiserror::Error as ThisError;

use crate::topology::TopologyError;

pub type Result<T> = result::Result<T, Error>;

/// Top-level error for embedding applications.
#[derive(Debug, ThisError)]
pub enum Error {
    /// An error in the environment or configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An error in the underlying I/O.
    #[error("IO error: {0:?}")]
    Io(io::ErrorKind),

    /// A failure inside the topology refactoring layer.
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.kind())
    }
}
