//! Runtime error types.

use thiserror::Error;

use island_core::ConnError;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A transport operation failed.
    #[error(transparent)]
    Connection(#[from] ConnError),

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A default-group send was requested but no group is configured.
    #[error("No group configured for outgoing messages")]
    NoDefaultGroup,

    /// An inbound frame was not a valid event.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
