//! Error types for the Gatekeeper limiter.

use thiserror::Error;

use crate::storage::StorageError;

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configured storage type has no registered factory
    #[error("Unsupported storage type \"{0}\"")]
    UnsupportedStorage(String),

    /// Errors reported by the storage backend
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
