//! Storage backends for persisted bucket state.
//!
//! The limiter never talks to a concrete store directly. It resolves a
//! [`StorageBackend`] through a [`StorageRegistry`] at construction time and
//! issues one `get` followed by one `set` per decision. The pair is not
//! atomic; backends shared between processes must provide their own
//! per-key serialization if lost updates matter.

mod memory;
mod registry;

pub use memory::MemoryStorage;
pub use registry::{StorageFactory, StorageRegistry};

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::ratelimit::BucketState;

/// Backend-specific options, everything under `storage.*` except `type`.
pub type StorageOptions = HashMap<String, serde_json::Value>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend failure: {0}")]
    Backend(String),
    #[error("Invalid storage options: {0}")]
    InvalidOptions(String),
}

/// Key/value store holding one [`BucketState`] per entity id.
///
/// Both operations may suspend (e.g. network I/O). Failures are passed back
/// to the caller of the limiter as-is; nothing is retried.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch the stored state for `key`, or `None` if the key was never set.
    async fn get(&self, key: &str) -> Result<Option<BucketState>, StorageError>;

    /// Store `value` under `key` and hand it back.
    async fn set(&self, key: &str, value: BucketState) -> Result<BucketState, StorageError>;
}
