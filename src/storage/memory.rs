//! In-process reference backend.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::{StorageBackend, StorageError, StorageOptions};
use crate::ratelimit::BucketState;

/// Bucket state kept in a process-local map.
///
/// No eviction and no visibility outside the current process. Individual
/// `get`/`set` calls are thread-safe, but a limiter's read-modify-write over
/// them is not atomic.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: DashMap<String, BucketState>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `storage.*` options. The memory backend takes none
    /// and ignores anything it is given.
    pub fn from_options(_options: &StorageOptions) -> Result<Self, StorageError> {
        Ok(Self::new())
    }

    /// Number of stored buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no bucket has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<BucketState>, StorageError> {
        Ok(self.buckets.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: BucketState) -> Result<BucketState, StorageError> {
        trace!(key = %key, "Storing bucket state");
        self.buckets.insert(key.to_string(), value.clone());
        Ok(value)
    }
}
