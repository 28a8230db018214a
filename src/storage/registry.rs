//! Backend type name → factory lookup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::{MemoryStorage, StorageBackend, StorageError, StorageOptions};
use crate::error::{GatekeeperError, Result};

/// Builds a backend from its `storage.*` options.
pub type StorageFactory =
    Arc<dyn Fn(&StorageOptions) -> std::result::Result<Arc<dyn StorageBackend>, StorageError> + Send + Sync>;

/// Registry of storage backend types.
///
/// Registries are plain values: build one, register the backends you need and
/// hand it to [`RateLimiter::with_registry`](crate::ratelimit::RateLimiter::with_registry).
/// There is no process-wide instance.
pub struct StorageRegistry {
    factories: RwLock<HashMap<String, StorageFactory>>,
}

impl StorageRegistry {
    /// Create a registry with no backend types.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with the built-in `memory` backend registered.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register("memory", |options| {
            Ok(Arc::new(MemoryStorage::from_options(options)?) as Arc<dyn StorageBackend>)
        });
        registry
    }

    /// Register a backend type, replacing any previous factory of the same name.
    pub fn register<F>(&self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&StorageOptions) -> std::result::Result<Arc<dyn StorageBackend>, StorageError>
            + Send
            + Sync
            + 'static,
    {
        let kind = kind.into();
        debug!(kind = %kind, "Registering storage backend");
        self.factories.write().insert(kind, Arc::new(factory));
    }

    /// Whether a backend type is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.read().contains_key(kind)
    }

    /// Registered backend type names, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Instantiate a backend of the given type.
    ///
    /// Fails with [`GatekeeperError::UnsupportedStorage`] when `kind` was never
    /// registered, or with the factory's own error when the options are rejected.
    pub fn create(&self, kind: &str, options: &StorageOptions) -> Result<Arc<dyn StorageBackend>> {
        let factory = self
            .factories
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| GatekeeperError::UnsupportedStorage(kind.to_string()))?;

        let backend = factory(options)?;
        info!(kind = %kind, "Storage backend created");
        Ok(backend)
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("types", &self.types())
            .finish()
    }
}
