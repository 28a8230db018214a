//! Core rate limiter implementation.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::bucket::{BucketPolicy, BucketState};
use super::decision::{decide, Outcome};
use crate::config::GatekeeperConfig;
use crate::error::Result;
use crate::storage::{StorageBackend, StorageRegistry};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Per-entity leaky-bucket limiter bounding both concurrency and throughput.
///
/// State lives in a [`StorageBackend`]; the limiter itself holds only the
/// resolved parameters. Each call is a get/compute/set sequence that is not
/// atomic, so concurrent callers for the same entity on a shared backend may
/// lose updates unless the backend or caller serializes them.
pub struct RateLimiter {
    policy: BucketPolicy,
    storage: Arc<dyn StorageBackend>,
    /// Buckets start filling from this instant (ms)
    started: i64,
}

impl RateLimiter {
    /// Create a limiter using the built-in storage backends, starting now.
    pub fn new(config: &GatekeeperConfig) -> Result<Self> {
        Self::with_registry(config, &StorageRegistry::with_builtin(), None)
    }

    /// Create a limiter resolving `storage.type` through `registry`.
    ///
    /// Fails immediately if the storage type is not registered or the bucket
    /// parameters are invalid. `service_start` defaults to the current time.
    pub fn with_registry(
        config: &GatekeeperConfig,
        registry: &StorageRegistry,
        service_start: Option<i64>,
    ) -> Result<Self> {
        config.validate()?;
        let storage = registry.create(&config.storage.kind, &config.storage.options)?;
        Self::build(config, storage, service_start)
    }

    /// Create a limiter over an already constructed backend.
    pub fn with_backend(
        config: &GatekeeperConfig,
        storage: Arc<dyn StorageBackend>,
        service_start: Option<i64>,
    ) -> Result<Self> {
        config.validate()?;
        Self::build(config, storage, service_start)
    }

    fn build(
        config: &GatekeeperConfig,
        storage: Arc<dyn StorageBackend>,
        service_start: Option<i64>,
    ) -> Result<Self> {
        let policy = BucketPolicy::from_config(config);
        let started = service_start.unwrap_or_else(now_millis);

        debug!(
            size = policy.size,
            refresh_rate = policy.refresh_rate,
            interval_ms = policy.interval.width_ms(),
            wait_for_token_ms = policy.wait_for_token_ms,
            started = started,
            "Rate limiter initialized"
        );

        Ok(Self {
            policy,
            storage,
            started,
        })
    }

    /// The resolved bucket parameters.
    pub fn policy(&self) -> &BucketPolicy {
        &self.policy
    }

    /// Time (ms) buckets start filling from.
    pub fn service_start(&self) -> i64 {
        self.started
    }

    /// How long (ms) the caller must wait before running an operation for
    /// `entity_id`, using the current wall-clock time.
    pub async fn compute_delay(&self, entity_id: &str) -> Result<u64> {
        self.compute_delay_at(entity_id, now_millis()).await
    }

    /// How long (ms) the caller must wait before running an operation for
    /// `entity_id` at time `now`.
    ///
    /// A result of 0 means a concurrency slot was taken and must be given back
    /// with [`release_token`](Self::release_token). A positive result means
    /// no slot was taken and the caller should not retry sooner.
    ///
    /// `now` must not decrease between calls for the same entity.
    pub async fn compute_delay_at(&self, entity_id: &str, now: i64) -> Result<u64> {
        let state = match self.storage.get(entity_id).await? {
            Some(state) => {
                if now < state.ops_last {
                    warn!(
                        entity = %entity_id,
                        now = now,
                        ops_last = state.ops_last,
                        "Timestamp went backwards, decision is best-effort"
                    );
                }
                state
            }
            None => {
                debug!(entity = %entity_id, "Creating new bucket");
                BucketState::initial(&self.policy, self.started)
            }
        };

        let decision = decide(&self.policy, state, now);

        trace!(
            entity = %entity_id,
            now = now,
            outcome = ?decision.outcome,
            delay_ms = decision.delay_ms,
            ops_tokens = decision.state.ops_tokens,
            wait_capacity = decision.state.wait_capacity,
            "Computed delay"
        );

        if decision.outcome == Outcome::AwaitingSlot {
            debug!(
                entity = %entity_id,
                delay_ms = decision.delay_ms,
                "No free slot"
            );
        }

        self.storage.set(entity_id, decision.state).await?;
        Ok(decision.delay_ms)
    }

    /// Give back a slot obtained from a zero-delay decision.
    ///
    /// Unknown entities are ignored.
    pub async fn release_token(&self, entity_id: &str) -> Result<()> {
        let Some(mut state) = self.storage.get(entity_id).await? else {
            trace!(entity = %entity_id, "Release for unknown bucket ignored");
            return Ok(());
        };

        state.ops_tokens += 1;
        trace!(
            entity = %entity_id,
            ops_tokens = state.ops_tokens,
            "Token released"
        );
        self.storage.set(entity_id, state).await?;
        Ok(())
    }

    /// Stored state for `entity_id`, if it has been seen.
    pub async fn bucket_state(&self, entity_id: &str) -> Result<Option<BucketState>> {
        Ok(self.storage.get(entity_id).await?)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .field("started", &self.started)
            .finish()
    }
}
