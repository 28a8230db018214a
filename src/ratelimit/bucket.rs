//! Bucket parameters and persisted per-entity state.

use serde::{Deserialize, Serialize};

use super::interval::RefreshInterval;
use crate::config::GatekeeperConfig;

/// Resolved bucket parameters shared by every entity of a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketPolicy {
    /// Concurrency ceiling and throughput cap
    pub size: i64,
    /// Capacity gained per elapsed interval
    pub refresh_rate: i64,
    /// Window used to smooth throughput
    pub interval: RefreshInterval,
    /// How far ahead to look for capacity when no slot is free
    pub wait_for_token_ms: i64,
}

impl BucketPolicy {
    pub fn from_config(config: &GatekeeperConfig) -> Self {
        Self {
            size: i64::from(config.buckets.size),
            refresh_rate: i64::from(config.buckets.refresh_rate),
            interval: RefreshInterval::from_secs(config.buckets.refresh_interval),
            wait_for_token_ms: i64::try_from(config.wait_for_token_ms).unwrap_or(i64::MAX),
        }
    }
}

/// State stored for one entity between calls.
///
/// The bucket tracks two cursors, each a (boundary timestamp, remaining
/// budget) pair: the ops cursor (`ops_last`, `ops_capacity`) for operations
/// admitted now, and the wait cursor (`wait_last`, `wait_capacity`) for
/// operations told to come back later.
///
/// `wait_capacity` is signed on purpose. A negative value counts reservations
/// queued against the wait cursor's interval, not usable throughput. Do not
/// clamp it at zero; doing so reorders queued callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketState {
    /// Free concurrency slots, in `[0, size]` under correct usage
    pub ops_tokens: i64,
    /// Time (ms) the ops cursor last moved to a new interval
    pub ops_last: i64,
    /// Throughput left in the ops cursor's interval
    pub ops_capacity: i64,
    /// Boundary (ms) reserved by the wait cursor
    pub wait_last: i64,
    /// Throughput left in the wait cursor's interval, or queue depth when negative
    pub wait_capacity: i64,
}

impl BucketState {
    /// State of an entity seen for the first time.
    ///
    /// All slots are free and no throughput has accumulated yet; it starts
    /// filling at the first interval boundary after `service_start`.
    pub fn initial(policy: &BucketPolicy, service_start: i64) -> Self {
        Self {
            ops_tokens: policy.size,
            ops_last: service_start,
            ops_capacity: 0,
            wait_last: service_start.saturating_sub(policy.interval.width_ms()),
            wait_capacity: 0,
        }
    }

    /// Whether a concurrency slot is free.
    pub fn has_slot(&self) -> bool {
        self.ops_tokens > 0
    }
}
