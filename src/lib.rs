//! Gatekeeper - Hybrid Token and Time-Window Rate Limiter
//!
//! This crate implements a per-entity admission limiter that bounds both how
//! many operations may be in flight and how many may start per time window.
//! Bucket state lives in a pluggable storage backend so the same logical
//! bucket can be consulted from several processes.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod storage;

pub use config::GatekeeperConfig;
pub use error::{GatekeeperError, Result};
pub use ratelimit::{BucketState, RateLimiter};
pub use storage::{StorageBackend, StorageRegistry};
