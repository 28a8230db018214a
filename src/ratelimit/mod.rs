//! Rate limiting logic and state management.

mod bucket;
mod decision;
mod interval;
mod limiter;

pub use bucket::{BucketPolicy, BucketState};
pub use decision::{decide, Decision, Outcome};
pub use interval::RefreshInterval;
pub use limiter::{now_millis, RateLimiter};
