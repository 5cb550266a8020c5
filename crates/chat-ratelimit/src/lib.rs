//! # chat-ratelimit
//!
//! Client-side rate limiting primitives shared by the REST and gateway layers.
//!
//! - [`LatencyRef`]: rolling round-trip latency and server clock offset
//! - [`TokenBucket`]: "N operations per interval" limiter with priority queuing
//! - [`SequentialBucket`]: per-route FIFO limiter driven by server-provided hints
//!
//! All limiters are cheap `Clone` handles around shared state. Locks are never
//! held across an `.await`, and queued callbacks always run outside the lock.

mod error;
mod latency;
mod sequential;
mod token_bucket;

pub use error::QueueClosed;
pub use latency::{LatencyRef, LatencySnapshot};
pub use sequential::{BucketPermit, BucketSnapshot, RateLimitUpdate, SequentialBucket};
pub use token_bucket::TokenBucket;
