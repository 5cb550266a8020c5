//! Rate limiter errors

use thiserror::Error;

/// A queued call was dropped before it was granted a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limiter queue closed before the call was scheduled")]
pub struct QueueClosed;
