//! Per-route FIFO limiter
//!
//! A [`SequentialBucket`] hands out one [`BucketPermit`] at a time in queue
//! order. `remaining` is decremented optimistically when a permit is granted;
//! the holder then overwrites the bucket state with the server's rate-limit
//! headers through [`BucketPermit::update`]. Dropping the permit marks the slot
//! as done and starts the next queued call.

use crate::{LatencyRef, QueueClosed};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Added on top of the reset deadline so the refill is already visible server side
const RESET_PADDING: Duration = Duration::from_millis(1);

type Call = Box<dyn FnOnce(BucketPermit) + Send + 'static>;

struct QueuedCall {
    call: Call,
    short: bool,
}

#[derive(Default)]
enum Processing {
    #[default]
    Idle,
    InFlight,
    /// Timer armed to resume the queue; tagged with the epoch it was armed in
    Waiting(JoinHandle<()>, u64),
}

struct BucketState {
    limit: u32,
    remaining: u32,
    reset_at: Option<Instant>,
    last_start: Option<Instant>,
    queue: VecDeque<QueuedCall>,
    processing: Processing,
    epoch: u64,
}

struct BucketInner {
    latency: LatencyRef,
    spacing: Duration,
    state: Mutex<BucketState>,
}

/// Server-provided rate-limit state for one route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitUpdate {
    /// New limit, when the response carried one
    pub limit: Option<u32>,
    pub remaining: u32,
    /// Local deadline at which `remaining` refills; `None` when unknown
    pub reset_at: Option<Instant>,
}

/// Point-in-time view of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Option<Instant>,
    pub queued: usize,
    pub in_flight: bool,
    pub waiting: bool,
}

/// Shared handle to one route's bucket
#[derive(Clone)]
pub struct SequentialBucket {
    inner: Arc<BucketInner>,
}

impl std::fmt::Debug for SequentialBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialBucket")
            .field("spacing", &self.inner.spacing)
            .field("state", &self.snapshot())
            .finish()
    }
}

impl SequentialBucket {
    /// Create a bucket with an initial `limit`, refined by the first response
    #[must_use]
    pub fn new(limit: u32, latency: LatencyRef) -> Self {
        Self::with_spacing(limit, latency, Duration::ZERO)
    }

    /// Create a bucket that also keeps `spacing` between two non-short calls
    #[must_use]
    pub fn with_spacing(limit: u32, latency: LatencyRef, spacing: Duration) -> Self {
        Self {
            inner: Arc::new(BucketInner {
                latency,
                spacing,
                state: Mutex::new(BucketState {
                    limit,
                    remaining: limit,
                    reset_at: None,
                    last_start: None,
                    queue: VecDeque::new(),
                    processing: Processing::Idle,
                    epoch: 0,
                }),
            }),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> BucketSnapshot {
        let state = self.inner.state.lock();
        BucketSnapshot {
            limit: state.limit,
            remaining: state.remaining,
            reset_at: state.reset_at,
            queued: state.queue.len(),
            in_flight: matches!(state.processing, Processing::InFlight),
            waiting: matches!(state.processing, Processing::Waiting(..)),
        }
    }

    /// Append `call` to the queue
    ///
    /// The call receives the permit for its slot and must drop it once the
    /// request finished, successfully or not. `short` calls skip the spacing
    /// floor.
    pub fn queue<F>(&self, call: F, short: bool)
    where
        F: FnOnce(BucketPermit) + Send + 'static,
    {
        self.inner.state.lock().queue.push_back(QueuedCall {
            call: Box::new(call),
            short,
        });
        self.check(false);
    }

    /// Wait for this bucket's next slot
    pub async fn acquire(&self, short: bool) -> Result<BucketPermit, QueueClosed> {
        let (tx, rx) = oneshot::channel();
        self.queue(
            move |permit| {
                // A cancelled waiter drops the permit, which frees the slot
                let _ = tx.send(permit);
            },
            short,
        );
        rx.await.map_err(|_| QueueClosed)
    }

    /// Re-evaluate whether the head of the queue may start
    ///
    /// Without `force` this is a no-op while a call is in flight or a timer is
    /// armed. Calling it on an idle bucket with an empty queue changes nothing.
    pub fn check(&self, force: bool) {
        let next = {
            let mut state = self.inner.state.lock();

            if state.queue.is_empty() {
                if let Processing::Waiting(..) = state.processing {
                    self.disarm(&mut state);
                }
                return;
            }
            if !force && !matches!(state.processing, Processing::Idle) {
                return;
            }
            if matches!(state.processing, Processing::InFlight) {
                return;
            }
            self.disarm(&mut state);

            let now = Instant::now();
            let compensation = self.inner.latency.latency();

            if state.reset_at.map_or(true, |reset| reset + compensation <= now) {
                state.reset_at = None;
                state.remaining = state.limit;
            }

            if state.remaining == 0 {
                let reset = state.reset_at.unwrap_or(now);
                tracing::trace!(
                    queued = state.queue.len(),
                    wait_ms = (reset + compensation).saturating_duration_since(now).as_millis() as u64,
                    "Bucket exhausted, waiting for reset"
                );
                self.arm(&mut state, reset + compensation + RESET_PADDING);
                return;
            }

            let spaced = state.queue.front().is_some_and(|queued| !queued.short);
            if spaced && !self.inner.spacing.is_zero() {
                if let Some(last) = state.last_start {
                    if last + self.inner.spacing > now {
                        self.arm(&mut state, last + self.inner.spacing);
                        return;
                    }
                }
            }

            let Some(next) = state.queue.pop_front() else {
                return;
            };
            state.remaining -= 1;
            state.processing = Processing::InFlight;
            state.last_start = Some(now);
            next
        };

        (next.call)(BucketPermit {
            bucket: self.clone(),
        });
    }

    fn arm(&self, state: &mut BucketState, deadline: Instant) {
        state.epoch = state.epoch.wrapping_add(1);
        let epoch = state.epoch;
        let bucket = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut state = bucket.inner.state.lock();
                match state.processing {
                    Processing::Waiting(_, armed) if armed == epoch => {
                        state.processing = Processing::Idle;
                    }
                    _ => return,
                }
            }
            bucket.check(true);
        });
        state.processing = Processing::Waiting(handle, epoch);
    }

    fn disarm(&self, state: &mut BucketState) {
        if let Processing::Waiting(handle, _) = std::mem::take(&mut state.processing) {
            handle.abort();
        }
    }

    fn push_front(&self, call: Call) {
        self.inner
            .state
            .lock()
            .queue
            .push_front(QueuedCall { call, short: true });
    }

    fn release(&self) {
        {
            let mut state = self.inner.state.lock();
            if matches!(state.processing, Processing::InFlight) {
                state.processing = Processing::Idle;
            }
        }
        self.check(true);
    }

    fn apply(&self, update: RateLimitUpdate) {
        let mut state = self.inner.state.lock();
        if let Some(limit) = update.limit {
            state.limit = limit;
        }
        state.remaining = update.remaining;
        state.reset_at = update.reset_at;
    }
}

/// The right to run one call on a [`SequentialBucket`]
///
/// Dropping the permit completes the slot.
pub struct BucketPermit {
    bucket: SequentialBucket,
}

impl BucketPermit {
    /// Overwrite the bucket's accounting with server-provided values
    pub fn update(&self, update: RateLimitUpdate) {
        self.bucket.apply(update);
    }

    #[must_use]
    pub fn bucket(&self) -> &SequentialBucket {
        &self.bucket
    }

    /// Give the slot back and wait in front of the queue for a new one
    ///
    /// Used to retry a call after the server corrected the bucket state; the
    /// retry runs as soon as the refreshed state allows, ahead of calls queued
    /// in the meantime.
    pub async fn requeue(self) -> Result<BucketPermit, QueueClosed> {
        let (tx, rx) = oneshot::channel();
        self.bucket.push_front(Box::new(move |permit| {
            let _ = tx.send(permit);
        }));
        drop(self);
        rx.await.map_err(|_| QueueClosed)
    }
}

impl std::fmt::Debug for BucketPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketPermit").finish_non_exhaustive()
    }
}

impl Drop for BucketPermit {
    fn drop(&mut self) {
        self.bucket.release();
    }
}
