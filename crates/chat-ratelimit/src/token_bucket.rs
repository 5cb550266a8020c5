//! "N operations per interval" limiter with priority queuing
//!
//! Tracks the start time of every call inside a rolling window, so no window of
//! `interval` (plus measured latency) ever contains more than `token_limit`
//! starts. `reserved_tokens` of those slots are only handed to priority calls.

use crate::{LatencyRef, QueueClosed};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueuedJob {
    job: Job,
    priority: bool,
}

#[derive(Default)]
struct TokenBucketState {
    /// Start times of calls inside the current rolling window
    sends: VecDeque<Instant>,
    queue: VecDeque<QueuedJob>,
    timer: Option<JoinHandle<()>>,
}

struct TokenBucketInner {
    token_limit: u32,
    interval: Duration,
    reserved_tokens: u32,
    latency: LatencyRef,
    state: Mutex<TokenBucketState>,
}

/// Shared handle to one token bucket
#[derive(Clone)]
pub struct TokenBucket {
    inner: Arc<TokenBucketInner>,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TokenBucket")
            .field("token_limit", &self.inner.token_limit)
            .field("interval", &self.inner.interval)
            .field("reserved_tokens", &self.inner.reserved_tokens)
            .field("used", &state.sends.len())
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl TokenBucket {
    /// Create a bucket allowing `token_limit` calls per `interval`
    ///
    /// `reserved_tokens` is clamped so at least one slot stays available to
    /// non-priority calls.
    #[must_use]
    pub fn new(token_limit: u32, interval: Duration, reserved_tokens: u32, latency: LatencyRef) -> Self {
        let token_limit = token_limit.max(1);
        Self {
            inner: Arc::new(TokenBucketInner {
                token_limit,
                interval,
                reserved_tokens: reserved_tokens.min(token_limit - 1),
                latency,
                state: Mutex::new(TokenBucketState::default()),
            }),
        }
    }

    #[must_use]
    pub fn token_limit(&self) -> u32 {
        self.inner.token_limit
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Slots still free in the current window
    #[must_use]
    pub fn tokens(&self) -> u32 {
        let mut state = self.inner.state.lock();
        self.prune(&mut state, Instant::now());
        self.inner.token_limit - state.sends.len() as u32
    }

    /// Calls waiting for a slot
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Enqueue `func`; priority calls go ahead of every non-priority call
    ///
    /// Must be called from within a Tokio runtime: when the window is full a
    /// timer task is spawned to resume the queue.
    pub fn queue<F>(&self, func: F, priority: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            let job = QueuedJob {
                job: Box::new(func),
                priority,
            };
            if priority {
                let at = state
                    .queue
                    .iter()
                    .position(|queued| !queued.priority)
                    .unwrap_or(state.queue.len());
                state.queue.insert(at, job);
            } else {
                state.queue.push_back(job);
            }
        }
        self.check();
    }

    /// Wait for a slot
    pub async fn acquire(&self, priority: bool) -> Result<(), QueueClosed> {
        let (tx, rx) = oneshot::channel();
        self.queue(
            move || {
                let _ = tx.send(());
            },
            priority,
        );
        rx.await.map_err(|_| QueueClosed)
    }

    /// Start every queued call the window has room for
    pub fn check(&self) {
        let ready = {
            let mut state = self.inner.state.lock();
            if state.queue.is_empty() {
                return;
            }

            let now = Instant::now();
            self.prune(&mut state, now);

            let mut ready = Vec::new();
            while let Some(front) = state.queue.front() {
                let floor = if front.priority {
                    0
                } else {
                    self.inner.reserved_tokens
                };
                if state.sends.len() as u32 + floor >= self.inner.token_limit {
                    break;
                }
                if let Some(queued) = state.queue.pop_front() {
                    state.sends.push_back(now);
                    ready.push(queued.job);
                }
            }

            // An armed timer already resumes the queue at the next expiry
            if !state.queue.is_empty() && state.timer.is_none() {
                if let Some(oldest) = state.sends.front().copied() {
                    let deadline = oldest + self.window();
                    let bucket = self.clone();
                    state.timer = Some(tokio::spawn(async move {
                        tokio::time::sleep_until(deadline).await;
                        bucket.inner.state.lock().timer = None;
                        bucket.check();
                    }));
                }
            }

            ready
        };

        for job in ready {
            job();
        }
    }

    fn window(&self) -> Duration {
        self.inner.interval + self.inner.latency.latency()
    }

    fn prune(&self, state: &mut TokenBucketState, now: Instant) {
        let window = self.window();
        while state.sends.front().is_some_and(|sent| *sent + window <= now) {
            state.sends.pop_front();
        }
    }
}
