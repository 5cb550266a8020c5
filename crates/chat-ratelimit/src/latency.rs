//! Rolling latency and clock-offset estimate
//!
//! Both bucket types translate "time until reset" into a local deadline, padded
//! by the measured request latency so a call released at the deadline reaches
//! the server after its window actually reset.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Samples kept in each rolling window
const SAMPLE_WINDOW: usize = 10;

/// Minimum time between two clock-offset samples
const OFFSET_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// HTTP `Date` headers have second precision; assume the midpoint
const DATE_HEADER_PRECISION_MS: i64 = 500;

#[derive(Debug)]
struct LatencyState {
    /// Rolling mean of `raw`
    latency: Duration,
    raw: VecDeque<Duration>,
    /// Rolling mean of `time_offsets`: server clock minus local clock, in ms
    time_offset_ms: i64,
    time_offsets: VecDeque<i64>,
    last_time_offset_check: Option<Instant>,
    compensation: bool,
    threshold: Duration,
}

/// Point-in-time copy of the latency estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySnapshot {
    pub latency: Duration,
    pub time_offset_ms: i64,
    pub samples: usize,
}

/// Shared handle to the rolling latency estimate
#[derive(Debug, Clone)]
pub struct LatencyRef {
    inner: Arc<RwLock<LatencyState>>,
}

impl LatencyRef {
    /// Create an estimate seeded with `initial` latency
    #[must_use]
    pub fn new(initial: Duration) -> Self {
        Self::with_options(initial, true, Duration::from_secs(30))
    }

    /// Create an estimate with explicit compensation and warning threshold
    ///
    /// With compensation disabled the latency stays at `initial` forever.
    #[must_use]
    pub fn with_options(initial: Duration, compensation: bool, threshold: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LatencyState {
                latency: initial,
                raw: std::iter::repeat(initial).take(SAMPLE_WINDOW).collect(),
                time_offset_ms: 0,
                time_offsets: std::iter::repeat(0).take(SAMPLE_WINDOW).collect(),
                last_time_offset_check: None,
                compensation,
                threshold,
            })),
        }
    }

    /// Current latency estimate
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.inner.read().latency
    }

    /// Current server-minus-local clock offset in milliseconds
    #[must_use]
    pub fn time_offset_ms(&self) -> i64 {
        self.inner.read().time_offset_ms
    }

    #[must_use]
    pub fn snapshot(&self) -> LatencySnapshot {
        let state = self.inner.read();
        LatencySnapshot {
            latency: state.latency,
            time_offset_ms: state.time_offset_ms,
            samples: state.raw.len(),
        }
    }

    /// Feed one completed request round trip into the rolling mean
    pub fn record_round_trip(&self, rtt: Duration) {
        let mut state = self.inner.write();
        if !state.compensation {
            return;
        }

        state.raw.push_back(rtt);
        while state.raw.len() > SAMPLE_WINDOW {
            state.raw.pop_front();
        }
        let total: Duration = state.raw.iter().sum();
        state.latency = total / state.raw.len() as u32;
    }

    /// Feed a server `Date` reading (Unix ms) taken at local time `local_ms`
    ///
    /// Samples are rate limited to one per five seconds. Returns the updated
    /// offset when a sample was taken.
    pub fn record_server_time(&self, server_ms: i64, local_ms: i64) -> Option<i64> {
        let mut state = self.inner.write();
        if !state.compensation {
            return None;
        }

        let now = Instant::now();
        if state
            .last_time_offset_check
            .is_some_and(|last| now.duration_since(last) < OFFSET_CHECK_INTERVAL)
        {
            return None;
        }
        state.last_time_offset_check = Some(now);

        let sample = server_ms + DATE_HEADER_PRECISION_MS - local_ms;
        state.time_offsets.push_back(sample);
        while state.time_offsets.len() > SAMPLE_WINDOW {
            state.time_offsets.pop_front();
        }
        state.time_offset_ms =
            state.time_offsets.iter().sum::<i64>() / state.time_offsets.len() as i64;

        let threshold = i64::try_from(state.threshold.as_millis()).unwrap_or(i64::MAX);
        if state.time_offset_ms.abs() > threshold && (sample - state.time_offset_ms).abs() < threshold
        {
            tracing::warn!(
                time_offset_ms = state.time_offset_ms,
                "Local clock differs from the server clock by more than the latency threshold; check the system time"
            );
        }

        Some(state.time_offset_ms)
    }

    /// Convert a server-clock Unix timestamp (ms) into the local clock
    #[must_use]
    pub fn server_to_local_ms(&self, server_ms: i64) -> i64 {
        server_ms - self.time_offset_ms()
    }
}

impl Default for LatencyRef {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}
