//! Rate-limit response headers

use reqwest::header::HeaderMap;
use std::time::Duration;

pub const LIMIT: &str = "x-ratelimit-limit";
pub const REMAINING: &str = "x-ratelimit-remaining";
pub const RESET: &str = "x-ratelimit-reset";
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const RETRY_AFTER: &str = "retry-after";
pub const GLOBAL: &str = "x-ratelimit-global";
pub const BUCKET: &str = "x-ratelimit-bucket";
pub const SCOPE: &str = "x-ratelimit-scope";
pub const DATE: &str = "date";

/// Rate-limit information carried by one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    /// Raw remaining header; `None` when absent
    pub remaining: Option<String>,
    /// Unix time (seconds, fractional) at which the bucket resets
    pub reset: Option<f64>,
    /// Seconds until reset (`x-ratelimit-reset-after`, else `retry-after`)
    pub retry_after: Option<f64>,
    pub global: bool,
    pub bucket: Option<String>,
    pub scope: Option<String>,
    /// Server clock in Unix milliseconds
    pub date_ms: Option<i64>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim)
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            limit: header(headers, LIMIT).and_then(|v| v.parse().ok()),
            remaining: header(headers, REMAINING).map(str::to_string),
            reset: header(headers, RESET).and_then(|v| v.parse().ok()),
            retry_after: header(headers, RESET_AFTER)
                .or_else(|| header(headers, RETRY_AFTER))
                .and_then(|v| v.parse().ok())
                .filter(|secs: &f64| *secs >= 0.0),
            global: headers.contains_key(GLOBAL),
            bucket: header(headers, BUCKET).map(str::to_string),
            scope: header(headers, SCOPE).map(str::to_string),
            date_ms: header(headers, DATE)
                .and_then(|v| chrono::DateTime::parse_from_rfc2822(v).ok())
                .map(|date| date.timestamp_millis()),
        }
    }

    /// Remaining calls in the current window
    ///
    /// A missing header means the route is not limited, so one call stays
    /// available; an unreadable value counts as exhausted.
    pub fn remaining(&self) -> u32 {
        match &self.remaining {
            None => 1,
            Some(raw) => raw.parse::<f64>().map_or(0, |n| n.max(0.0) as u32),
        }
    }

    pub fn retry_after_duration(&self) -> Option<Duration> {
        self.retry_after.map(Duration::from_secs_f64)
    }

    /// Whether the 429 was for a resource shared with other clients
    pub fn is_shared(&self) -> bool {
        self.scope.as_deref() == Some("shared")
    }
}
