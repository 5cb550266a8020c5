//! Rate-limit aware request dispatcher
//!
//! Every call goes through the [`SequentialBucket`] of its route key and then
//! takes a slot of the process-wide [`TokenBucket`]. The bucket map grows lazily with the API surface used by the process and is
//! never evicted; its size is bounded by the number of distinct routes, not by
//! request volume.

use crate::error::{ApiErrorBody, RequestDescription, RestError};
use crate::global::GlobalBlock;
use crate::headers::RateLimitHeaders;
use crate::request::{self, RequestOptions, AUDIT_LOG_REASON};
use crate::route;
use chat_common::RestConfig;
use chat_ratelimit::{
    BucketPermit, BucketSnapshot, LatencyRef, RateLimitUpdate, SequentialBucket, TokenBucket,
};
use dashmap::DashMap;
use rand::Rng;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Backoff for 5xx and network failures: base doubled per attempt, capped
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

/// Initial limit of a bucket that has not seen a response yet
const INITIAL_BUCKET_LIMIT: u32 = 1;

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

struct DispatcherInner {
    http: reqwest::Client,
    config: RestConfig,
    authorization: Option<String>,
    latency: LatencyRef,
    buckets: DashMap<String, SequentialBucket>,
    /// Shared by every route
    limiter: TokenBucket,
    global: GlobalBlock,
}

/// Turns logical API calls into rate-limit compliant HTTP exchanges
#[derive(Clone)]
pub struct RequestDispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("base_url", &self.inner.config.base_url)
            .field("buckets", &self.inner.buckets.len())
            .finish_non_exhaustive()
    }
}

impl RequestDispatcher {
    /// Create a dispatcher; `authorization` is the full `Authorization` header value
    pub fn new(config: RestConfig, authorization: Option<String>) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(RestError::Client)?;

        let latency = LatencyRef::with_options(
            config.ratelimiter_offset,
            !config.disable_latency_compensation,
            config.latency_threshold,
        );

        let limiter = TokenBucket::new(config.global_limit, config.global_interval, 0, latency.clone());

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                http,
                config,
                authorization,
                latency,
                buckets: DashMap::new(),
                limiter,
                global: GlobalBlock::default(),
            }),
        })
    }

    pub fn latency(&self) -> &LatencyRef {
        &self.inner.latency
    }

    pub fn config(&self) -> &RestConfig {
        &self.inner.config
    }

    /// Whether a platform-wide rate limit is currently in effect
    pub fn is_globally_blocked(&self) -> bool {
        self.inner.global.is_blocked()
    }

    /// Process-wide limiter every request attempt passes through
    pub fn limiter(&self) -> &TokenBucket {
        &self.inner.limiter
    }

    /// Route key used for `method` on `path`
    pub fn route_key(&self, method: &Method, path: &str) -> String {
        let latency_ms = self.inner.latency.latency().as_millis() as i64;
        route::route_key(method, path, chrono::Utc::now().timestamp_millis() - latency_ms)
    }

    /// State of the bucket behind `route`, if it was used before
    pub fn bucket_snapshot(&self, route: &str) -> Option<BucketSnapshot> {
        self.inner.buckets.get(route).map(|bucket| bucket.snapshot())
    }

    fn bucket(&self, route: &str) -> SequentialBucket {
        self.inner
            .buckets
            .entry(route.to_string())
            .or_insert_with(|| {
                SequentialBucket::with_spacing(
                    INITIAL_BUCKET_LIMIT,
                    self.inner.latency.clone(),
                    self.inner.config.bucket_spacing,
                )
            })
            .clone()
    }

    /// Perform a request and deserialize the response body into `T`
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, RestError> {
        let route = options
            .route
            .clone()
            .unwrap_or_else(|| self.route_key(&method, path));
        let description = RequestDescription {
            method: method.clone(),
            path: path.to_string(),
            route,
            attempts: 0,
        };
        let value = self.request(method, path, options).await?;
        serde_json::from_value(value).map_err(|source| RestError::Decode {
            request: description,
            source,
        })
    }

    /// Perform a request through its route bucket, retrying per policy
    ///
    /// Resolves with the parsed JSON body, `Value::Null` for empty responses,
    /// or the raw text when the body is not JSON.
    #[tracing::instrument(skip(self, options), fields(route))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Value, RestError> {
        let route = options
            .route
            .clone()
            .unwrap_or_else(|| self.route_key(&method, path));
        tracing::Span::current().record("route", route.as_str());

        let mut request = RequestDescription {
            method: method.clone(),
            path: path.to_string(),
            route: route.clone(),
            attempts: 0,
        };
        let bucket = self.bucket(&route);
        let mut permit = bucket
            .acquire(options.short)
            .await
            .map_err(|_| invalid(&request, "bucket queue closed"))?;
        let mut ratelimit_retries = 0u32;

        loop {
            if options.auth {
                self.inner.global.wait().await;
            }
            self.inner
                .limiter
                .acquire(false)
                .await
                .map_err(|_| invalid(&request, "global queue closed"))?;
            request.attempts += 1;

            let builder = self.build(&method, path, &options, &request)?;
            let started = Instant::now();
            let response = match builder.send().await {
                Ok(response) => response,
                Err(err) => {
                    if request.attempts > self.inner.config.max_retries {
                        return Err(if err.is_timeout() {
                            RestError::Timeout { request }
                        } else {
                            RestError::Network {
                                request,
                                source: err,
                            }
                        });
                    }
                    let delay = backoff(request.attempts);
                    tracing::warn!(
                        error = %err,
                        attempt = request.attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    permit = requeue(permit, &request).await?;
                    continue;
                }
            };
            self.inner.latency.record_round_trip(started.elapsed());

            let headers = RateLimitHeaders::from_headers(response.headers());
            if let Some(date_ms) = headers.date_ms {
                self.inner
                    .latency
                    .record_server_time(date_ms, chrono::Utc::now().timestamp_millis());
            }
            self.apply_headers(&permit, &headers, &method, &route);

            let status = response.status();
            tracing::debug!(
                status = status.as_u16(),
                remaining = headers.remaining(),
                attempt = request.attempts,
                "Response received"
            );

            if status.is_success() || status.is_redirection() {
                drop(permit);
                return read_body(response, &request).await;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let body = read_text(response, &request).await?;
                let parsed: Option<RateLimitBody> = serde_json::from_str(&body).ok();
                let global = headers.global || parsed.as_ref().is_some_and(|b| b.global);

                let body_retry_after = parsed
                    .and_then(|b| b.retry_after)
                    .filter(|secs| *secs >= 0.0)
                    .map(Duration::from_secs_f64);
                let delay = if headers.is_shared() {
                    body_retry_after.or_else(|| headers.retry_after_duration())
                } else {
                    headers.retry_after_duration().or(body_retry_after)
                }
                .unwrap_or(Duration::from_secs(1));

                ratelimit_retries += 1;
                if ratelimit_retries > self.inner.config.max_ratelimit_retries {
                    return Err(RestError::RateLimited {
                        retry_after: delay,
                        global,
                        request,
                    });
                }

                if global {
                    self.inner.global.block(delay);
                }
                tracing::warn!(
                    global,
                    scope = headers.scope.as_deref().unwrap_or("user"),
                    retry_after_ms = delay.as_millis() as u64,
                    "Rate limited, retrying"
                );
                tokio::time::sleep(delay).await;
                permit = requeue(permit, &request).await?;
                continue;
            }

            if status == StatusCode::BAD_GATEWAY && request.attempts <= self.inner.config.max_retries {
                let delay = Duration::from_millis(rand::thread_rng().gen_range(100..=2000));
                tracing::warn!(
                    attempt = request.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Bad gateway, retrying"
                );
                tokio::time::sleep(delay).await;
                permit = requeue(permit, &request).await?;
                continue;
            }

            if status.is_server_error() && request.attempts <= self.inner.config.max_retries {
                let delay = backoff(request.attempts);
                tracing::warn!(
                    status = status.as_u16(),
                    attempt = request.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying"
                );
                tokio::time::sleep(delay).await;
                permit = requeue(permit, &request).await?;
                continue;
            }

            drop(permit);
            let body = read_text(response, &request).await?;
            return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(api) if status.is_client_error() => RestError::Rest {
                    status: status.as_u16(),
                    code: api.code,
                    message: api.message,
                    errors: api.errors,
                    request,
                },
                _ => RestError::Http {
                    status: status.as_u16(),
                    body,
                    request,
                },
            });
        }
    }

    pub async fn get(&self, path: &str) -> Result<Value, RestError> {
        self.request(Method::GET, path, RequestOptions::default()).await
    }

    fn build(
        &self,
        method: &Method,
        path: &str,
        options: &RequestOptions,
        request: &RequestDescription,
    ) -> Result<RequestBuilder, RestError> {
        let url = format!("{}{}", self.inner.config.base_url.trim_end_matches('/'), path);
        let mut builder = self.inner.http.request(method.clone(), url);

        if options.auth {
            let authorization = self
                .inner
                .authorization
                .as_deref()
                .ok_or_else(|| invalid(request, "no token configured for an authenticated request"))?;
            builder = builder.header(AUTHORIZATION, authorization);
        }
        for (name, value) in &self.inner.config.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(reason) = &options.reason {
            builder = builder.header(AUDIT_LOG_REASON, request::encode_reason(reason));
        }

        if *method == Method::GET {
            if let Some(body) = &options.body {
                builder = builder.query(&request::query_pairs(body));
            }
        } else if !options.files.is_empty() {
            let form = request::multipart_form(options.body.as_ref(), &options.files)
                .map_err(|reason| invalid(request, &reason))?;
            builder = builder.multipart(form);
        } else if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        Ok(builder)
    }

    fn apply_headers(&self, permit: &BucketPermit, headers: &RateLimitHeaders, method: &Method, route: &str) {
        if *method != Method::GET && (headers.limit.is_none() || headers.remaining.is_none()) {
            tracing::debug!(route, "Missing rate limit headers");
        }

        let now = Instant::now();
        let reset_at = match headers.retry_after_duration() {
            Some(_) if headers.global => None,
            Some(after) => Some(now + after.max(Duration::from_millis(1))),
            None => headers.reset.map(|reset| {
                let reset_ms = (reset * 1000.0) as i64;
                let reactions_quirk = route.ends_with("/reactions/:id")
                    && headers.date_ms.is_some_and(|date| reset_ms - date == 1000);
                if reactions_quirk {
                    return now + Duration::from_millis(250);
                }
                let local_reset_ms = self.inner.latency.server_to_local_ms(reset_ms);
                let wait_ms = local_reset_ms - chrono::Utc::now().timestamp_millis();
                now + Duration::from_millis(wait_ms.max(0) as u64)
            }),
        };

        permit.update(RateLimitUpdate {
            limit: headers.limit,
            remaining: headers.remaining(),
            reset_at,
        });
    }
}

fn invalid(request: &RequestDescription, reason: &str) -> RestError {
    RestError::InvalidRequest {
        request: request.clone(),
        reason: reason.to_string(),
    }
}

async fn requeue(permit: BucketPermit, request: &RequestDescription) -> Result<BucketPermit, RestError> {
    permit
        .requeue()
        .await
        .map_err(|_| invalid(request, "bucket queue closed"))
}

fn backoff(attempt: u32) -> Duration {
    let exp = RETRY_BASE_DELAY.saturating_mul(1 << attempt.saturating_sub(1).min(8));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
    exp.min(RETRY_MAX_DELAY) + jitter
}

async fn read_text(response: Response, request: &RequestDescription) -> Result<String, RestError> {
    response.text().await.map_err(|source| RestError::Network {
        request: request.clone(),
        source,
    })
}

async fn read_body(response: Response, request: &RequestDescription) -> Result<Value, RestError> {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    let status = response.status();
    let text = read_text(response, request).await?;

    if status == StatusCode::NO_CONTENT || text.is_empty() {
        return Ok(Value::Null);
    }
    match serde_json::from_str(&text) {
        Ok(value) => Ok(value),
        Err(source) if is_json => Err(RestError::Decode {
            request: request.clone(),
            source,
        }),
        Err(_) => Ok(Value::String(text)),
    }
}
