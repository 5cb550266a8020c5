//! # chat-rest
//!
//! REST request layer for the chat platform API.
//!
//! [`RequestDispatcher::request`] is the single entry point every typed API
//! call goes through. It derives the route key, waits for the route's
//! [`SequentialBucket`](chat_ratelimit::SequentialBucket), sends the request and
//! absorbs 429, 502 and other transient failures according to [`RestConfig`](chat_common::RestConfig).

mod dispatcher;
mod error;
mod global;
pub mod headers;
pub mod request;
pub mod route;

pub use dispatcher::RequestDispatcher;
pub use error::{ApiErrorBody, RequestDescription, RestError};
pub use headers::RateLimitHeaders;
pub use request::{FileContent, RequestOptions};

pub use reqwest::Method;
