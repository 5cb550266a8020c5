//! REST error types

use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The request an error belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescription {
    pub method: Method,
    pub path: String,
    pub route: String,
    /// Attempts made, including the one that failed
    pub attempts: u32,
}

impl fmt::Display for RequestDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Structured error body returned by the platform on 4xx responses
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Option<Value>,
}

/// REST layer errors
#[derive(Debug, Error)]
pub enum RestError {
    /// Platform rejected the request (4xx other than 429)
    #[error("{status} on {request}: {message} (code {code})")]
    Rest {
        status: u16,
        code: u64,
        message: String,
        errors: Option<Value>,
        request: RequestDescription,
    },

    #[error("HTTP {status} on {request}: {body}")]
    Http {
        status: u16,
        body: String,
        request: RequestDescription,
    },

    #[error("Rate limited on {request} after {} attempts, retry after {retry_after:?}", request.attempts)]
    RateLimited {
        retry_after: Duration,
        global: bool,
        request: RequestDescription,
    },

    #[error("Request timed out: {request}")]
    Timeout { request: RequestDescription },

    #[error("Network error on {request}: {source}")]
    Network {
        request: RequestDescription,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode response of {request}: {source}")]
    Decode {
        request: RequestDescription,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid request {request}: {reason}")]
    InvalidRequest {
        request: RequestDescription,
        reason: String,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl RestError {
    /// HTTP status of the failing response, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rest { status, .. } | Self::Http { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Platform error code from a structured 4xx body
    pub fn code(&self) -> Option<u64> {
        match self {
            Self::Rest { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn request(&self) -> Option<&RequestDescription> {
        match self {
            Self::Rest { request, .. }
            | Self::Http { request, .. }
            | Self::RateLimited { request, .. }
            | Self::Timeout { request }
            | Self::Network { request, .. }
            | Self::Decode { request, .. }
            | Self::InvalidRequest { request, .. } => Some(request),
            Self::Client(_) => None,
        }
    }

    /// Whether repeating the same request later could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Network { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RequestDescription {
        RequestDescription {
            method: Method::POST,
            path: "/channels/1/messages".to_string(),
            route: "POST /channels/1/messages".to_string(),
            attempts: 1,
        }
    }

    #[test]
    fn test_rest_error_display() {
        let err = RestError::Rest {
            status: 403,
            code: 50013,
            message: "Missing Permissions".to_string(),
            errors: None,
            request: request(),
        };
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.code(), Some(50013));
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "403 on POST /channels/1/messages: Missing Permissions (code 50013)"
        );
    }

    #[test]
    fn test_retryable() {
        let http = RestError::Http {
            status: 503,
            body: String::new(),
            request: request(),
        };
        assert!(http.is_retryable());
        assert!(RestError::Timeout { request: request() }.is_retryable());
    }

    #[test]
    fn test_api_error_body_parse() {
        let body: ApiErrorBody = serde_json::from_str(
            r#"{"code": 50035, "message": "Invalid Form Body", "errors": {"content": {}}}"#,
        )
        .unwrap();
        assert_eq!(body.code, 50035);
        assert!(body.errors.is_some());
    }
}
