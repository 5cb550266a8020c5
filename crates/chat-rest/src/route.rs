//! Route-key derivation
//!
//! Requests sharing a route key share one server-side rate limit. Channel,
//! guild and webhook IDs are major parameters and stay in the key; every other
//! ID collapses into a placeholder.

use chat_core::Snowflake;
use reqwest::Method;

/// Segments whose following ID is a major parameter
const MAJOR_PARAMETERS: [&str; 3] = ["channels", "guilds", "webhooks"];

/// Messages older than this are deleted under a separate limit
const OLD_MESSAGE_AGE_MS: i64 = 1000 * 60 * 60 * 24 * 14;

/// Messages younger than this are deleted under a separate limit
const NEW_MESSAGE_AGE_MS: i64 = 1000 * 10;

/// Webhook tokens are at least this long
const WEBHOOK_TOKEN_MIN_LEN: usize = 64;

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn is_resource_name(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_lowercase() || b == b'-')
}

fn is_token(segment: &str) -> bool {
    segment.len() >= WEBHOOK_TOKEN_MIN_LEN
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Normalize a request path into its rate-limit template
///
/// ```
/// use chat_rest::route::template;
///
/// assert_eq!(template("/channels/123/messages/456"), "/channels/123/messages/:id");
/// assert_eq!(template("/users/80351110224678912"), "/users/:id");
/// ```
#[must_use]
pub fn template(path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').collect();
    let mut out: Vec<&str> = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().enumerate() {
        let previous = i.checked_sub(1).map(|p| segments[p]);
        let before_previous = i.checked_sub(2).map(|p| segments[p]);

        let normalized = match (before_previous, previous) {
            (_, Some("reactions")) => ":id",
            (Some("reactions"), Some(_)) => ":userID",
            (Some("webhooks"), Some(id)) if is_id(id) && is_token(segment) => ":token",
            (Some("interactions"), Some(id)) if is_id(id) => ":token",
            (_, Some(resource)) if is_id(segment) && is_resource_name(resource) => {
                if MAJOR_PARAMETERS.contains(&resource) {
                    segment
                } else {
                    ":id"
                }
            }
            _ => segment,
        };
        out.push(normalized);
    }

    out.join("/")
}

/// Derive the bucket key for `method` on `path`
///
/// `now_ms` is the latency-compensated current Unix time used to split message
/// deletion by message age.
#[must_use]
pub fn route_key(method: &Method, path: &str, now_ms: i64) -> String {
    let route = template(path);

    if *method == Method::DELETE && route.ends_with("/messages/:id") {
        let message_id = path
            .split('?')
            .next()
            .and_then(|p| p.rsplit('/').next())
            .and_then(|id| Snowflake::parse(id).ok());

        if let Some(message_id) = message_id {
            let age = message_id.age_millis(now_ms);
            if age >= OLD_MESSAGE_AGE_MS {
                return format!("DELETE_OLD {route}");
            }
            if age <= NEW_MESSAGE_AGE_MS {
                return format!("DELETE_NEW {route}");
            }
        }
    } else if *method == Method::GET && is_guild_channels(&route) {
        return "GET /guilds/:id/channels".to_string();
    }

    format!("{method} {route}")
}

fn is_guild_channels(route: &str) -> bool {
    let mut parts = route.trim_start_matches('/').split('/');
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some("guilds"), Some(id), Some("channels"), None) if is_id(id)
    )
}
