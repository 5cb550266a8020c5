//! Client configuration structs
//!
//! Loads configuration from environment variables (and an optional `.env` file).

use chat_core::Intents;
use std::env;
use std::fmt;
use std::time::Duration;

/// Main client configuration
#[derive(Clone)]
pub struct ClientConfig {
    /// Bot token, sent as `Authorization: Bot <token>`
    pub token: String,
    pub rest: RestConfig,
    pub gateway: GatewayConfig,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("token", &"<redacted>")
            .field("rest", &self.rest)
            .field("gateway", &self.gateway)
            .finish()
    }
}

/// REST request layer configuration
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Versioned API base URL, e.g. `https://discord.com/api/v10`
    pub base_url: String,
    /// Per-request timeout; an elapsed timeout counts as a network failure
    pub request_timeout: Duration,
    /// Initial latency assumed before any round trip is measured
    pub ratelimiter_offset: Duration,
    /// Clock-offset level above which a warning is emitted
    pub latency_threshold: Duration,
    pub disable_latency_compensation: bool,
    /// Retry ceiling for 5xx and network failures
    pub max_retries: u32,
    /// Retry ceiling for 429 responses
    pub max_ratelimit_retries: u32,
    /// Minimum spacing between two calls of one route (bypassed by `short` calls)
    pub bucket_spacing: Duration,
    /// Requests allowed across every route per `global_interval`
    pub global_limit: u32,
    pub global_interval: Duration,
    pub user_agent: String,
    /// Extra headers sent with every request
    pub headers: Vec<(String, String)>,
}

/// Automatic or fixed value for shard counts and identify concurrency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShardSetting {
    /// Resolved through the gateway bootstrap endpoint
    #[default]
    Auto,
    Fixed(u32),
}

impl ShardSetting {
    fn parse(var: &'static str, value: &str) -> Result<Self, ConfigError> {
        if value.trim().eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        value
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .map(Self::Fixed)
            .ok_or_else(|| ConfigError::InvalidValue(var, value.to_string()))
    }

    /// Fixed value, or `fallback` when automatic
    #[must_use]
    pub fn resolve(self, fallback: u32) -> u32 {
        match self {
            Self::Auto => fallback,
            Self::Fixed(n) => n,
        }
    }
}

/// Connection properties reported in the Identify payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: env::consts::OS.to_string(),
            browser: default_library_name(),
            device: default_library_name(),
        }
    }
}

/// Gateway (event stream) configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway URL; resolved through REST when absent
    pub url: Option<String>,
    pub shards: ShardSetting,
    pub first_shard: u32,
    /// Last shard ID managed by this process (defaults to `shards - 1`)
    pub last_shard: Option<u32>,
    pub max_concurrency: ShardSetting,
    pub intents: Intents,
    /// Request zlib-stream transport compression
    pub compress: bool,
    /// Time allowed between opening the socket and receiving HELLO
    pub connection_timeout: Duration,
    /// Time to wait for unavailable guilds after READY
    pub guild_create_timeout: Duration,
    pub large_threshold: u32,
    pub autoreconnect: bool,
    /// Connect attempts before giving up; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
    /// Connect attempts with a session before the session is dropped
    pub max_resume_attempts: u32,
    /// How long after a disconnect a session is still worth resuming
    pub resume_window: Duration,
    /// Initial reconnect backoff
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub properties: ConnectionProperties,
}

impl GatewayConfig {
    /// Check shard range consistency
    ///
    /// # Errors
    /// Returns an error if the shard range is empty or exceeds a fixed shard count
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(last) = self.last_shard {
            if last < self.first_shard {
                return Err(ConfigError::InvalidValue(
                    "CHAT_LAST_SHARD",
                    format!("{last} is below first shard {}", self.first_shard),
                ));
            }
            if let ShardSetting::Fixed(total) = self.shards {
                if last >= total {
                    return Err(ConfigError::InvalidValue(
                        "CHAT_LAST_SHARD",
                        format!("{last} is outside shard count {total}"),
                    ));
                }
            }
        }
        if let ShardSetting::Fixed(total) = self.shards {
            if self.first_shard >= total {
                return Err(ConfigError::InvalidValue(
                    "CHAT_FIRST_SHARD",
                    format!("{} is outside shard count {total}", self.first_shard),
                ));
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_library_name() -> String {
    "chat-client".to_string()
}

fn default_base_url() -> String {
    format!("https://discord.com/api/v{}", chat_core::REST_VERSION)
}

fn default_user_agent() -> String {
    format!(
        "DiscordBot (https://github.com/chat-client/chat-client, {})",
        env!("CARGO_PKG_VERSION")
    )
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_latency_threshold() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_ratelimit_retries() -> u32 {
    20
}

fn default_global_limit() -> u32 {
    50
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_guild_create_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_large_threshold() -> u32 {
    250
}

fn default_max_resume_attempts() -> u32 {
    10
}

fn default_resume_window() -> Duration {
    Duration::from_secs(120) // 2 minutes
}

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_reconnect_delay() -> Duration {
    Duration::from_secs(30)
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            ratelimiter_offset: Duration::ZERO,
            latency_threshold: default_latency_threshold(),
            disable_latency_compensation: false,
            max_retries: default_max_retries(),
            max_ratelimit_retries: default_max_ratelimit_retries(),
            bucket_spacing: Duration::ZERO,
            global_limit: default_global_limit(),
            global_interval: Duration::from_secs(1),
            user_agent: default_user_agent(),
            headers: Vec::new(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            shards: ShardSetting::Auto,
            first_shard: 0,
            last_shard: None,
            max_concurrency: ShardSetting::Auto,
            intents: Intents::default(),
            compress: false,
            connection_timeout: default_connection_timeout(),
            guild_create_timeout: default_guild_create_timeout(),
            large_threshold: default_large_threshold(),
            autoreconnect: true,
            max_reconnect_attempts: None,
            max_resume_attempts: default_max_resume_attempts(),
            resume_window: default_resume_window(),
            reconnect_delay: default_reconnect_delay(),
            max_reconnect_delay: default_max_reconnect_delay(),
            properties: ConnectionProperties::default(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            rest: RestConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let token = env::var("CHAT_TOKEN").map_err(|_| ConfigError::MissingVar("CHAT_TOKEN"))?;

        let rest = RestConfig {
            base_url: env::var("CHAT_REST_BASE_URL").unwrap_or_else(|_| default_base_url()),
            request_timeout: millis_var("CHAT_REST_TIMEOUT_MS")?
                .unwrap_or_else(default_request_timeout),
            ratelimiter_offset: millis_var("CHAT_RATELIMITER_OFFSET_MS")?.unwrap_or_default(),
            latency_threshold: millis_var("CHAT_LATENCY_THRESHOLD_MS")?
                .unwrap_or_else(default_latency_threshold),
            disable_latency_compensation: parsed_var("CHAT_DISABLE_LATENCY_COMPENSATION")?
                .unwrap_or(false),
            max_retries: parsed_var("CHAT_MAX_RETRIES")?.unwrap_or_else(default_max_retries),
            max_ratelimit_retries: parsed_var("CHAT_MAX_RATELIMIT_RETRIES")?
                .unwrap_or_else(default_max_ratelimit_retries),
            bucket_spacing: millis_var("CHAT_BUCKET_SPACING_MS")?.unwrap_or_default(),
            global_limit: parsed_var("CHAT_GLOBAL_LIMIT")?.unwrap_or_else(default_global_limit),
            global_interval: millis_var("CHAT_GLOBAL_INTERVAL_MS")?
                .unwrap_or(Duration::from_secs(1)),
            user_agent: env::var("CHAT_USER_AGENT").unwrap_or_else(|_| default_user_agent()),
            headers: Vec::new(),
        };

        let gateway = GatewayConfig {
            url: env::var("CHAT_GATEWAY_URL").ok(),
            shards: env::var("CHAT_SHARDS")
                .ok()
                .map(|v| ShardSetting::parse("CHAT_SHARDS", &v))
                .transpose()?
                .unwrap_or_default(),
            first_shard: parsed_var("CHAT_FIRST_SHARD")?.unwrap_or(0),
            last_shard: parsed_var("CHAT_LAST_SHARD")?,
            max_concurrency: env::var("CHAT_MAX_CONCURRENCY")
                .ok()
                .map(|v| ShardSetting::parse("CHAT_MAX_CONCURRENCY", &v))
                .transpose()?
                .unwrap_or_default(),
            intents: env::var("CHAT_INTENTS")
                .ok()
                .map(|v| {
                    Intents::parse(&v).map_err(|e| ConfigError::InvalidValue("CHAT_INTENTS", e.to_string()))
                })
                .transpose()?
                .unwrap_or_default(),
            compress: parsed_var("CHAT_COMPRESS")?.unwrap_or(false),
            connection_timeout: millis_var("CHAT_CONNECTION_TIMEOUT_MS")?
                .unwrap_or_else(default_connection_timeout),
            guild_create_timeout: millis_var("CHAT_GUILD_CREATE_TIMEOUT_MS")?
                .unwrap_or_else(default_guild_create_timeout),
            large_threshold: parsed_var("CHAT_LARGE_THRESHOLD")?
                .unwrap_or_else(default_large_threshold),
            autoreconnect: parsed_var("CHAT_AUTORECONNECT")?.unwrap_or(true),
            max_reconnect_attempts: parsed_var("CHAT_MAX_RECONNECT_ATTEMPTS")?,
            max_resume_attempts: parsed_var("CHAT_MAX_RESUME_ATTEMPTS")?
                .unwrap_or_else(default_max_resume_attempts),
            resume_window: millis_var("CHAT_RESUME_WINDOW_MS")?
                .unwrap_or_else(default_resume_window),
            reconnect_delay: millis_var("CHAT_RECONNECT_DELAY_MS")?
                .unwrap_or_else(default_reconnect_delay),
            max_reconnect_delay: millis_var("CHAT_MAX_RECONNECT_DELAY_MS")?
                .unwrap_or_else(default_max_reconnect_delay),
            properties: ConnectionProperties::default(),
        };
        gateway.validate()?;

        Ok(Self {
            token,
            rest,
            gateway,
        })
    }

    /// The `Authorization` header value for this token
    #[must_use]
    pub fn authorization(&self) -> String {
        if self.token.starts_with("Bot ") || self.token.starts_with("Bearer ") {
            self.token.clone()
        } else {
            format!("Bot {}", self.token)
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, value)),
        Err(_) => Ok(None),
    }
}

fn millis_var(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(parsed_var::<u64>(name)?.map(Duration::from_millis))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_setting_parse() {
        assert_eq!(ShardSetting::parse("X", "auto").unwrap(), ShardSetting::Auto);
        assert_eq!(ShardSetting::parse("X", " AUTO ").unwrap(), ShardSetting::Auto);
        assert_eq!(ShardSetting::parse("X", "4").unwrap(), ShardSetting::Fixed(4));
        assert!(ShardSetting::parse("X", "0").is_err());
        assert!(ShardSetting::parse("X", "many").is_err());
    }

    #[test]
    fn test_shard_setting_resolve() {
        assert_eq!(ShardSetting::Auto.resolve(3), 3);
        assert_eq!(ShardSetting::Fixed(8).resolve(3), 8);
    }

    #[test]
    fn test_authorization_prefix() {
        assert_eq!(ClientConfig::new("abc").authorization(), "Bot abc");
        assert_eq!(ClientConfig::new("Bot abc").authorization(), "Bot abc");
        assert_eq!(ClientConfig::new("Bearer xyz").authorization(), "Bearer xyz");
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", ClientConfig::new("super-secret"));
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_validate_shard_range() {
        let mut config = GatewayConfig::default();
        assert!(config.validate().is_ok());

        config.shards = ShardSetting::Fixed(4);
        config.first_shard = 2;
        config.last_shard = Some(3);
        assert!(config.validate().is_ok());

        config.last_shard = Some(4);
        assert!(config.validate().is_err());

        config.last_shard = Some(1);
        assert!(config.validate().is_err());

        config.last_shard = None;
        config.first_shard = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_values() {
        let rest = RestConfig::default();
        assert_eq!(rest.base_url, "https://discord.com/api/v10");
        assert_eq!(rest.request_timeout, Duration::from_secs(15));
        assert_eq!(rest.max_retries, 3);
        assert_eq!(rest.bucket_spacing, Duration::ZERO);
        assert_eq!(rest.global_limit, 50);
        assert_eq!(rest.global_interval, Duration::from_secs(1));

        let gateway = GatewayConfig::default();
        assert_eq!(gateway.shards, ShardSetting::Auto);
        assert_eq!(gateway.max_resume_attempts, 10);
        assert_eq!(gateway.resume_window, Duration::from_secs(120));
        assert_eq!(gateway.large_threshold, 250);
        assert!(gateway.autoreconnect);
    }
}
