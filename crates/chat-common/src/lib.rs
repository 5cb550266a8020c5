//! # chat-common
//!
//! Shared utilities including client configuration and telemetry.

pub mod config;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    ClientConfig, ConfigError, ConnectionProperties, GatewayConfig, RestConfig, ShardSetting,
};
pub use telemetry::{
    try_init_tracing, try_init_tracing_with_config, TracingConfig, TracingError,
};
