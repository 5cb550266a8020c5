//! Test fixtures
//!
//! Configurations with short timers and the gateway frames the tests send.

use std::time::Duration;

use anyhow::Result;
use chat_common::{GatewayConfig, RestConfig};
use chat_gateway::protocol::GatewayMessage;
use chat_gateway::{CoordinatorOptions, ShardCoordinator};
use chat_rest::RequestDispatcher;
use serde_json::{json, Value};

pub const TOKEN: &str = "test-token";

/// REST configuration pointing at a mock server
pub fn rest_config(base_url: &str) -> RestConfig {
    RestConfig {
        base_url: base_url.to_string(),
        request_timeout: Duration::from_secs(5),
        ..RestConfig::default()
    }
}

pub fn dispatcher(base_url: &str) -> Result<RequestDispatcher> {
    Ok(RequestDispatcher::new(
        rest_config(base_url),
        Some(format!("Bot {TOKEN}")),
    )?)
}

/// Gateway configuration with fast reconnects
pub fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        connection_timeout: Duration::from_secs(5),
        guild_create_timeout: Duration::from_millis(200),
        reconnect_delay: Duration::from_millis(50),
        max_reconnect_delay: Duration::from_millis(100),
        ..GatewayConfig::default()
    }
}

/// A single-shard coordinator against `url`
pub fn coordinator(url: &str, config: GatewayConfig) -> Result<ShardCoordinator> {
    let options = CoordinatorOptions::new(url, TOKEN, 1, config)
        .with_identify_interval(Duration::from_millis(50));
    Ok(ShardCoordinator::new(options)?)
}

pub fn ready(session_id: &str, sequence: u64, guilds: Value) -> GatewayMessage {
    GatewayMessage::dispatch(
        "READY",
        sequence,
        json!({
            "v": 10,
            "session_id": session_id,
            "guilds": guilds,
            "user": {"id": "1", "username": "bot"},
            "shard": [0, 1],
        }),
    )
}

pub fn message_create(sequence: u64) -> GatewayMessage {
    GatewayMessage::dispatch(
        "MESSAGE_CREATE",
        sequence,
        json!({"id": "2", "channel_id": "3", "content": "hi"}),
    )
}
