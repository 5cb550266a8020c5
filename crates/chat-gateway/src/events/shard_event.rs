//! Events emitted by shards
//!
//! A closed set of variants delivered through a `tokio::sync::broadcast`
//! channel: every subscriber sees every event, in emission order.

use super::GatewayEventType;
use serde_json::Value;
use std::time::Duration;

/// A decoded dispatch frame
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    /// Raw event name from the `t` field
    pub name: String,
    /// Typed event name; `None` for events this client does not know yet
    pub kind: Option<GatewayEventType>,
    pub sequence: Option<u64>,
    pub data: Value,
}

impl DispatchEvent {
    pub fn new(name: impl Into<String>, sequence: Option<u64>, data: Value) -> Self {
        let name = name.into();
        Self {
            kind: GatewayEventType::from_str(&name),
            name,
            sequence,
            data,
        }
    }

    #[must_use]
    pub fn is(&self, kind: GatewayEventType) -> bool {
        self.kind == Some(kind)
    }
}

/// Lifecycle and dispatch events of one shard
#[derive(Debug, Clone)]
pub enum Event {
    /// Socket opened, waiting for HELLO
    Connect,
    Hello { heartbeat_interval: Duration },
    /// READY received; unavailable guilds are still arriving
    PreReady { session_id: String },
    /// All guilds arrived (or the wait timed out)
    Ready,
    Resumed,
    /// Socket closed; `reconnect` tells whether the shard will come back
    Disconnect {
        code: Option<u16>,
        reason: String,
        reconnect: bool,
    },
    Dispatch(DispatchEvent),
    Warn(String),
    Error(String),
    Debug(String),
}

/// An [`Event`] tagged with the shard it came from
#[derive(Debug, Clone)]
pub struct ShardEvent {
    pub shard_id: u32,
    pub event: Event,
}

impl ShardEvent {
    #[must_use]
    pub fn new(shard_id: u32, event: Event) -> Self {
        Self { shard_id, event }
    }

    /// The dispatch payload, if this is a dispatch event
    #[must_use]
    pub fn as_dispatch(&self) -> Option<&DispatchEvent> {
        match &self.event {
            Event::Dispatch(dispatch) => Some(dispatch),
            _ => None,
        }
    }
}
