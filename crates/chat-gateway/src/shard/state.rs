//! Shard status and session state

use crate::protocol::PresenceUpdatePayload;
use chat_core::Snowflake;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Connection lifecycle of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    Disconnected,
    /// Opening the socket
    Connecting,
    /// Socket open, waiting for HELLO
    Handshaking,
    Identifying,
    Resuming,
    Ready,
}

impl ShardStatus {
    /// Whether the shard is between opening a socket and reaching `Ready`
    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Handshaking | Self::Identifying | Self::Resuming
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSnapshot {
    pub id: u32,
    pub status: ShardStatus,
    pub session_id: Option<String>,
    pub sequence: u64,
    /// Time between the last heartbeat and its ack
    pub latency: Option<Duration>,
    pub connect_attempts: u32,
}

/// Frames queued for the socket writer
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(String),
}

/// Requests from the shard handle to the running connection
#[derive(Debug, Clone, Copy)]
pub(crate) enum Control {
    Close { reconnect: bool },
}

#[derive(Debug)]
pub(crate) struct ShardState {
    pub status: ShardStatus,
    pub session_id: Option<String>,
    pub sequence: u64,
    pub resume_url: Option<String>,
    pub heartbeat_interval: Option<Duration>,
    pub last_heartbeat_sent: Option<Instant>,
    pub last_heartbeat_ack: Option<Instant>,
    /// Cleared when a heartbeat is sent, set again by its ack
    pub heartbeat_acked: bool,
    pub latency: Option<Duration>,
    pub connect_attempts: u32,
    pub reconnect_delay: Duration,
    pub disconnected_at: Option<Instant>,
    /// Guilds from READY that have not arrived yet
    pub unavailable_guilds: HashSet<Snowflake>,
    /// Deadline of the post-READY guild wait
    pub guild_deadline: Option<Instant>,
    /// Set by an explicit disconnect without reconnect
    pub stopped: bool,
    pub presence: Option<PresenceUpdatePayload>,
    pub writer: Option<mpsc::UnboundedSender<Outbound>>,
    pub control: Option<mpsc::UnboundedSender<Control>>,
}

impl ShardState {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            status: ShardStatus::Disconnected,
            session_id: None,
            sequence: 0,
            resume_url: None,
            heartbeat_interval: None,
            last_heartbeat_sent: None,
            last_heartbeat_ack: None,
            heartbeat_acked: true,
            latency: None,
            connect_attempts: 0,
            reconnect_delay,
            disconnected_at: None,
            unavailable_guilds: HashSet::new(),
            guild_deadline: None,
            stopped: false,
            presence: None,
            writer: None,
            control: None,
        }
    }

    /// Whether the next connection should resume rather than identify
    pub fn can_resume(&self, resume_window: Duration) -> bool {
        self.session_id.is_some()
            && self
                .disconnected_at
                .map_or(true, |at| at.elapsed() <= resume_window)
    }

    /// Drop the session; the next handshake identifies from scratch
    pub fn invalidate_session(&mut self) {
        self.session_id = None;
        self.sequence = 0;
        self.resume_url = None;
    }

    /// Advance the sequence counter; returns `true` when frames were skipped
    pub fn advance_sequence(&mut self, sequence: u64) -> bool {
        let skipped = sequence > self.sequence + 1 && self.status != ShardStatus::Resuming;
        if sequence > self.sequence {
            self.sequence = sequence;
        }
        skipped
    }

    /// Forget everything bound to the closed socket
    pub fn reset_connection(&mut self) {
        self.status = ShardStatus::Disconnected;
        self.heartbeat_interval = None;
        self.last_heartbeat_sent = None;
        self.heartbeat_acked = true;
        self.unavailable_guilds.clear();
        self.guild_deadline = None;
        self.writer = None;
        self.control = None;
        self.disconnected_at = Some(Instant::now());
    }

    pub fn snapshot(&self, id: u32) -> ShardSnapshot {
        ShardSnapshot {
            id,
            status: self.status,
            session_id: self.session_id.clone(),
            sequence: self.sequence,
            latency: self.latency,
            connect_attempts: self.connect_attempts,
        }
    }
}
