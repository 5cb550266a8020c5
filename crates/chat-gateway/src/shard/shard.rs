//! Shard handle
//!
//! A [`Shard`] is a cheap clonable handle. Each connection runs in its own
//! task; when it ends the shard decides whether to come back and hands
//! itself to the coordinator's connect queue.

use super::connection::{self, Exit};
use super::requests::{GuildMembers, PendingRequests};
use super::state::{Control, Outbound, ShardSnapshot, ShardState, ShardStatus};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{Event, ShardEvent};
use crate::protocol::{
    CloseCode, GatewayMessage, PresenceUpdatePayload, RequestGuildMembersPayload,
    RequestSoundboardSoundsPayload, VoiceStateUpdatePayload,
};
use chat_common::GatewayConfig;
use chat_core::{Intents, Snowflake};
use chat_ratelimit::{LatencyRef, TokenBucket};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::connect_async;
use uuid::Uuid;

/// Gateway commands per minute on one connection
const SEND_LIMIT: u32 = 120;
const SEND_INTERVAL: Duration = Duration::from_secs(60);
/// Slots held back for heartbeats and handshake frames
const SEND_RESERVED: u32 = 5;
const PRESENCE_LIMIT: u32 = 5;
const PRESENCE_INTERVAL: Duration = Duration::from_secs(20);

/// One gateway shard
#[derive(Clone)]
pub struct Shard {
    pub(super) inner: Arc<ShardInner>,
}

pub(super) struct ShardInner {
    pub id: u32,
    pub shard_count: u32,
    pub gateway_url: String,
    pub token: String,
    pub config: GatewayConfig,
    pub state: Mutex<ShardState>,
    pub pending: Mutex<PendingRequests>,
    events: broadcast::Sender<ShardEvent>,
    requeue: mpsc::UnboundedSender<u32>,
    send_bucket: TokenBucket,
    presence_bucket: TokenBucket,
}

impl Shard {
    pub(crate) fn new(
        id: u32,
        shard_count: u32,
        gateway_url: impl Into<String>,
        token: impl Into<String>,
        config: GatewayConfig,
        events: broadcast::Sender<ShardEvent>,
        requeue: mpsc::UnboundedSender<u32>,
    ) -> Self {
        let latency = LatencyRef::default();
        Self {
            inner: Arc::new(ShardInner {
                id,
                shard_count,
                gateway_url: gateway_url.into(),
                token: token.into(),
                state: Mutex::new(ShardState::new(config.reconnect_delay)),
                config,
                pending: Mutex::new(PendingRequests::default()),
                events,
                requeue,
                send_bucket: TokenBucket::new(SEND_LIMIT, SEND_INTERVAL, SEND_RESERVED, latency.clone()),
                presence_bucket: TokenBucket::new(PRESENCE_LIMIT, PRESENCE_INTERVAL, 0, latency),
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn shard_count(&self) -> u32 {
        self.inner.shard_count
    }

    pub fn status(&self) -> ShardStatus {
        self.inner.state.lock().status
    }

    pub fn snapshot(&self) -> ShardSnapshot {
        self.inner.state.lock().snapshot(self.inner.id)
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        self.inner.state.lock().latency
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShardEvent> {
        self.inner.events.subscribe()
    }

    /// Whether the next connection will resume the current session
    pub fn can_resume(&self) -> bool {
        self.inner
            .state
            .lock()
            .can_resume(self.inner.config.resume_window)
    }

    /// Seed a session to resume, e.g. one persisted by a previous process
    pub fn restore_session(&self, session_id: impl Into<String>, sequence: u64) {
        let mut state = self.inner.state.lock();
        state.session_id = Some(session_id.into());
        state.sequence = sequence;
        state.disconnected_at = None;
    }

    pub(super) fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Start a connection in the background
    ///
    /// Ignored unless the shard is disconnected.
    pub(crate) fn connect(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.status != ShardStatus::Disconnected {
                drop(state);
                self.warn(format!("Connect ignored, shard is {}", self.status()));
                return;
            }
            state.status = ShardStatus::Connecting;
            state.stopped = false;
            state.connect_attempts += 1;

            if state.session_id.is_some()
                && state.connect_attempts > self.inner.config.max_resume_attempts
            {
                tracing::warn!(
                    shard_id = self.inner.id,
                    attempts = state.connect_attempts,
                    "Too many resume attempts, dropping session"
                );
                state.invalidate_session();
            }
        }

        let shard = self.clone();
        tokio::spawn(async move { shard.run().await });
    }

    async fn run(self) {
        let url = self.connect_url();
        tracing::debug!(shard_id = self.inner.id, url = %url, "Opening gateway connection");

        let timeout = self.inner.config.connection_timeout;
        let exit = match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
            Err(_) => Exit::Lost(GatewayError::Timeout("socket open")),
            Ok(Err(err)) => Exit::Lost(err.into()),
            Ok(Ok((socket, _response))) => connection::run(&self, socket).await,
        };
        self.on_exit(exit).await;
    }

    fn connect_url(&self) -> String {
        let state = self.inner.state.lock();
        let base = match &state.resume_url {
            Some(url) if state.can_resume(self.inner.config.resume_window) => url.as_str(),
            _ => self.inner.gateway_url.as_str(),
        };
        gateway_url(base, self.inner.config.compress)
    }

    /// Close the connection
    ///
    /// With `reconnect` the session is kept and the shard comes back through
    /// the connect queue; without it the session is dropped.
    pub fn disconnect(&self, reconnect: bool) {
        let control = {
            let mut state = self.inner.state.lock();
            if !reconnect {
                state.stopped = true;
            }
            if state.control.is_none() && !reconnect {
                state.invalidate_session();
            }
            state.control.clone()
        };
        if let Some(control) = control {
            let _ = control.send(Control::Close { reconnect });
        }
    }

    async fn on_exit(&self, exit: Exit) {
        self.inner.pending.lock().fail_all();

        let (code, reason, reconnect) = match exit {
            Exit::Closed {
                code,
                reason,
                reconnect,
            } => (Some(code), reason, reconnect),
            Exit::Lost(err) => {
                let code = err.close_code();
                match code.and_then(CloseCode::from_u16) {
                    Some(close) if close.is_fatal() => {
                        let err = GatewayError::Fatal(close);
                        self.error(format!("{err}: {}", close.description()));
                        self.inner.state.lock().invalidate_session();
                        (code, err.to_string(), false)
                    }
                    close => {
                        if close.is_some_and(CloseCode::invalidates_session) {
                            self.inner.state.lock().invalidate_session();
                        }
                        tracing::warn!(shard_id = self.inner.id, error = %err, "Gateway connection lost");
                        (code, err.to_string(), self.inner.config.autoreconnect)
                    }
                }
            }
        };

        {
            let mut state = self.inner.state.lock();
            state.reset_connection();
            if state.stopped {
                state.invalidate_session();
            }
        }
        let reconnect = reconnect && !self.inner.state.lock().stopped;

        tracing::info!(
            shard_id = self.inner.id,
            code = ?code,
            reason = %reason,
            reconnect,
            "Shard disconnected"
        );
        self.emit(Event::Disconnect {
            code,
            reason,
            reconnect,
        });

        if reconnect {
            self.schedule_reconnect().await;
        }
    }

    pub(crate) async fn schedule_reconnect(&self) {
        let delay = {
            let mut state = self.inner.state.lock();
            if let Some(max) = self.inner.config.max_reconnect_attempts {
                if state.connect_attempts >= max {
                    let err = GatewayError::ReconnectExhausted {
                        attempts: state.connect_attempts,
                    };
                    state.stopped = true;
                    drop(state);
                    self.error(err.to_string());
                    return;
                }
            }
            if state.can_resume(self.inner.config.resume_window) {
                Duration::ZERO
            } else {
                let delay = state.reconnect_delay;
                state.reconnect_delay = next_reconnect_delay(delay, self.inner.config.max_reconnect_delay);
                delay
            }
        };

        if !delay.is_zero() {
            tracing::debug!(shard_id = self.inner.id, delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
            tokio::time::sleep(delay).await;
        }
        if self.inner.state.lock().stopped {
            return;
        }
        let _ = self.inner.requeue.send(self.inner.id);
    }

    /// Update the presence; applied on the next identify when not connected
    pub fn edit_status(&self, presence: PresenceUpdatePayload) -> GatewayResult<()> {
        let writer = {
            let mut state = self.inner.state.lock();
            state.presence = Some(presence.clone());
            (state.status == ShardStatus::Ready)
                .then(|| state.writer.clone())
                .flatten()
        };
        let Some(writer) = writer else {
            return Ok(());
        };

        let json = GatewayMessage::presence_update(&presence).to_json()?;
        let send_bucket = self.inner.send_bucket.clone();
        self.inner.presence_bucket.queue(
            move || {
                send_bucket.queue(
                    move || {
                        let _ = writer.send(Outbound::Frame(json));
                    },
                    false,
                );
            },
            false,
        );
        Ok(())
    }

    /// Join, move or leave a voice channel
    pub fn update_voice_state(&self, payload: &VoiceStateUpdatePayload) -> GatewayResult<()> {
        self.send(&GatewayMessage::voice_state_update(payload), false)
    }

    /// Request guild members, waiting for every chunk or `timeout`
    ///
    /// On timeout the members received so far are returned.
    pub async fn request_guild_members(
        &self,
        mut request: RequestGuildMembersPayload,
        timeout: Duration,
    ) -> GatewayResult<GuildMembers> {
        let intents = self.inner.config.intents;
        if request.presences && !intents.contains(Intents::GUILD_PRESENCES) {
            return Err(GatewayError::InvalidRequest(
                "presences require the GUILD_PRESENCES intent".to_string(),
            ));
        }
        if request.user_ids.is_none() && !intents.contains(Intents::GUILD_MEMBERS) {
            return Err(GatewayError::InvalidRequest(
                "listing members requires the GUILD_MEMBERS intent".to_string(),
            ));
        }

        let nonce = Uuid::new_v4().simple().to_string();
        request.nonce = Some(nonce.clone());
        let done = self.inner.pending.lock().register_members(nonce.clone());

        if let Err(err) = self.send(&GatewayMessage::request_guild_members(&request), false) {
            self.inner.pending.lock().take_members(&nonce);
            return Err(err);
        }

        let outcome = tokio::time::timeout(timeout, done).await;
        let members = self.inner.pending.lock().take_members(&nonce);
        match outcome {
            Ok(Ok(())) => Ok(members),
            Ok(Err(_)) => Err(GatewayError::Disconnected),
            Err(_) => {
                tracing::warn!(
                    shard_id = self.inner.id,
                    guild_id = %request.guild_id,
                    received = members.members.len(),
                    "Member request timed out"
                );
                Ok(members)
            }
        }
    }

    /// Request soundboard sounds for several guilds
    ///
    /// On timeout the guilds answered so far are returned.
    pub async fn request_soundboard_sounds(
        &self,
        guild_ids: Vec<Snowflake>,
        timeout: Duration,
    ) -> GatewayResult<HashMap<Snowflake, Vec<Value>>> {
        if guild_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let (id, done) = self.inner.pending.lock().register_soundboard(guild_ids.len());
        let payload = RequestSoundboardSoundsPayload { guild_ids };

        if let Err(err) = self.send(&GatewayMessage::request_soundboard_sounds(&payload), false) {
            self.inner.pending.lock().take_soundboard(id);
            return Err(err);
        }

        let outcome = tokio::time::timeout(timeout, done).await;
        let sounds = self.inner.pending.lock().take_soundboard(id);
        match outcome {
            Ok(Err(_)) => Err(GatewayError::Disconnected),
            _ => Ok(sounds),
        }
    }

    /// Queue a command frame; requires a ready connection
    fn send(&self, message: &GatewayMessage, priority: bool) -> GatewayResult<()> {
        let writer = {
            let state = self.inner.state.lock();
            match (&state.writer, state.status) {
                (Some(writer), ShardStatus::Ready) => writer.clone(),
                _ => return Err(GatewayError::Disconnected),
            }
        };
        self.queue_frame(writer, message, priority)
    }

    /// Queue a frame on the current socket regardless of status
    pub(super) fn send_raw(&self, message: &GatewayMessage, priority: bool) -> GatewayResult<()> {
        let writer = self
            .inner
            .state
            .lock()
            .writer
            .clone()
            .ok_or(GatewayError::Disconnected)?;
        self.queue_frame(writer, message, priority)
    }

    fn queue_frame(
        &self,
        writer: mpsc::UnboundedSender<Outbound>,
        message: &GatewayMessage,
        priority: bool,
    ) -> GatewayResult<()> {
        let json = message.to_json()?;
        tracing::trace!(shard_id = self.inner.id, op = %message.op, "Queueing frame");
        self.inner.send_bucket.queue(
            move || {
                let _ = writer.send(Outbound::Frame(json));
            },
            priority,
        );
        Ok(())
    }

    pub(super) fn emit(&self, event: Event) {
        let _ = self.inner.events.send(ShardEvent::new(self.inner.id, event));
    }

    pub(super) fn debug(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(shard_id = self.inner.id, "{message}");
        self.emit(Event::Debug(message));
    }

    pub(super) fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(shard_id = self.inner.id, "{message}");
        self.emit(Event::Warn(message));
    }

    pub(super) fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(shard_id = self.inner.id, "{message}");
        self.emit(Event::Error(message));
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.inner.id)
            .field("shard_count", &self.inner.shard_count)
            .field("status", &self.status())
            .finish()
    }
}

/// Socket URL for a gateway base URL
pub(crate) fn gateway_url(base: &str, compress: bool) -> String {
    let mut url = format!(
        "{}/?v={}&encoding=json",
        base.trim_end_matches('/'),
        chat_core::GATEWAY_VERSION
    );
    if compress {
        url.push_str("&compress=zlib-stream");
    }
    url
}

/// Grow a reconnect delay by a random factor in `[1, 3)`, capped at `max`
pub(crate) fn next_reconnect_delay(delay: Duration, max: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(1.0..3.0);
    delay.mul_f64(factor).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard(config: GatewayConfig) -> (Shard, broadcast::Receiver<ShardEvent>, mpsc::UnboundedReceiver<u32>) {
        let (events, rx) = broadcast::channel(16);
        let (requeue, requeue_rx) = mpsc::unbounded_channel();
        let shard = Shard::new(3, 8, "ws://127.0.0.1:1", "token", config, events, requeue);
        (shard, rx, requeue_rx)
    }

    #[test]
    fn test_gateway_url() {
        assert_eq!(
            gateway_url("wss://gateway.example/", false),
            "wss://gateway.example/?v=10&encoding=json"
        );
        assert_eq!(
            gateway_url("wss://gateway.example", true),
            "wss://gateway.example/?v=10&encoding=json&compress=zlib-stream"
        );
    }

    #[test]
    fn test_reconnect_delay_growth() {
        let max = Duration::from_secs(30);
        for _ in 0..100 {
            let next = next_reconnect_delay(Duration::from_secs(1), max);
            assert!(next >= Duration::from_secs(1));
            assert!(next < Duration::from_secs(3));
        }
        assert!(next_reconnect_delay(Duration::from_secs(29), max) <= max);
        assert_eq!(next_reconnect_delay(max, max), max);
    }

    #[tokio::test]
    async fn test_commands_require_ready_connection() {
        let (shard, _events, _requeue) = shard(GatewayConfig::default());
        let payload = VoiceStateUpdatePayload {
            guild_id: Snowflake::new(1),
            channel_id: None,
            self_mute: false,
            self_deaf: false,
        };
        assert!(matches!(
            shard.update_voice_state(&payload),
            Err(GatewayError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_member_request_checks_intents() {
        let config = GatewayConfig {
            intents: Intents::GUILDS,
            ..GatewayConfig::default()
        };
        let (shard, _events, _requeue) = shard(config);
        let request = RequestGuildMembersPayload {
            guild_id: Snowflake::new(1),
            query: Some(String::new()),
            limit: 0,
            presences: false,
            user_ids: None,
            nonce: None,
        };
        let result = shard.request_guild_members(request, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_presence_stored_while_disconnected() {
        let (shard, _events, _requeue) = shard(GatewayConfig::default());
        let presence = PresenceUpdatePayload::new(crate::protocol::Status::Idle);
        shard.edit_status(presence.clone()).unwrap();
        assert_eq!(shard.inner.state.lock().presence, Some(presence));
    }

    #[tokio::test]
    async fn test_disconnect_while_idle_drops_session() {
        let (shard, _events, _requeue) = shard(GatewayConfig::default());
        shard.inner.state.lock().session_id = Some("abc".to_string());
        assert!(shard.can_resume());

        shard.disconnect(false);
        assert!(!shard.can_resume());
        assert_eq!(shard.status(), ShardStatus::Disconnected);
    }
}
