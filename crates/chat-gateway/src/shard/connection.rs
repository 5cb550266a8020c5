//! One gateway socket, from open to close
//!
//! The loop owns the socket halves and multiplexes inbound frames, the
//! heartbeat timer, queued outbound frames and close requests.

use super::shard::Shard;
use super::state::{Control, Outbound, ShardStatus};
use crate::error::GatewayError;
use crate::events::{
    DispatchEvent, Event, GatewayEventType, GuildMembersChunkEvent, ReadyEvent,
    SoundboardSoundsEvent, UnavailableGuild,
};
use crate::protocol::{
    GatewayMessage, HelloPayload, IdentifyPayload, Inflater, OpCode, ResumePayload,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, Interval};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub(super) type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code that keeps the session resumable
const RESUMABLE_CLOSE: u16 = 4901;
const NORMAL_CLOSE: u16 = 1000;

/// How a connection ended
#[derive(Debug)]
pub(crate) enum Exit {
    /// The client closed the socket
    Closed {
        code: u16,
        reason: String,
        reconnect: bool,
    },
    /// The server or the transport ended the connection
    Lost(GatewayError),
}

/// What the loop does after handling a frame
#[derive(Debug)]
enum Step {
    Continue,
    StartHeartbeat(Duration),
    Heartbeat,
    Close {
        code: u16,
        reason: &'static str,
        reconnect: bool,
    },
}

pub(super) async fn run(shard: &Shard, socket: Socket) -> Exit {
    let (mut sink, mut stream) = socket.split();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel();
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    shard.on_open(writer_tx, control_tx);

    let mut inflater = shard.config().compress.then(Inflater::new);
    let hello_timeout = tokio::time::sleep(shard.config().connection_timeout);
    tokio::pin!(hello_timeout);
    let mut heartbeat: Option<Interval> = None;

    loop {
        let guild_deadline = shard.guild_deadline();
        let step = tokio::select! {
            frame = stream.next() => {
                let text = match decode(frame, inflater.as_mut()) {
                    Ok(Some(text)) => text,
                    Ok(None) => continue,
                    Err(exit) => return exit,
                };
                match GatewayMessage::from_json(&text) {
                    Ok(message) => shard.handle_message(message),
                    Err(err) => return Exit::Lost(err.into()),
                }
            }
            () = &mut hello_timeout, if heartbeat.is_none() => {
                return Exit::Lost(GatewayError::Timeout("HELLO"));
            }
            () = tick(&mut heartbeat) => {
                if !shard.heartbeat_due() {
                    let _ = sink.send(close_message(RESUMABLE_CLOSE, "heartbeat not acknowledged")).await;
                    return Exit::Lost(GatewayError::Zombied);
                }
                Step::Heartbeat
            }
            Some(outbound) = writer_rx.recv() => {
                let Outbound::Frame(json) = outbound;
                if let Err(err) = sink.send(Message::Text(json)).await {
                    return Exit::Lost(err.into());
                }
                Step::Continue
            }
            Some(Control::Close { reconnect }) = control_rx.recv() => {
                let code = if reconnect && shard.has_session() {
                    RESUMABLE_CLOSE
                } else {
                    NORMAL_CLOSE
                };
                Step::Close { code, reason: "closed by client", reconnect }
            }
            () = sleep_until(guild_deadline.unwrap_or_else(Instant::now)), if guild_deadline.is_some() => {
                shard.finish_guild_wait();
                Step::Continue
            }
        };

        match step {
            Step::Continue => {}
            Step::StartHeartbeat(period) => {
                heartbeat = Some(interval_at(Instant::now() + period, period));
            }
            Step::Heartbeat => shard.send_heartbeat(),
            Step::Close {
                code,
                reason,
                reconnect,
            } => {
                let _ = sink.send(close_message(code, reason)).await;
                return Exit::Closed {
                    code,
                    reason: reason.to_string(),
                    reconnect,
                };
            }
        }
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: code.into(),
        reason: reason.to_owned().into(),
    }))
}

/// Turn a socket item into frame text; `Ok(None)` for control frames and
/// partial compressed messages
fn decode(
    frame: Option<Result<Message, tungstenite::Error>>,
    inflater: Option<&mut Inflater>,
) -> Result<Option<String>, Exit> {
    match frame {
        None => Err(Exit::Lost(GatewayError::Closed {
            code: None,
            reason: "connection reset".to_string(),
        })),
        Some(Err(err)) => Err(Exit::Lost(err.into())),
        Some(Ok(Message::Text(text))) => Ok(Some(text)),
        Some(Ok(Message::Binary(bytes))) => match inflater {
            Some(inflater) => inflater
                .push(&bytes)
                .map_err(|err| Exit::Lost(GatewayError::Decode(err.to_string()))),
            None => String::from_utf8(bytes)
                .map(Some)
                .map_err(|err| Exit::Lost(GatewayError::Decode(err.to_string()))),
        },
        Some(Ok(Message::Close(frame))) => {
            let (code, reason) = frame.map_or((None, String::new()), |frame| {
                (Some(u16::from(frame.code)), frame.reason.into_owned())
            });
            Err(Exit::Lost(GatewayError::Closed { code, reason }))
        }
        Some(Ok(_)) => Ok(None),
    }
}

impl Shard {
    fn on_open(
        &self,
        writer: mpsc::UnboundedSender<Outbound>,
        control: mpsc::UnboundedSender<Control>,
    ) {
        {
            let mut state = self.inner.state.lock();
            state.status = ShardStatus::Handshaking;
            state.writer = Some(writer);
            state.control = Some(control);
        }
        tracing::debug!(shard_id = self.inner.id, "Socket open, waiting for HELLO");
        self.emit(Event::Connect);
    }

    fn has_session(&self) -> bool {
        self.inner.state.lock().session_id.is_some()
    }

    fn guild_deadline(&self) -> Option<Instant> {
        self.inner.state.lock().guild_deadline
    }

    fn handle_message(&self, message: GatewayMessage) -> Step {
        if let Some(sequence) = message.s {
            let (skipped, previous) = {
                let mut state = self.inner.state.lock();
                let previous = state.sequence;
                (state.advance_sequence(sequence), previous)
            };
            if skipped {
                self.warn(format!(
                    "Non-consecutive sequence, expected {} got {sequence}",
                    previous + 1
                ));
            }
        }

        match message.op {
            OpCode::Dispatch => {
                self.handle_dispatch(message);
                Step::Continue
            }
            OpCode::Heartbeat => Step::Heartbeat,
            OpCode::HeartbeatAck => {
                self.on_heartbeat_ack();
                Step::Continue
            }
            OpCode::Hello => match message.as_hello() {
                Some(hello) => self.on_hello(hello),
                None => {
                    self.warn("HELLO without heartbeat interval");
                    Step::Continue
                }
            },
            OpCode::Reconnect => {
                self.debug("Server requested a reconnect");
                Step::Close {
                    code: RESUMABLE_CLOSE,
                    reason: "server requested reconnect",
                    reconnect: self.inner.config.autoreconnect,
                }
            }
            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                self.warn(format!("Invalid session, resumable: {resumable}"));
                if resumable {
                    Step::Close {
                        code: RESUMABLE_CLOSE,
                        reason: "invalid session",
                        reconnect: self.inner.config.autoreconnect,
                    }
                } else {
                    self.inner.state.lock().invalidate_session();
                    Step::Close {
                        code: NORMAL_CLOSE,
                        reason: "invalid session",
                        reconnect: self.inner.config.autoreconnect,
                    }
                }
            }
            op => {
                self.warn(format!("Unexpected {op} from server"));
                Step::Continue
            }
        }
    }

    fn on_hello(&self, hello: HelloPayload) -> Step {
        let period = Duration::from_millis(hello.heartbeat_interval);
        let resume = {
            let mut state = self.inner.state.lock();
            state.heartbeat_interval = Some(period);
            state.heartbeat_acked = true;
            let resume = state.can_resume(self.inner.config.resume_window);
            if !resume {
                state.invalidate_session();
            }
            state.status = if resume {
                ShardStatus::Resuming
            } else {
                ShardStatus::Identifying
            };
            resume
        };
        self.emit(Event::Hello {
            heartbeat_interval: period,
        });

        let sent = if resume {
            self.resume()
        } else {
            self.identify().map(|()| self.send_heartbeat())
        };
        if let Err(err) = sent {
            self.error(format!("Failed to send handshake: {err}"));
        }
        Step::StartHeartbeat(period)
    }

    fn identify(&self) -> Result<(), GatewayError> {
        let config = &self.inner.config;
        let payload = IdentifyPayload {
            token: self.inner.token.clone(),
            intents: config.intents,
            properties: config.properties.clone().into(),
            compress: false,
            large_threshold: config.large_threshold,
            shard: [self.inner.id, self.inner.shard_count],
            presence: self.inner.state.lock().presence.clone(),
        };
        self.debug(format!(
            "Identifying as shard {}/{}",
            self.inner.id, self.inner.shard_count
        ));
        self.send_raw(&GatewayMessage::identify(&payload), true)
    }

    fn resume(&self) -> Result<(), GatewayError> {
        let payload = {
            let state = self.inner.state.lock();
            ResumePayload {
                token: self.inner.token.clone(),
                session_id: state.session_id.clone().unwrap_or_default(),
                seq: state.sequence,
            }
        };
        self.debug(format!(
            "Resuming session {} at sequence {}",
            payload.session_id, payload.seq
        ));
        self.send_raw(&GatewayMessage::resume(&payload), true)
    }

    /// Flip the ack flag for a timed heartbeat; `false` when the previous
    /// one was never acknowledged
    fn heartbeat_due(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !state.heartbeat_acked {
            return false;
        }
        state.heartbeat_acked = false;
        true
    }

    fn send_heartbeat(&self) {
        let sequence = {
            let mut state = self.inner.state.lock();
            state.last_heartbeat_sent = Some(Instant::now());
            (state.sequence > 0).then_some(state.sequence)
        };
        if let Err(err) = self.send_raw(&GatewayMessage::heartbeat(sequence), true) {
            tracing::debug!(shard_id = self.inner.id, error = %err, "Heartbeat not sent");
        }
    }

    fn on_heartbeat_ack(&self) {
        let mut state = self.inner.state.lock();
        let now = Instant::now();
        state.heartbeat_acked = true;
        state.last_heartbeat_ack = Some(now);
        if let Some(sent) = state.last_heartbeat_sent {
            state.latency = Some(now.duration_since(sent));
        }
    }

    fn handle_dispatch(&self, message: GatewayMessage) {
        let Some(name) = message.t else {
            self.warn("Dispatch frame without event name");
            return;
        };
        let dispatch = DispatchEvent::new(name, message.s, message.d.unwrap_or(Value::Null));

        let follow_up = match dispatch.kind {
            Some(GatewayEventType::Ready) => self.on_ready(&dispatch.data),
            Some(GatewayEventType::Resumed) => self.on_resumed(),
            Some(GatewayEventType::GuildCreate) => self.on_guild_create(&dispatch.data),
            Some(GatewayEventType::GuildMembersChunk) => {
                match GuildMembersChunkEvent::deserialize(&dispatch.data) {
                    Ok(chunk) => {
                        self.inner.pending.lock().on_members_chunk(chunk);
                    }
                    Err(err) => self.warn(format!("Malformed GUILD_MEMBERS_CHUNK: {err}")),
                }
                Vec::new()
            }
            Some(GatewayEventType::SoundboardSounds) => {
                match SoundboardSoundsEvent::deserialize(&dispatch.data) {
                    Ok(sounds) => self.inner.pending.lock().on_soundboard_sounds(&sounds),
                    Err(err) => self.warn(format!("Malformed SOUNDBOARD_SOUNDS: {err}")),
                }
                Vec::new()
            }
            _ => Vec::new(),
        };

        self.emit(Event::Dispatch(dispatch));
        for event in follow_up {
            self.emit(event);
        }
    }

    fn on_ready(&self, data: &Value) -> Vec<Event> {
        let ready = match ReadyEvent::deserialize(data) {
            Ok(ready) => ready,
            Err(err) => {
                self.error(format!("Malformed READY: {err}"));
                return Vec::new();
            }
        };

        let mut state = self.inner.state.lock();
        state.session_id = Some(ready.session_id.clone());
        state.resume_url = ready.resume_gateway_url;
        state.status = ShardStatus::Ready;
        state.connect_attempts = 0;
        state.reconnect_delay = self.inner.config.reconnect_delay;
        state.unavailable_guilds = ready
            .guilds
            .iter()
            .filter(|guild| guild.unavailable)
            .map(|guild| guild.id)
            .collect();

        tracing::info!(
            shard_id = self.inner.id,
            session_id = %ready.session_id,
            guilds = ready.guilds.len(),
            "Shard ready"
        );

        let mut events = vec![Event::PreReady {
            session_id: ready.session_id,
        }];
        if state.unavailable_guilds.is_empty() {
            state.guild_deadline = None;
            events.push(Event::Ready);
        } else {
            state.guild_deadline = Some(Instant::now() + self.inner.config.guild_create_timeout);
        }
        events
    }

    fn on_resumed(&self) -> Vec<Event> {
        let mut state = self.inner.state.lock();
        state.status = ShardStatus::Ready;
        state.connect_attempts = 0;
        state.reconnect_delay = self.inner.config.reconnect_delay;
        tracing::info!(shard_id = self.inner.id, sequence = state.sequence, "Session resumed");
        vec![Event::Resumed]
    }

    fn on_guild_create(&self, data: &Value) -> Vec<Event> {
        let Ok(guild) = UnavailableGuild::deserialize(data) else {
            return Vec::new();
        };
        let mut state = self.inner.state.lock();
        if state.guild_deadline.is_none() || !state.unavailable_guilds.remove(&guild.id) {
            return Vec::new();
        }
        if state.unavailable_guilds.is_empty() {
            state.guild_deadline = None;
            vec![Event::Ready]
        } else {
            state.guild_deadline = Some(Instant::now() + self.inner.config.guild_create_timeout);
            Vec::new()
        }
    }

    /// The guild wait timed out; report ready with what arrived
    fn finish_guild_wait(&self) {
        let missing = {
            let mut state = self.inner.state.lock();
            state.guild_deadline = None;
            let missing = state.unavailable_guilds.len();
            state.unavailable_guilds.clear();
            missing
        };
        self.debug(format!("Guild wait timed out with {missing} guilds unavailable"));
        self.emit(Event::Ready);
    }
}
