//! Gateway error types

use crate::protocol::CloseCode;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Gateway connection errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Opening the socket failed
    #[error("Connection failed: {0}")]
    Connect(#[from] tungstenite::Error),

    /// A handshake step did not complete in time
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The server closed the socket
    #[error("Connection closed with code {code:?}: {reason}")]
    Closed { code: Option<u16>, reason: String },

    /// A frame could not be decoded
    #[error("Failed to decode frame: {0}")]
    Decode(String),

    /// Heartbeats stopped being acknowledged
    #[error("Heartbeat not acknowledged, connection zombied")]
    Zombied,

    /// The shard is not connected or was shut down
    #[error("Shard disconnected")]
    Disconnected,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A command was rejected before being sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The server closed with a code that reconnecting cannot fix
    #[error("Fatal close code: {0}")]
    Fatal(CloseCode),

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl GatewayError {
    /// Close code carried by this error, if any
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Closed { code, .. } => *code,
            Self::Fatal(code) => Some(code.as_u16()),
            _ => None,
        }
    }

    /// Whether the shard may reconnect after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Fatal(_) | Self::InvalidConfig(_) | Self::ReconnectExhausted { .. }
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
