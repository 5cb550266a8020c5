//! Client error types

use chat_common::ConfigError;
use chat_gateway::GatewayError;
use chat_rest::RestError;
use thiserror::Error;

/// Errors surfaced by [`Client`](crate::Client)
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The bootstrap request was rejected with 401
    #[error("Authentication failed: invalid token")]
    InvalidToken,

    #[error("Client is already connected")]
    AlreadyConnected,
}

/// Client result type
pub type ClientResult<T> = Result<T, ClientError>;
