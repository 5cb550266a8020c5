//! # chat-core
//!
//! Platform value objects shared by the REST and gateway layers.
//! This crate has no runtime or network dependencies.

pub mod value_objects;

pub use value_objects::{Intents, IntentsParseError, Snowflake, SnowflakeParseError};

/// Gateway protocol version requested on connect
pub const GATEWAY_VERSION: u8 = 10;

/// REST API version used in the default base URL
pub const REST_VERSION: u8 = 10;
