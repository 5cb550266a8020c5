//! # chat-client
//!
//! One handle over the REST dispatcher and the gateway shards.
//!
//! ```no_run
//! use chat_client::Client;
//! use chat_common::ClientConfig;
//!
//! # async fn run() -> chat_client::ClientResult<()> {
//! let client = Client::new(ClientConfig::new("token"))?;
//! let mut events = client.events();
//! client.connect().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let Some(dispatch) = event.as_dispatch() {
//!         println!("{} on shard {}", dispatch.name, event.shard_id);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;

pub use chat_core::{Intents, Snowflake};
pub use client::{Client, GatewayBot, SessionStartLimit};
pub use error::{ClientError, ClientResult};
