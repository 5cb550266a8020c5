//! # chat-gateway
//!
//! Gateway client: wire protocol, shards and the shard coordinator.
//!
//! ```no_run
//! use chat_common::GatewayConfig;
//! use chat_gateway::{CoordinatorOptions, ShardCoordinator};
//!
//! # async fn run() -> chat_gateway::GatewayResult<()> {
//! let options = CoordinatorOptions::new("wss://gateway.example", "token", 1, GatewayConfig::default());
//! let coordinator = ShardCoordinator::new(options)?;
//! let mut events = coordinator.subscribe();
//! coordinator.connect();
//!
//! while let Ok(event) = events.recv().await {
//!     println!("shard {}: {:?}", event.shard_id, event.event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod error;
pub mod events;
pub mod protocol;
pub mod shard;

pub use coordinator::{CoordinatorOptions, ShardCoordinator, IDENTIFY_INTERVAL};
pub use error::{GatewayError, GatewayResult};
pub use events::{DispatchEvent, Event, GatewayEventType, ShardEvent};
pub use shard::{GuildMembers, Shard, ShardSnapshot, ShardStatus};
