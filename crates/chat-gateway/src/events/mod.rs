//! Gateway events
//!
//! Dispatch event names, the payloads the shard interprets, and the event
//! stream shards emit upward.

mod event_types;
mod payloads;
mod shard_event;

pub use event_types::GatewayEventType;
pub use payloads::{GuildMembersChunkEvent, ReadyEvent, SoundboardSoundsEvent, UnavailableGuild};
pub use shard_event::{DispatchEvent, Event, ShardEvent};
