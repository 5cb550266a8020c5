//! Gateway shards
//!
//! A shard owns one gateway session: the socket, heartbeats, the sequence
//! counter and the resume state.

mod connection;
mod requests;
mod shard;
mod state;

pub use requests::GuildMembers;
pub use shard::Shard;
pub use state::{ShardSnapshot, ShardStatus};

pub(crate) use shard::gateway_url;
