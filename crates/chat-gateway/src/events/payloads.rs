//! Dispatch payloads the shard reads itself
//!
//! Everything else is forwarded as raw JSON for the entity layer to decode.

use chat_core::Snowflake;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// READY event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyEvent {
    /// Gateway protocol version
    pub v: u8,
    pub session_id: String,
    /// Gateway URL to use when resuming this session
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    /// Guilds of the session, initially unavailable
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    #[serde(default)]
    pub user: Value,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

/// Guild entry in READY, GUILD_CREATE and GUILD_DELETE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

/// GUILD_MEMBERS_CHUNK event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMembersChunkEvent {
    pub guild_id: Snowflake,
    pub members: Vec<Value>,
    pub chunk_index: u32,
    pub chunk_count: u32,
    #[serde(default)]
    pub not_found: Vec<Value>,
    #[serde(default)]
    pub presences: Option<Vec<Value>>,
    #[serde(default)]
    pub nonce: Option<String>,
}

impl GuildMembersChunkEvent {
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.chunk_index + 1 >= self.chunk_count
    }
}

/// SOUNDBOARD_SOUNDS event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundboardSoundsEvent {
    pub guild_id: Snowflake,
    pub soundboard_sounds: Vec<Value>,
}
