//! Gateway wire protocol
//!
//! Op codes, close codes, frame format, command payloads and transport decompression.

mod close_codes;
mod compression;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::CloseCode;
pub use compression::Inflater;
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    Activity, HelloPayload, IdentifyPayload, IdentifyProperties, PresenceUpdatePayload,
    RequestGuildMembersPayload, RequestSoundboardSoundsPayload, ResumePayload, Status,
    VoiceStateUpdatePayload,
};
