//! Gateway event types
//!
//! Event names sent in the `t` field of dispatch frames.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

macro_rules! event_types {
    ($($variant:ident => $name:literal,)+) => {
        /// Dispatch event types
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum GatewayEventType {
            $($variant,)+
        }

        impl GatewayEventType {
            /// Every known event type
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// Get the string representation of the event type
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// Parse an event type from a string
            #[must_use]
            pub fn from_str(s: &str) -> Option<Self> {
                match s {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

event_types! {
    Ready => "READY",
    Resumed => "RESUMED",
    ApplicationCommandPermissionsUpdate => "APPLICATION_COMMAND_PERMISSIONS_UPDATE",
    AutoModerationActionExecution => "AUTO_MODERATION_ACTION_EXECUTION",
    AutoModerationRuleCreate => "AUTO_MODERATION_RULE_CREATE",
    AutoModerationRuleDelete => "AUTO_MODERATION_RULE_DELETE",
    AutoModerationRuleUpdate => "AUTO_MODERATION_RULE_UPDATE",
    ChannelCreate => "CHANNEL_CREATE",
    ChannelDelete => "CHANNEL_DELETE",
    ChannelPinsUpdate => "CHANNEL_PINS_UPDATE",
    ChannelUpdate => "CHANNEL_UPDATE",
    EntitlementCreate => "ENTITLEMENT_CREATE",
    EntitlementDelete => "ENTITLEMENT_DELETE",
    EntitlementUpdate => "ENTITLEMENT_UPDATE",
    GuildAuditLogEntryCreate => "GUILD_AUDIT_LOG_ENTRY_CREATE",
    GuildBanAdd => "GUILD_BAN_ADD",
    GuildBanRemove => "GUILD_BAN_REMOVE",
    GuildCreate => "GUILD_CREATE",
    GuildDelete => "GUILD_DELETE",
    GuildEmojisUpdate => "GUILD_EMOJIS_UPDATE",
    GuildIntegrationsUpdate => "GUILD_INTEGRATIONS_UPDATE",
    GuildMemberAdd => "GUILD_MEMBER_ADD",
    GuildMemberRemove => "GUILD_MEMBER_REMOVE",
    GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
    GuildMembersChunk => "GUILD_MEMBERS_CHUNK",
    GuildRoleCreate => "GUILD_ROLE_CREATE",
    GuildRoleDelete => "GUILD_ROLE_DELETE",
    GuildRoleUpdate => "GUILD_ROLE_UPDATE",
    GuildScheduledEventCreate => "GUILD_SCHEDULED_EVENT_CREATE",
    GuildScheduledEventDelete => "GUILD_SCHEDULED_EVENT_DELETE",
    GuildScheduledEventUpdate => "GUILD_SCHEDULED_EVENT_UPDATE",
    GuildScheduledEventUserAdd => "GUILD_SCHEDULED_EVENT_USER_ADD",
    GuildScheduledEventUserRemove => "GUILD_SCHEDULED_EVENT_USER_REMOVE",
    GuildSoundboardSoundCreate => "GUILD_SOUNDBOARD_SOUND_CREATE",
    GuildSoundboardSoundDelete => "GUILD_SOUNDBOARD_SOUND_DELETE",
    GuildSoundboardSoundUpdate => "GUILD_SOUNDBOARD_SOUND_UPDATE",
    GuildSoundboardSoundsUpdate => "GUILD_SOUNDBOARD_SOUNDS_UPDATE",
    GuildStickersUpdate => "GUILD_STICKERS_UPDATE",
    GuildUpdate => "GUILD_UPDATE",
    IntegrationCreate => "INTEGRATION_CREATE",
    IntegrationDelete => "INTEGRATION_DELETE",
    IntegrationUpdate => "INTEGRATION_UPDATE",
    InteractionCreate => "INTERACTION_CREATE",
    InviteCreate => "INVITE_CREATE",
    InviteDelete => "INVITE_DELETE",
    MessageCreate => "MESSAGE_CREATE",
    MessageDelete => "MESSAGE_DELETE",
    MessageDeleteBulk => "MESSAGE_DELETE_BULK",
    MessagePollVoteAdd => "MESSAGE_POLL_VOTE_ADD",
    MessagePollVoteRemove => "MESSAGE_POLL_VOTE_REMOVE",
    MessageReactionAdd => "MESSAGE_REACTION_ADD",
    MessageReactionRemove => "MESSAGE_REACTION_REMOVE",
    MessageReactionRemoveAll => "MESSAGE_REACTION_REMOVE_ALL",
    MessageReactionRemoveEmoji => "MESSAGE_REACTION_REMOVE_EMOJI",
    MessageUpdate => "MESSAGE_UPDATE",
    PresenceUpdate => "PRESENCE_UPDATE",
    SoundboardSounds => "SOUNDBOARD_SOUNDS",
    StageInstanceCreate => "STAGE_INSTANCE_CREATE",
    StageInstanceDelete => "STAGE_INSTANCE_DELETE",
    StageInstanceUpdate => "STAGE_INSTANCE_UPDATE",
    SubscriptionCreate => "SUBSCRIPTION_CREATE",
    SubscriptionDelete => "SUBSCRIPTION_DELETE",
    SubscriptionUpdate => "SUBSCRIPTION_UPDATE",
    ThreadCreate => "THREAD_CREATE",
    ThreadDelete => "THREAD_DELETE",
    ThreadListSync => "THREAD_LIST_SYNC",
    ThreadMemberUpdate => "THREAD_MEMBER_UPDATE",
    ThreadMembersUpdate => "THREAD_MEMBERS_UPDATE",
    ThreadUpdate => "THREAD_UPDATE",
    TypingStart => "TYPING_START",
    UserUpdate => "USER_UPDATE",
    VoiceChannelEffectSend => "VOICE_CHANNEL_EFFECT_SEND",
    VoiceServerUpdate => "VOICE_SERVER_UPDATE",
    VoiceStateUpdate => "VOICE_STATE_UPDATE",
    WebhooksUpdate => "WEBHOOKS_UPDATE",
}

impl fmt::Display for GatewayEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<GatewayEventType> for String {
    fn from(event: GatewayEventType) -> Self {
        event.as_str().to_string()
    }
}

impl Serialize for GatewayEventType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for GatewayEventType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Self::from_str(&name).ok_or_else(|| serde::de::Error::custom(format!("unknown event type: {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_as_str() {
        assert_eq!(GatewayEventType::Ready.as_str(), "READY");
        assert_eq!(GatewayEventType::MessageCreate.as_str(), "MESSAGE_CREATE");
        assert_eq!(GatewayEventType::GuildMembersChunk.as_str(), "GUILD_MEMBERS_CHUNK");
    }

    #[test]
    fn test_event_type_from_str() {
        assert_eq!(GatewayEventType::from_str("READY"), Some(GatewayEventType::Ready));
        assert_eq!(
            GatewayEventType::from_str("SOUNDBOARD_SOUNDS"),
            Some(GatewayEventType::SoundboardSounds)
        );
        assert_eq!(GatewayEventType::from_str("INVALID"), None);
        assert_eq!(GatewayEventType::from_str("ready"), None);
    }

    #[test]
    fn test_all_names_parse_back() {
        for event in GatewayEventType::ALL {
            assert_eq!(GatewayEventType::from_str(event.as_str()), Some(*event));
        }
    }

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&GatewayEventType::MessageCreate).unwrap();
        assert_eq!(json, "\"MESSAGE_CREATE\"");

        let parsed: GatewayEventType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, GatewayEventType::MessageCreate);
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(GatewayEventType::Resumed.to_string(), "RESUMED");
    }
}
