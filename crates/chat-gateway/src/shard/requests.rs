//! Gateway requests answered by dispatch events
//!
//! Member requests are matched to GUILD_MEMBERS_CHUNK events by nonce and
//! soundboard requests to SOUNDBOARD_SOUNDS events by guild id. Partial
//! results stay in the registry so a timed-out caller still gets what
//! arrived.

use crate::events::{GuildMembersChunkEvent, SoundboardSoundsEvent};
use chat_core::Snowflake;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Members and presences collected for one request
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GuildMembers {
    pub members: Vec<Value>,
    pub presences: Vec<Value>,
    pub not_found: Vec<Value>,
}

#[derive(Debug)]
struct MemberRequest {
    collected: GuildMembers,
    done: Option<oneshot::Sender<()>>,
}

#[derive(Debug)]
struct SoundboardRequest {
    remaining: usize,
    sounds: HashMap<Snowflake, Vec<Value>>,
    done: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    members: HashMap<String, MemberRequest>,
    soundboard: HashMap<u64, SoundboardRequest>,
    next_soundboard: u64,
}

impl PendingRequests {
    pub fn register_members(&mut self, nonce: String) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.members.insert(
            nonce,
            MemberRequest {
                collected: GuildMembers::default(),
                done: Some(tx),
            },
        );
        rx
    }

    /// Remove a member request, returning whatever was collected
    pub fn take_members(&mut self, nonce: &str) -> GuildMembers {
        self.members
            .remove(nonce)
            .map(|request| request.collected)
            .unwrap_or_default()
    }

    /// Feed a chunk; returns `false` when no request carries its nonce
    pub fn on_members_chunk(&mut self, chunk: GuildMembersChunkEvent) -> bool {
        let Some(nonce) = chunk.nonce.as_deref() else {
            return false;
        };
        let Some(request) = self.members.get_mut(nonce) else {
            return false;
        };

        let last = chunk.is_last();
        request.collected.members.extend(chunk.members);
        request.collected.not_found.extend(chunk.not_found);
        if let Some(presences) = chunk.presences {
            request.collected.presences.extend(presences);
        }
        if last {
            if let Some(done) = request.done.take() {
                let _ = done.send(());
            }
        }
        true
    }

    pub fn register_soundboard(&mut self, guild_ids: usize) -> (u64, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_soundboard;
        self.next_soundboard += 1;
        self.soundboard.insert(
            id,
            SoundboardRequest {
                remaining: guild_ids,
                sounds: HashMap::new(),
                done: Some(tx),
            },
        );
        (id, rx)
    }

    pub fn take_soundboard(&mut self, id: u64) -> HashMap<Snowflake, Vec<Value>> {
        self.soundboard
            .remove(&id)
            .map(|request| request.sounds)
            .unwrap_or_default()
    }

    /// Deliver sounds to every open request still waiting on the guild
    pub fn on_soundboard_sounds(&mut self, event: &SoundboardSoundsEvent) {
        for request in self.soundboard.values_mut() {
            if request.done.is_none() || request.sounds.contains_key(&event.guild_id) {
                continue;
            }
            request
                .sounds
                .insert(event.guild_id, event.soundboard_sounds.clone());
            request.remaining = request.remaining.saturating_sub(1);
            if request.remaining == 0 {
                if let Some(done) = request.done.take() {
                    let _ = done.send(());
                }
            }
        }
    }

    /// Wake every waiter; collected data stays for them to take
    pub fn fail_all(&mut self) {
        for request in self.members.values_mut() {
            request.done.take();
        }
        for request in self.soundboard.values_mut() {
            request.done.take();
        }
    }
}
