//! Presence and session metadata messages
//!
//! Relayed by the host. They never affect the simulation.

use bitcode::{Decode, Encode};
use rollsync_shared::{PlayerId, PlayerProfile, RoomInfo};

/// A player is in the room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct PlayerJoin {
    /// Epoch the player joined in
    pub stage_seq: u32,
    pub player: PlayerId,
    /// Player spectates until the next stage starts
    pub pending_spawn: bool,
}

/// A player left the room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct PlayerLeave {
    pub player: PlayerId,
}

/// Display profile update
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ProfileUpdate {
    pub player: PlayerId,
    pub profile: PlayerProfile,
}

/// Chat line
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ChatMessage {
    /// Author (ignored by the host, which uses the transport peer)
    pub player: PlayerId,
    pub text: String,
}

/// Room settings changed
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct RoomUpdate {
    pub room: RoomInfo,
}

/// Removed by the host
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Kick {
    pub reason: Option<String>,
}
