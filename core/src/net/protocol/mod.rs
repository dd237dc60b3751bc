//! Netplay wire protocol
//!
//! Every message exchanged between host and clients is a variant of the
//! closed [`NetMessage`] enum, serialized with bitcode and framed so that
//! truncated, foreign or mismatched-version packets are rejected before
//! decoding.
//!
//! # Wire Format
//!
//! ```text
//! [RSYN][version:u16][length:u32][bitcode payload...]
//! ```
//!
//! # Stage Epochs
//!
//! Messages that belong to a stage carry its `stage_seq`. Receivers drop any
//! such message whose epoch differs from their own, except the epoch
//! transition messages ([`NetMessage::is_epoch_transition`]).

use bitcode::{Decode, Encode};

mod client;
mod host;
mod presence;


pub use client::{
    Ack, InputBatch, InputEntry, InputMessage, SnapshotReason, SnapshotRequest, StageReady,
};
pub use host::{FrameBatch, FrameBundle, HashClaim, PlayerInput, Snapshot, StageSync, Start};
pub use presence::{ChatMessage, Kick, PlayerJoin, PlayerLeave, ProfileUpdate, RoomUpdate};

/// Protocol magic bytes
pub const WIRE_MAGIC: [u8; 4] = *b"RSYN";

/// Current protocol version
pub const WIRE_VERSION: u16 = 1;

/// Header size: magic (4) + version (2) + length (4)
pub const WIRE_HEADER_SIZE: usize = 10;

// ============================================================================
// Core Message Enum
// ============================================================================

/// Top-level netplay message enum
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum NetMessage {
    // Client -> Host
    /// Single input sample
    Input(InputMessage),
    /// Unacknowledged inputs inside the resend window
    InputBatch(InputBatch),
    /// Host frame acknowledgement
    Ack(Ack),
    /// RTT ping
    Ping(u32),
    /// Stage loaded
    StageReady(StageReady),
    /// Snapshot request
    SnapshotRequest(SnapshotRequest),

    // Host -> Client
    /// One simulated frame
    Frame(FrameBundle),
    /// Resend window of simulated frames
    FrameBatch(FrameBatch),
    /// Stage handshake complete
    StageSync(StageSync),
    /// Full state snapshot
    Snapshot(Snapshot),
    /// RTT ping reply
    Pong(u32),
    /// New stage epoch
    Start(Start),

    // Presence (relayed by host)
    PlayerJoin(PlayerJoin),
    PlayerLeave(PlayerLeave),
    PlayerProfile(ProfileUpdate),
    Chat(ChatMessage),
    RoomUpdate(RoomUpdate),
    Kick(Kick),
    MatchEnd,
}

/// Which side may send a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    ClientToHost,
    HostToClient,
    Either,
}

impl NetMessage {
    /// Stage epoch the message belongs to, if it is epoch-scoped
    pub fn stage_seq(&self) -> Option<u32> {
        match self {
            Self::Input(msg) => Some(msg.stage_seq),
            Self::InputBatch(msg) => Some(msg.stage_seq),
            Self::Ack(msg) => Some(msg.stage_seq),
            Self::StageReady(msg) => Some(msg.stage_seq),
            Self::SnapshotRequest(msg) => Some(msg.stage_seq),
            Self::Frame(msg) => Some(msg.stage_seq),
            Self::FrameBatch(msg) => Some(msg.stage_seq),
            Self::StageSync(msg) => Some(msg.stage_seq),
            Self::Snapshot(msg) => Some(msg.stage_seq),
            Self::Start(msg) => Some(msg.stage_seq),
            Self::PlayerJoin(msg) => Some(msg.stage_seq),
            Self::Ping(_)
            | Self::Pong(_)
            | Self::PlayerLeave(_)
            | Self::PlayerProfile(_)
            | Self::Chat(_)
            | Self::RoomUpdate(_)
            | Self::Kick(_)
            | Self::MatchEnd => None,
        }
    }

    /// Messages that are accepted regardless of the receiver's epoch
    pub fn is_epoch_transition(&self) -> bool {
        matches!(
            self,
            Self::Start(_) | Self::PlayerJoin(_) | Self::PlayerLeave(_)
        )
    }

    /// Whether a receiver in epoch `current` should drop this message
    pub fn is_stale(&self, current: u32) -> bool {
        match self.stage_seq() {
            Some(seq) => seq != current && !self.is_epoch_transition(),
            None => false,
        }
    }

    pub fn direction(&self) -> MessageDirection {
        match self {
            Self::Input(_)
            | Self::InputBatch(_)
            | Self::Ack(_)
            | Self::Ping(_)
            | Self::StageReady(_)
            | Self::SnapshotRequest(_) => MessageDirection::ClientToHost,
            Self::Frame(_)
            | Self::FrameBatch(_)
            | Self::StageSync(_)
            | Self::Snapshot(_)
            | Self::Pong(_)
            | Self::Start(_)
            | Self::PlayerJoin(_)
            | Self::PlayerLeave(_)
            | Self::RoomUpdate(_)
            | Self::Kick(_)
            | Self::MatchEnd => MessageDirection::HostToClient,
            Self::PlayerProfile(_) | Self::Chat(_) => MessageDirection::Either,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::InputBatch(_) => "input_batch",
            Self::Ack(_) => "ack",
            Self::Ping(_) => "ping",
            Self::StageReady(_) => "stage_ready",
            Self::SnapshotRequest(_) => "snapshot_request",
            Self::Frame(_) => "frame",
            Self::FrameBatch(_) => "frame_batch",
            Self::StageSync(_) => "stage_sync",
            Self::Snapshot(_) => "snapshot",
            Self::Pong(_) => "pong",
            Self::Start(_) => "start",
            Self::PlayerJoin(_) => "player_join",
            Self::PlayerLeave(_) => "player_leave",
            Self::PlayerProfile(_) => "player_profile",
            Self::Chat(_) => "chat",
            Self::RoomUpdate(_) => "room_update",
            Self::Kick(_) => "kick",
            Self::MatchEnd => "match_end",
        }
    }

    /// Serialize message to bytes with framing
    ///
    /// Returns wire format: [RSYN][version:u16][length:u32][payload...]
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = bitcode::encode(self);
        let mut bytes = Vec::with_capacity(WIRE_HEADER_SIZE + payload.len());

        bytes.extend_from_slice(&WIRE_MAGIC);
        bytes.extend_from_slice(&WIRE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);

        bytes
    }

    /// Deserialize message from framed bytes
    ///
    /// Validates magic, version, and length before decoding payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < WIRE_HEADER_SIZE {
            return Err(WireError::TooShort);
        }

        if bytes[0..4] != WIRE_MAGIC {
            return Err(WireError::InvalidMagic);
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != WIRE_VERSION {
            return Err(WireError::VersionMismatch {
                expected: WIRE_VERSION,
                got: version,
            });
        }

        let length = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        if bytes.len() < WIRE_HEADER_SIZE + length {
            return Err(WireError::IncompletePayload {
                expected: length,
                got: bytes.len() - WIRE_HEADER_SIZE,
            });
        }

        let payload = &bytes[WIRE_HEADER_SIZE..WIRE_HEADER_SIZE + length];
        bitcode::decode(payload).map_err(|e| WireError::DecodeFailed(e.to_string()))
    }
}

/// Errors that can occur when decoding framed messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Message too short for header
    #[error("message too short for wire header")]
    TooShort,
    /// Invalid magic bytes
    #[error("invalid wire magic bytes")]
    InvalidMagic,
    /// Protocol version mismatch
    #[error("wire version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u16, got: u16 },
    /// Payload incomplete
    #[error("incomplete payload: expected {expected} bytes, got {got}")]
    IncompletePayload { expected: usize, got: usize },
    /// Bitcode decode failed
    #[error("failed to decode message: {0}")]
    DecodeFailed(String),
}
