//! Client -> Host protocol messages

use bitcode::{Decode, Encode};
use rollsync_shared::{Frame, PlayerId, QuantizedInput, StageId};

/// Single local input sample
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct InputMessage {
    /// Stage epoch the input belongs to
    pub stage_seq: u32,
    /// Frame the input applies to
    pub frame: Frame,
    /// Sending player (must match the transport peer)
    pub player: PlayerId,
    /// The sample itself
    pub input: QuantizedInput,
    /// Highest host frame the client has received
    pub last_ack: Option<Frame>,
}

/// One entry of an [`InputBatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct InputEntry {
    pub frame: Frame,
    pub input: QuantizedInput,
}

/// Every unacknowledged local input inside the resend window.
///
/// Clients send this once per simulated tick instead of individual
/// [`InputMessage`]s, so a lost packet is repaired by the next one.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct InputBatch {
    pub stage_seq: u32,
    /// Sending player (must match the transport peer)
    pub player: PlayerId,
    /// Highest host frame the client has received
    pub last_ack: Option<Frame>,
    /// Inputs in ascending frame order
    pub entries: Vec<InputEntry>,
}

/// Acknowledges host frames when there is no input to piggyback on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Ack {
    pub stage_seq: u32,
    /// Highest host frame received
    pub frame: Frame,
}

/// Client finished loading the stage for this epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct StageReady {
    pub stage_seq: u32,
    pub stage_id: StageId,
}

/// Why a client asks for a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum SnapshotReason {
    /// Local hash disagreed with the host's authoritative hash
    Mismatch,
    /// Client fell too far behind (or could not roll back far enough)
    Lag,
}

impl SnapshotReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mismatch => "mismatch",
            Self::Lag => "lag",
        }
    }
}

/// Request for a full state snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct SnapshotRequest {
    pub stage_seq: u32,
    /// Frame the client would like the snapshot taken at
    pub frame: Frame,
    pub reason: SnapshotReason,
}
