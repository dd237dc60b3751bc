//! Host -> Client protocol messages

use bitcode::{Decode, Encode};
use rollsync_shared::{Frame, PlayerId, QuantizedInput, StageId, StageSelection};

use crate::rollback::{FrameInputs, StateBlob};

/// One player's input inside a [`FrameBundle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct PlayerInput {
    pub player: PlayerId,
    pub input: QuantizedInput,
}

/// Authoritative state hash piggybacked on a frame bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct HashClaim {
    /// Frame the hash was taken at
    pub frame: Frame,
    pub hash: u32,
}

/// Inputs the host simulated for one frame
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct FrameBundle {
    pub stage_seq: u32,
    pub frame: Frame,
    /// Every active player's input, in player order
    pub inputs: Vec<PlayerInput>,
    /// Authoritative hash for an earlier frame, if one is due
    pub hash: Option<HashClaim>,
    /// Highest input frame the host has received from the recipient
    pub last_ack: Option<Frame>,
}

impl FrameBundle {
    pub fn new(stage_seq: u32, frame: Frame, inputs: &FrameInputs) -> Self {
        Self {
            stage_seq,
            frame,
            inputs: inputs
                .iter()
                .map(|(player, input)| PlayerInput { player, input })
                .collect(),
            hash: None,
            last_ack: None,
        }
    }

    /// Inputs as a [`FrameInputs`] set
    pub fn frame_inputs(&self) -> FrameInputs {
        self.inputs
            .iter()
            .map(|entry| (entry.player, entry.input))
            .collect()
    }
}

/// Resend window of frame bundles for one client
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct FrameBatch {
    pub stage_seq: u32,
    /// Highest input frame the host has received from the recipient
    pub last_ack: Option<Frame>,
    /// Bundles in ascending frame order
    pub frames: Vec<FrameBundle>,
}

/// Stage handshake complete: simulation starts from `frame`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct StageSync {
    pub stage_seq: u32,
    pub stage_id: StageId,
    /// Host frame at the moment of sync
    pub frame: Frame,
}

/// Full state at `frame`
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Snapshot {
    pub stage_seq: u32,
    pub frame: Frame,
    pub state: StateBlob,
    /// Stage the state belongs to
    pub stage_id: Option<StageId>,
}

/// Opens a new stage epoch
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Start {
    pub stage_seq: u32,
    pub selection: StageSelection,
    /// Recipient joined mid-stage and spawns at the next stage
    pub late_join: bool,
}
