//! Shared types for rollsync netplay.
//!
//! Everything in this crate crosses the wire or is agreed on by every
//! participant of a match: frame numbers, player and stage identifiers,
//! the quantized per-frame input sample, and lobby metadata.

pub mod ids;
pub mod input;
pub mod netplay;

pub use ids::{Frame, PlayerId, StageId};
pub use input::{QuantizedInput, dequantize_axis, quantize_axis};
pub use netplay::{
    MAX_CHAT_LEN, MAX_PLAYER_NAME_LEN, PlayerProfile, RoomInfo, StageSelection, sanitize_text,
};
