//! Lobby and stage metadata exchanged alongside the netcode.
//!
//! None of this affects determinism. The host relays it so every peer shows
//! the same room, names and chat.

use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::ids::StageId;

/// Maximum player name length (in characters)
pub const MAX_PLAYER_NAME_LEN: usize = 32;

/// Maximum chat message length (in characters)
pub const MAX_CHAT_LEN: usize = 200;

/// Stage the host selected for the next epoch.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct StageSelection {
    /// Stage to load
    pub stage_id: StageId,
    /// Course (stage list) the stage belongs to
    pub course: String,
    /// Seed for any deterministic stage randomization
    pub seed: u64,
}

impl StageSelection {
    pub fn new(stage_id: StageId, course: impl Into<String>, seed: u64) -> Self {
        Self {
            stage_id,
            course: course.into(),
            seed,
        }
    }
}

/// Player display profile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct PlayerProfile {
    /// Display name
    pub name: String,
}

impl PlayerProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Profile with its name sanitized, falling back to `fallback` when
    /// nothing printable remains.
    pub fn sanitized(&self, fallback: &str) -> Self {
        let name = sanitize_text(&self.name, MAX_PLAYER_NAME_LEN);
        if name.is_empty() {
            Self::new(fallback)
        } else {
            Self { name }
        }
    }
}

/// Room settings the host broadcasts to every peer.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct RoomInfo {
    /// Room display name
    #[serde(default = "default_room_name")]
    pub name: String,
    /// Maximum players (host included)
    #[serde(default = "default_max_players")]
    pub max_players: u8,
    /// Whether player-player collision is enabled
    #[serde(default = "default_true")]
    pub collision: bool,
}

fn default_room_name() -> String {
    "rollsync".to_string()
}

fn default_max_players() -> u8 {
    8
}

fn default_true() -> bool {
    true
}

impl Default for RoomInfo {
    fn default() -> Self {
        Self {
            name: default_room_name(),
            max_players: default_max_players(),
            collision: true,
        }
    }
}

/// Strip control characters, collapse surrounding whitespace and truncate
/// to `max_chars` characters.
pub fn sanitize_text(text: &str, max_chars: usize) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();
    cleaned.trim().chars().take(max_chars).collect::<String>().trim_end().to_string()
}
