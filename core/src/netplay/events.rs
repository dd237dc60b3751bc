//! Events surfaced to the application and the coordinator's error type

use rollsync_shared::{Frame, PlayerId, PlayerProfile, RoomInfo, StageSelection};

use super::config::ConfigError;
use crate::net::protocol::SnapshotReason;
use crate::rollback::RollbackError;
use crate::simulation::SimulationError;

/// Something the surrounding application should react to.
///
/// Drained with [`NetplayCoordinator::drain_events`](super::NetplayCoordinator::drain_events).
#[derive(Debug, Clone, PartialEq)]
pub enum NetplayEvent {
    /// A stage epoch opened. Load the stage, then call `stage_loaded`.
    StageStarting {
        stage_seq: u32,
        selection: StageSelection,
        /// Local player spectates until the next stage
        late_join: bool,
    },
    /// Handshake completed, simulation is running
    StageSynced { stage_seq: u32, frame: Frame },
    PlayerJoined { player: PlayerId, pending_spawn: bool },
    PlayerLeft { player: PlayerId },
    ProfileUpdated { player: PlayerId, profile: PlayerProfile },
    Chat { player: PlayerId, text: String },
    RoomUpdated(RoomInfo),
    /// Removed by the host
    Kicked { reason: Option<String> },
    /// Host ended the match, back to the lobby
    MatchEnded,
    /// Link to the host went down
    HostLost,
    /// Local hash disagreed with the host's claim
    DesyncDetected { frame: Frame, local: u32, remote: u32 },
    /// A snapshot request went out
    SnapshotRequested { frame: Frame, reason: SnapshotReason },
    /// A host snapshot replaced local state
    SnapshotApplied { frame: Frame },
}

/// Netplay errors.
///
/// Protocol noise (stale messages, late inputs, pruned frames) never shows
/// up here. These are API misuse and adapter failures.
#[derive(Debug, thiserror::Error)]
pub enum NetplayError {
    #[error("operation requires the host role")]
    NotHost,
    #[error("operation requires the client role")]
    NotClient,
    #[error("no stage has been started")]
    NoStage,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Rollback(#[from] RollbackError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// What one [`tick`](super::NetplayCoordinator::tick) call did
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    /// Simulation ticks executed
    pub ticks: u32,
    /// Target frame minus local position, in frames
    pub drift: f64,
    /// Playback rate applied
    pub rate_scale: f64,
}
