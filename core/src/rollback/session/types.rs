//! Core types for rollback sessions

use rollsync_shared::Frame;

use crate::simulation::SimulationError;

/// Errors returned by [`RollbackSession`](super::RollbackSession)
#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    /// The requested frame is no longer (or was never) in the history window
    #[error("frame {frame} is outside the rollback window (oldest retained: {oldest:?})")]
    FramePruned { frame: Frame, oldest: Option<Frame> },
    /// The simulation adapter failed to save or load state
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// Counters for rollback activity, for diagnostics overlays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackStats {
    /// Successful `rollback_to` calls
    pub rollbacks: u64,
    /// `rollback_to` calls rejected because the frame was pruned
    pub failed_rollbacks: u64,
    /// Frames advanced with visuals enabled
    pub frames_advanced: u64,
    /// Frames advanced during suppressed resimulation passes
    pub frames_resimulated: u64,
}
