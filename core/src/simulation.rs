//! Simulation adapter
//!
//! The rollback engine and the netplay coordinator never look inside the
//! simulation. They drive it through [`Simulation`]: save, load, advance one
//! tick, and hash.

use crate::rollback::{FrameInputs, StateBlob};

/// Whether a tick is presented to the player.
///
/// Resimulation passes run with [`Presentation::Suppressed`]: they still
/// mutate authoritative state but must not trigger audio, particles or other
/// one-shot side effects that were already shown the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    Visible,
    Suppressed,
}

/// Intro countdown exposed by the simulation.
///
/// Clients pace more aggressively while an intro is running so they are in
/// lockstep with the host before players gain control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntroTimer {
    /// Frames left in the intro
    pub remaining: u32,
    /// Total intro length in frames
    pub total: u32,
}

impl IntroTimer {
    pub fn is_running(&self) -> bool {
        self.total > 0 && self.remaining > 0
    }
}

/// Errors reported by a simulation adapter.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// The blob's checksum does not match its contents
    #[error("state blob checksum mismatch (expected {expected:#018x}, got {actual:#018x})")]
    ChecksumMismatch { expected: u64, actual: u64 },
    /// The blob is well-formed but could not be applied
    #[error("failed to load state: {0}")]
    Load(String),
    /// The current state could not be serialized
    #[error("failed to save state: {0}")]
    Save(String),
}

/// Deterministic fixed-tick simulation driven by the rollback engine.
///
/// Implementations must guarantee that advancing from equal state with equal
/// inputs produces bit-identical state on every machine.
pub trait Simulation {
    /// Serialize the complete simulation state.
    fn save_state(&self) -> Result<StateBlob, SimulationError>;

    /// Replace the simulation state with a previously saved blob.
    fn load_state(&mut self, state: &StateBlob) -> Result<(), SimulationError>;

    /// Advance exactly one tick using inputs for every active player.
    fn advance_frame(&mut self, inputs: &FrameInputs, presentation: Presentation);

    /// Structural hash of the current state, used for desync detection.
    fn hash(&self) -> u32;

    /// Intro countdown, if the simulation has one running.
    fn intro(&self) -> Option<IntroTimer> {
        None
    }
}
