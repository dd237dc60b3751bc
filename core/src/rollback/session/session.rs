//! RollbackSession implementation

use std::collections::BTreeMap;

use rollsync_shared::Frame;

use crate::rollback::config::RollbackConfig;
use crate::rollback::inputs::FrameInputs;
use crate::rollback::state::StateBlob;
use crate::simulation::{Presentation, Simulation};

use super::types::{RollbackError, RollbackStats};

/// Frame-indexed rollback engine.
///
/// Owns the simulation and a sliding window of `(frame -> state)` and
/// `(frame -> inputs)` history. Any frame still in the window can be restored
/// and replayed forward. The session does not enforce monotonic stepping:
/// callers advance to `frame() + 1` in normal play and may jump after a
/// snapshot.
pub struct RollbackSession<S> {
    sim: S,
    config: RollbackConfig,
    states: BTreeMap<Frame, StateBlob>,
    inputs: BTreeMap<Frame, FrameInputs>,
    frame: Frame,
    suppress_visuals: bool,
    stats: RollbackStats,
}

impl<S: Simulation> RollbackSession<S> {
    /// Create a session around `sim`. Call [`prime`](Self::prime) before
    /// advancing.
    pub fn new(sim: S, config: RollbackConfig) -> Self {
        Self {
            sim,
            config,
            states: BTreeMap::new(),
            inputs: BTreeMap::new(),
            frame: 0,
            suppress_visuals: false,
            stats: RollbackStats::default(),
        }
    }

    /// Seed history at `frame` with the simulation's current state.
    ///
    /// This is the starting point for any later rollback. Existing history
    /// inside the window is kept.
    pub fn prime(&mut self, frame: Frame) -> Result<(), RollbackError> {
        let state = self.sim.save_state()?;
        self.frame = frame;
        self.states.insert(frame, state);
        self.inputs.insert(frame, FrameInputs::new());
        self.trim_history(frame);
        Ok(())
    }

    /// Discard all history and prime at `frame`.
    pub fn reset(&mut self, frame: Frame) -> Result<(), RollbackError> {
        self.states.clear();
        self.inputs.clear();
        self.prime(frame)
    }

    /// Advance the simulation one tick with `inputs` and record the result
    /// at `frame`.
    pub fn advance_to(&mut self, frame: Frame, inputs: FrameInputs) -> Result<(), RollbackError> {
        let presentation = if self.suppress_visuals {
            self.stats.frames_resimulated += 1;
            Presentation::Suppressed
        } else {
            self.stats.frames_advanced += 1;
            Presentation::Visible
        };
        self.sim.advance_frame(&inputs, presentation);
        self.frame = frame;
        self.inputs.insert(frame, inputs);
        let state = self.sim.save_state()?;
        self.states.insert(frame, state);
        self.trim_history(frame);
        Ok(())
    }

    /// Restore the state recorded at `frame`.
    ///
    /// Fails without touching the simulation when `frame` has been pruned.
    /// Later history entries are left in place and are overwritten as the
    /// caller resimulates forward.
    pub fn rollback_to(&mut self, frame: Frame) -> Result<(), RollbackError> {
        let Some(state) = self.states.get(&frame) else {
            self.stats.failed_rollbacks += 1;
            return Err(RollbackError::FramePruned {
                frame,
                oldest: self.oldest_frame(),
            });
        };
        self.sim.load_state(state)?;
        self.frame = frame;
        self.stats.rollbacks += 1;
        Ok(())
    }

    /// State recorded at `frame`
    pub fn state_at(&self, frame: Frame) -> Option<&StateBlob> {
        self.states.get(&frame)
    }

    /// Inputs recorded at `frame`
    pub fn inputs_at(&self, frame: Frame) -> Option<&FrameInputs> {
        self.inputs.get(&frame)
    }

    /// Last frame advanced to (or rolled back to)
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Oldest frame that can still be rolled back to
    pub fn oldest_frame(&self) -> Option<Frame> {
        self.states.keys().next().copied()
    }

    pub fn max_rollback_frames(&self) -> u32 {
        self.config.max_rollback_frames
    }

    /// Mark subsequent advances as resimulation (no presentation side effects)
    pub fn set_suppress_visuals(&mut self, suppress: bool) {
        self.suppress_visuals = suppress;
    }

    pub fn suppress_visuals(&self) -> bool {
        self.suppress_visuals
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    /// Mutable access to the simulation.
    ///
    /// Mutating state here bypasses history; re-prime afterwards.
    pub fn simulation_mut(&mut self) -> &mut S {
        &mut self.sim
    }

    /// Hash of the current simulation state
    pub fn hash(&self) -> u32 {
        self.sim.hash()
    }

    pub fn stats(&self) -> RollbackStats {
        self.stats
    }

    /// Drop history older than `frame - max_rollback_frames`
    fn trim_history(&mut self, frame: Frame) {
        let min_frame = self.config.floor(frame);
        self.states = self.states.split_off(&min_frame);
        self.inputs = self.inputs.split_off(&min_frame);
    }
}
