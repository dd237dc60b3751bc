//! Stepping, rollback and hash bookkeeping shared by both roles

use std::time::Instant;

use rollsync_shared::{Frame, QuantizedInput};

use super::NetplayCoordinator;
use crate::net::protocol::{FrameBundle, HashClaim};
use crate::net::transport::Transport;
use crate::netplay::events::NetplayError;
use crate::netplay::pacing;
use crate::netplay::state::{PlayerSlot, Role};
use crate::rollback::{FrameInputs, RollbackError};
use crate::simulation::Simulation;

impl<S: Simulation, T: Transport> NetplayCoordinator<S, T> {
    /// Run one simulation tick with the local `input`
    pub(super) fn step(&mut self, input: QuantizedInput, now: Instant) -> Result<(), NetplayError> {
        let current = self.session.frame();

        // Earlier ticks in this call may have used up the slack
        if self.role == Role::Client {
            let drift = self.target_frame(now) - f64::from(current);
            if pacing::is_too_far_ahead(drift, self.config.pacing.client_ahead_slack) {
                self.send_input_buffer();
                return Ok(());
            }
        }

        let frame = current + 1;
        if self.is_local_active() {
            self.state.ledger.record(frame, self.local_id, input);
            if self.role == Role::Client {
                self.state.pending_local_inputs.insert(frame, input);
            }
        }

        let inputs = self.build_inputs(frame);
        self.session.advance_to(frame, inputs.clone())?;

        if let Some(hash) = self.record_hash(frame)
            && let Some(expected) = self.state.expected_hash(frame)
            && expected != hash
        {
            self.report_desync(frame, hash, expected, now);
        }

        if self.role == Role::Host {
            let mut bundle = FrameBundle::new(self.state.stage_seq, frame, &inputs);
            bundle.hash = self.authoritative_hash_claim();
            self.state.host_frames.insert(frame, bundle);
            let retain = self
                .config
                .session
                .max_rollback_frames
                .max(self.config.session.max_resend_frames);
            let oldest = frame.saturating_sub(retain);
            self.state.host_frames = self.state.host_frames.split_off(&oldest);
        }

        self.trim_history(frame);

        match self.role {
            Role::Host => self.resend_frames(),
            Role::Client => self.send_input_buffer(),
        }
        Ok(())
    }

    /// Inputs for every active player at `frame`, filled from the ledger
    fn build_inputs(&self, frame: Frame) -> FrameInputs {
        let active = self
            .players
            .iter()
            .filter(|(_, slot)| slot.is_active())
            .map(|(&id, _)| id);
        self.state.ledger.build(frame, active)
    }

    /// Hash `frame` if it falls on the hash interval
    fn record_hash(&mut self, frame: Frame) -> Option<u32> {
        let interval = self.config.session.hash_interval;
        if interval == 0 || frame % interval != 0 {
            return None;
        }
        let hash = self.session.hash();
        self.state.hash_history.insert(frame, hash);
        Some(hash)
    }

    /// Host: newest hashed frame every active client has sent input for,
    /// if it has not been claimed yet
    fn authoritative_hash_claim(&mut self) -> Option<HashClaim> {
        let interval = self.config.session.hash_interval;
        if interval == 0 {
            return None;
        }

        let mut authoritative = self.session.frame();
        for (player, _) in self
            .players
            .iter()
            .filter(|(id, slot)| **id != self.local_id && slot.is_active())
        {
            let acked = self.state.clients.get(player)?.last_acked_client_input?;
            authoritative = authoritative.min(acked);
        }

        let frame = authoritative - authoritative % interval;
        if self.state.last_auth_hash_frame.is_some_and(|last| frame <= last) {
            return None;
        }
        let hash = self.state.hash_at(frame)?;
        self.state.last_auth_hash_frame = Some(frame);
        Some(HashClaim { frame, hash })
    }

    fn trim_history(&mut self, frame: Frame) {
        self.state
            .trim(frame.saturating_sub(self.config.session.max_rollback_frames));
    }

    /// Restore the state before `start` and replay up to the current frame.
    ///
    /// Returns false when `start - 1` is no longer retained.
    pub(super) fn rollback_and_resim(&mut self, start: Frame) -> Result<bool, NetplayError> {
        let current = self.session.frame();
        let restore = start.saturating_sub(1);
        match self.session.rollback_to(restore) {
            Ok(()) => {}
            Err(RollbackError::FramePruned { frame, oldest }) => {
                tracing::debug!(frame, ?oldest, current, "Rollback target pruned");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::trace!(from = restore, to = current, "Rolling back");
        if current > restore {
            self.resimulate(restore + 1, current)?;
        }
        Ok(true)
    }

    /// Advance `first..=last` from the ledger with visuals suppressed
    pub(super) fn resimulate(&mut self, first: Frame, last: Frame) -> Result<(), NetplayError> {
        let previous = self.session.suppress_visuals();
        self.session.set_suppress_visuals(true);
        let result = self.resimulate_frames(first, last);
        self.session.set_suppress_visuals(previous);
        result
    }

    fn resimulate_frames(&mut self, first: Frame, last: Frame) -> Result<(), NetplayError> {
        for frame in first..=last {
            let inputs = self.build_inputs(frame);
            self.session.advance_to(frame, inputs.clone())?;
            self.record_hash(frame);

            if self.role == Role::Host {
                let mut bundle = FrameBundle::new(self.state.stage_seq, frame, &inputs);
                if let Some(previous) = self.state.host_frames.get(&frame) {
                    bundle.hash = previous.hash;
                    if previous.inputs != bundle.inputs {
                        self.state.pending_host_updates.insert(frame);
                    }
                }
                self.state.host_frames.insert(frame, bundle);
            }

            self.trim_history(frame);
        }
        Ok(())
    }

    /// Host: replay from the earliest corrected input received since the
    /// last tick, resyncing the senders when it is out of reach
    pub(super) fn apply_pending_rollback(&mut self) -> Result<(), NetplayError> {
        let Some(start) = self.state.pending_rollback.take() else {
            return Ok(());
        };
        let players = std::mem::take(&mut self.state.pending_rollback_players);
        if self.rollback_and_resim(start)? {
            return Ok(());
        }

        let current = self.session.frame();
        for player in players {
            if self.players.get(&player).is_some_and(PlayerSlot::is_active) {
                self.send_snapshot(player, current);
            }
        }
        Ok(())
    }
}
