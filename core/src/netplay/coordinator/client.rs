//! Client-side message handling, input upload and snapshot recovery

use std::time::Instant;

use rollsync_shared::{Frame, PlayerProfile};

use super::{NetplayCoordinator, fallback_name};
use crate::net::protocol::{
    Ack, FrameBundle, InputBatch, InputEntry, NetMessage, PlayerJoin, Snapshot, SnapshotReason,
    SnapshotRequest, Start,
};
use crate::net::transport::Transport;
use crate::netplay::events::{NetplayError, NetplayEvent};
use crate::netplay::handshake::HandshakeEvent;
use crate::netplay::state::PlayerSlot;
use crate::simulation::Simulation;

impl<S: Simulation, T: Transport> NetplayCoordinator<S, T> {
    /// Client: message from the host
    pub(super) fn handle_host_message(
        &mut self,
        message: NetMessage,
        now: Instant,
    ) -> Result<(), NetplayError> {
        match message {
            NetMessage::Pong(id) => {
                if let Some(rtt) = self.state.pings.complete(id, now) {
                    tracing::trace!(rtt_ms = rtt.as_millis() as u64, "Pong");
                }
            }
            NetMessage::StageSync(sync) => {
                self.apply_handshake(
                    HandshakeEvent::StageSync {
                        stage_id: sync.stage_id,
                        frame: sync.frame,
                    },
                    now,
                );
            }
            NetMessage::Frame(bundle) => {
                let last_ack = bundle.last_ack;
                self.handle_frames(last_ack, vec![bundle], now)?;
            }
            NetMessage::FrameBatch(batch) => self.handle_frames(batch.last_ack, batch.frames, now)?,
            NetMessage::Snapshot(snapshot) => self.handle_snapshot(snapshot, now)?,
            NetMessage::Start(start) => self.handle_start(start),
            NetMessage::PlayerJoin(join) => self.handle_player_join(join),
            NetMessage::PlayerLeave(leave) => {
                if leave.player != self.local_id && self.players.remove(&leave.player).is_some() {
                    self.state.ledger.forget(leave.player);
                    tracing::info!(player = %leave.player, "Player left");
                    self.events.push(NetplayEvent::PlayerLeft {
                        player: leave.player,
                    });
                }
            }
            NetMessage::PlayerProfile(update) => {
                let profile = update.profile.sanitized(&fallback_name(update.player));
                let Some(slot) = self.players.get_mut(&update.player) else {
                    return Ok(());
                };
                slot.profile = profile.clone();
                self.events.push(NetplayEvent::ProfileUpdated {
                    player: update.player,
                    profile,
                });
            }
            NetMessage::Chat(chat) => {
                self.events.push(NetplayEvent::Chat {
                    player: chat.player,
                    text: chat.text,
                });
            }
            NetMessage::RoomUpdate(update) => {
                self.room = update.room.clone();
                self.events.push(NetplayEvent::RoomUpdated(update.room));
            }
            NetMessage::Kick(kick) => {
                tracing::warn!(reason = ?kick.reason, "Kicked by host");
                self.transport.disconnect(self.host_id);
                self.return_to_lobby();
                self.events.push(NetplayEvent::Kicked { reason: kick.reason });
            }
            NetMessage::MatchEnd => {
                self.return_to_lobby();
                self.events.push(NetplayEvent::MatchEnded);
            }
            other => {
                tracing::trace!(kind = other.kind(), "Ignoring message");
            }
        }
        Ok(())
    }

    fn handle_start(&mut self, start: Start) {
        if start.stage_seq == self.state.stage_seq
            && self.selection.as_ref() == Some(&start.selection)
        {
            tracing::trace!(stage_seq = start.stage_seq, "Duplicate start");
            return;
        }

        let stage_seq = start.stage_seq;
        if start.late_join
            && let Some(slot) = self.players.get_mut(&self.local_id)
        {
            slot.pending_since = Some(stage_seq);
        }
        for slot in self.players.values_mut() {
            if slot.pending_since.is_some_and(|since| since != stage_seq) {
                slot.pending_since = None;
            }
        }

        self.selection = Some(start.selection.clone());
        self.state = self.fresh_state(stage_seq);

        tracing::info!(
            stage_seq,
            stage = %start.selection.stage_id,
            late_join = start.late_join,
            "Stage starting"
        );
        self.events.push(NetplayEvent::StageStarting {
            stage_seq,
            selection: start.selection,
            late_join: start.late_join,
        });
    }

    fn handle_player_join(&mut self, join: PlayerJoin) {
        let pending_since = join.pending_spawn.then_some(join.stage_seq);
        match self.players.get_mut(&join.player) {
            Some(slot) => slot.pending_since = pending_since,
            None => {
                let mut slot = PlayerSlot::new(PlayerProfile::new(fallback_name(join.player)));
                slot.pending_since = pending_since;
                self.players.insert(join.player, slot);
                tracing::info!(
                    player = %join.player,
                    pending_spawn = join.pending_spawn,
                    "Player joined"
                );
                self.events.push(NetplayEvent::PlayerJoined {
                    player: join.player,
                    pending_spawn: join.pending_spawn,
                });
            }
        }
    }

    /// Host handshake finished at host frame `frame`
    pub(super) fn on_stage_synced(&mut self, frame: Frame, now: Instant) {
        self.state.last_received_host_frame = frame;
        self.state.last_host_frame_at = Some(now);
        self.state.awaiting_snapshot = false;
        self.state.lag_behind_since = None;
        self.state.last_acked_local_frame = Some(0);

        if frame > self.session.frame() {
            self.request_snapshot_at(SnapshotReason::Lag, Some(frame), now);
        }

        let stage_seq = self.state.stage_seq;
        tracing::info!(stage_seq, frame, "Stage synced");
        self.events.push(NetplayEvent::StageSynced { stage_seq, frame });
    }

    /// Record host frames, roll back on corrections and check hash claims
    fn handle_frames(
        &mut self,
        last_ack: Option<Frame>,
        frames: Vec<FrameBundle>,
        now: Instant,
    ) -> Result<(), NetplayError> {
        if !self.state.handshake.is_synced() {
            tracing::trace!(frames = frames.len(), "Frames before stage sync");
            return Ok(());
        }

        if let Some(acked) = last_ack {
            let state = &mut self.state;
            state.last_acked_local_frame = state.last_acked_local_frame.max(Some(acked));
            let unacked = acked.saturating_add(1);
            state.pending_local_inputs = state.pending_local_inputs.split_off(&unacked);
        }

        let current = self.session.frame();
        let mut earliest: Option<Frame> = None;
        for bundle in &frames {
            self.state.last_received_host_frame =
                self.state.last_received_host_frame.max(bundle.frame);
            for entry in &bundle.inputs {
                if entry.player == self.local_id
                    || !self.players.get(&entry.player).is_some_and(PlayerSlot::is_active)
                {
                    continue;
                }
                let input = entry.input.normalized();
                let changed = self.state.ledger.record(bundle.frame, entry.player, input);
                if !changed || bundle.frame > current {
                    continue;
                }
                let simulated = self
                    .session
                    .inputs_at(bundle.frame)
                    .and_then(|inputs| inputs.get(entry.player))
                    .copied();
                if simulated != Some(input) {
                    earliest = Some(earliest.map_or(bundle.frame, |frame| frame.min(bundle.frame)));
                }
            }
        }
        self.state.last_host_frame_at = Some(now);

        if let Some(start) = earliest
            && !self.rollback_and_resim(start)?
        {
            tracing::debug!(start, current, "Correction outside rollback window");
            self.request_snapshot_at(SnapshotReason::Lag, None, now);
        }

        for claim in frames.iter().filter_map(|bundle| bundle.hash) {
            if self.state.expected_hashes.insert(claim.frame, claim.hash) == Some(claim.hash) {
                continue;
            }
            if let Some(local) = self.state.hash_at(claim.frame)
                && local != claim.hash
            {
                self.report_desync(claim.frame, local, claim.hash, now);
            }
        }

        let behind = self.state.last_received_host_frame.saturating_sub(current);
        if behind > self.config.session.max_rollback_frames {
            self.request_snapshot_at(SnapshotReason::Lag, None, now);
        }
        Ok(())
    }

    /// Local hash disagreed with the host
    pub(super) fn report_desync(&mut self, frame: Frame, local: u32, remote: u32, now: Instant) {
        tracing::warn!(frame, local, remote, "Desync detected");
        self.events.push(NetplayEvent::DesyncDetected { frame, local, remote });
        self.request_snapshot_at(SnapshotReason::Mismatch, Some(frame), now);
    }

    fn handle_snapshot(&mut self, snapshot: Snapshot, now: Instant) -> Result<(), NetplayError> {
        if !snapshot.state.verify() {
            tracing::warn!(frame = snapshot.frame, "Discarding snapshot with bad checksum");
            return Ok(());
        }
        self.state.last_received_host_frame =
            self.state.last_received_host_frame.max(snapshot.frame);
        self.state.last_host_frame_at = Some(now);
        self.state.pending_snapshot = Some(snapshot);
        self.try_apply_pending_snapshot()
    }

    /// Apply the held snapshot once its stage is loaded
    pub(super) fn try_apply_pending_snapshot(&mut self) -> Result<(), NetplayError> {
        let Some(snapshot) = self.state.pending_snapshot.take() else {
            return Ok(());
        };
        if snapshot.stage_seq != self.state.stage_seq {
            tracing::debug!(
                snapshot_seq = snapshot.stage_seq,
                stage_seq = self.state.stage_seq,
                "Dropping stale snapshot"
            );
            return Ok(());
        }
        let Some(loaded) = self.state.stage_id else {
            self.state.pending_snapshot = Some(snapshot);
            return Ok(());
        };
        if snapshot.stage_id.is_some_and(|stage| stage != loaded) {
            self.state.pending_snapshot = Some(snapshot);
            return Ok(());
        }

        let target = self.session.frame();
        if let Err(e) = self.session.simulation_mut().load_state(&snapshot.state) {
            tracing::warn!(error = %e, frame = snapshot.frame, "Failed to load snapshot");
            return Ok(());
        }
        let frame = snapshot.frame;
        self.session.reset(frame)?;
        self.state.last_received_host_frame = self.state.last_received_host_frame.max(frame);
        self.state.awaiting_snapshot = false;
        self.state.hash_history.clear();
        self.state.expected_hashes = self.state.expected_hashes.split_off(&(frame + 1));

        if target > frame {
            self.resimulate(frame + 1, target)?;
        }
        self.state.lag_behind_since = None;

        tracing::info!(frame, resimulated = target.saturating_sub(frame), "Snapshot applied");
        self.events.push(NetplayEvent::SnapshotApplied { frame });
        Ok(())
    }

    /// Ask the host for a snapshot at `frame` (default: current frame),
    /// subject to the reason's cooldown
    pub(super) fn request_snapshot_at(
        &mut self,
        reason: SnapshotReason,
        frame: Option<Frame>,
        now: Instant,
    ) -> bool {
        let cooldown = match reason {
            SnapshotReason::Mismatch => self.config.snapshots.mismatch_cooldown(),
            SnapshotReason::Lag => self.config.snapshots.lag_cooldown(),
        };
        if self
            .state
            .last_snapshot_request_at
            .is_some_and(|at| now.saturating_duration_since(at) < cooldown)
        {
            return false;
        }
        self.state.last_snapshot_request_at = Some(now);
        self.state.awaiting_snapshot = true;

        let frame = frame.unwrap_or_else(|| self.session.frame());
        tracing::debug!(frame, reason = reason.as_str(), "Requesting snapshot");
        self.send_to(
            self.host_id,
            &NetMessage::SnapshotRequest(SnapshotRequest {
                stage_seq: self.state.stage_seq,
                frame,
                reason,
            }),
        );
        self.events.push(NetplayEvent::SnapshotRequested { frame, reason });
        true
    }

    /// Upload unacknowledged local inputs inside the resend window, or an
    /// ack when there are none
    pub(super) fn send_input_buffer(&mut self) {
        let end = self.session.frame();
        let start = self.state.last_acked_local_frame.map_or(0, |acked| acked + 1);
        let stage_seq = self.state.stage_seq;
        let last_received = self.state.last_received_host_frame;

        let first = start.max((end + 1).saturating_sub(self.config.session.max_resend_frames));
        let entries: Vec<InputEntry> = if first <= end {
            self.state
                .pending_local_inputs
                .range(first..=end)
                .map(|(&frame, &input)| InputEntry { frame, input })
                .collect()
        } else {
            Vec::new()
        };

        let message = if entries.is_empty() {
            NetMessage::Ack(Ack {
                stage_seq,
                frame: last_received,
            })
        } else {
            NetMessage::InputBatch(InputBatch {
                stage_seq,
                player: self.local_id,
                last_ack: Some(last_received),
                entries,
            })
        };
        self.send_to(self.host_id, &message);
    }

    /// Ping, host stall and lag fuse checks, once per tick
    pub(super) fn client_maintenance(&mut self, drift: f64, now: Instant) {
        let pacing = &self.config.pacing;
        let ping_interval = pacing.ping_interval();
        let host_stall = pacing.host_stall();
        let lag_fuse = pacing.lag_fuse();
        let lag_fuse_frames = pacing.lag_fuse_frames;

        if self.state.pings.due(now, ping_interval) {
            let id = self.state.pings.begin(now);
            self.send_to(self.host_id, &NetMessage::Ping(id));
        }

        let last_received = self.state.last_received_host_frame;
        let stalled = self
            .state
            .last_host_frame_at
            .is_some_and(|at| now.saturating_duration_since(at) >= host_stall);
        if stalled && self.request_snapshot_at(SnapshotReason::Lag, Some(last_received), now) {
            tracing::debug!(last_received, "Host frames stalled");
        }

        if drift > f64::from(lag_fuse_frames) {
            let since = *self.state.lag_behind_since.get_or_insert(now);
            if now.saturating_duration_since(since) >= lag_fuse
                && self.request_snapshot_at(SnapshotReason::Lag, Some(last_received), now)
            {
                tracing::debug!(drift, "Lag fuse tripped");
            }
        } else {
            self.state.lag_behind_since = None;
        }
    }
}
