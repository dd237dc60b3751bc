//! Host-side message handling, roster management and frame distribution

use std::collections::BTreeSet;
use std::time::Instant;

use rollsync_shared::{Frame, PlayerId, PlayerProfile, QuantizedInput, RoomInfo, sanitize_text};

use super::{NetplayCoordinator, fallback_name};
use crate::net::protocol::{
    ChatMessage, FrameBatch, Kick, NetMessage, PlayerJoin, PlayerLeave, ProfileUpdate, RoomUpdate,
    Snapshot, SnapshotRequest, Start,
};
use crate::net::transport::Transport;
use crate::netplay::events::{NetplayError, NetplayEvent};
use crate::netplay::handshake::HandshakeEvent;
use crate::netplay::state::{ClientState, PlayerSlot, Role};
use crate::simulation::Simulation;

impl<S: Simulation, T: Transport> NetplayCoordinator<S, T> {
    /// Host: message from client `from`
    pub(super) fn handle_client_message(
        &mut self,
        from: PlayerId,
        message: NetMessage,
        now: Instant,
    ) -> Result<(), NetplayError> {
        if !self.players.contains_key(&from) {
            tracing::debug!(from = %from, kind = message.kind(), "Message from unknown player");
            return Ok(());
        }

        match message {
            NetMessage::Input(input) => {
                if input.player != from {
                    tracing::warn!(
                        from = %from,
                        claimed = %input.player,
                        "Input for another player"
                    );
                    return Ok(());
                }
                self.handle_client_inputs(from, input.last_ack, [(input.frame, input.input)], now);
            }
            NetMessage::InputBatch(batch) => {
                if batch.player != from {
                    tracing::warn!(
                        from = %from,
                        claimed = %batch.player,
                        "Input batch for another player"
                    );
                    return Ok(());
                }
                let entries = batch.entries.iter().map(|entry| (entry.frame, entry.input));
                self.handle_client_inputs(from, batch.last_ack, entries, now);
            }
            NetMessage::Ack(ack) => {
                let current = self.session.frame();
                if let Some(client) = self.state.clients.get_mut(&from) {
                    let acked = ack.frame.min(current);
                    client.last_acked_host_frame = client.last_acked_host_frame.max(Some(acked));
                }
            }
            NetMessage::Ping(id) => self.send_to(from, &NetMessage::Pong(id)),
            NetMessage::StageReady(ready) => {
                tracing::debug!(player = %from, stage = %ready.stage_id, "Client stage ready");
                self.apply_handshake(
                    HandshakeEvent::StageReady {
                        player: from,
                        stage_id: ready.stage_id,
                    },
                    now,
                );
            }
            NetMessage::SnapshotRequest(request) => {
                self.handle_snapshot_request(from, request, now);
            }
            NetMessage::PlayerProfile(update) => {
                self.handle_profile_update(from, update.profile, now);
            }
            NetMessage::Chat(chat) => self.handle_chat(from, &chat.text, now),
            other => {
                tracing::trace!(from = %from, kind = other.kind(), "Ignoring message");
            }
        }
        Ok(())
    }

    /// Record client inputs and schedule a rollback for corrections
    fn handle_client_inputs(
        &mut self,
        from: PlayerId,
        last_ack: Option<Frame>,
        entries: impl IntoIterator<Item = (Frame, QuantizedInput)>,
        now: Instant,
    ) {
        let current = self.session.frame();
        let Some(client) = self.state.clients.get_mut(&from) else {
            return;
        };
        if let Some(ack) = last_ack {
            client.last_acked_host_frame =
                client.last_acked_host_frame.max(Some(ack.min(current)));
        }

        // Spectators have nothing to simulate
        if !self.players.get(&from).is_some_and(PlayerSlot::is_active) {
            return;
        }

        let window = &self.config.inputs;
        let max_behind = window.max_behind.min(self.config.session.max_rollback_frames);
        let min_frame = current.saturating_sub(max_behind);
        let max_frame = current.saturating_add(window.max_ahead);
        let host_max_rollback = window.host_max_rollback;

        let mut too_old = false;
        for (frame, input) in entries {
            if frame < min_frame || frame > max_frame {
                tracing::trace!(player = %from, frame, current, "Input outside window");
                continue;
            }
            if frame <= current && current - frame > host_max_rollback {
                too_old = true;
                continue;
            }
            if let Some(client) = self.state.clients.get_mut(&from) {
                client.last_acked_client_input = client.last_acked_client_input.max(Some(frame));
            }

            let input = input.normalized();
            if self.state.ledger.record(frame, from, input) && frame <= current {
                let simulated = self
                    .session
                    .inputs_at(frame)
                    .and_then(|inputs| inputs.get(from))
                    .copied();
                if simulated != Some(input) {
                    self.state.pending_rollback = Some(
                        self.state
                            .pending_rollback
                            .map_or(frame, |pending| pending.min(frame)),
                    );
                    self.state.pending_rollback_players.insert(from);
                }
            }
        }

        if too_old {
            let cooldown = self.config.snapshots.host_push_cooldown();
            let Some(client) = self.state.clients.get_mut(&from) else {
                return;
            };
            if client
                .last_snapshot_at
                .is_some_and(|at| now.saturating_duration_since(at) < cooldown)
            {
                return;
            }
            client.last_snapshot_at = Some(now);
            tracing::debug!(player = %from, current, "Inputs too old to roll back, resyncing");
            self.send_snapshot(from, current);
        }
    }

    fn handle_snapshot_request(&mut self, from: PlayerId, request: SnapshotRequest, now: Instant) {
        let cooldown = self.config.snapshots.lag_cooldown();
        let Some(client) = self.state.clients.get_mut(&from) else {
            return;
        };
        if client
            .last_snapshot_request_at
            .is_some_and(|at| now.saturating_duration_since(at) < cooldown)
        {
            tracing::trace!(player = %from, "Snapshot request rate limited");
            return;
        }
        client.last_snapshot_request_at = Some(now);

        let current = self.session.frame();
        let oldest = current.saturating_sub(self.config.session.max_rollback_frames);
        let frame = request.frame.clamp(oldest, current);
        tracing::debug!(
            player = %from,
            requested = request.frame,
            frame,
            reason = request.reason.as_str(),
            "Snapshot requested"
        );
        self.send_snapshot(from, frame);
    }

    fn handle_profile_update(&mut self, from: PlayerId, profile: PlayerProfile, now: Instant) {
        if !self.allow_profile(from, now) {
            tracing::trace!(player = %from, "Profile update rate limited");
            return;
        }
        let profile = profile.sanitized(&fallback_name(from));
        if let Some(slot) = self.players.get_mut(&from) {
            slot.profile = profile.clone();
        }
        self.broadcast(&NetMessage::PlayerProfile(ProfileUpdate {
            player: from,
            profile: profile.clone(),
        }));
        self.events.push(NetplayEvent::ProfileUpdated {
            player: from,
            profile,
        });
    }

    fn handle_chat(&mut self, from: PlayerId, text: &str, now: Instant) {
        let text = sanitize_text(text, self.config.room.chat_max_len);
        if text.is_empty() || !self.allow_chat(from, now) {
            return;
        }
        self.broadcast(&NetMessage::Chat(ChatMessage {
            player: from,
            text: text.clone(),
        }));
        self.events.push(NetplayEvent::Chat { player: from, text });
    }

    /// Send a snapshot at `frame`, or at the current frame when `frame` is
    /// no longer retained
    pub(super) fn send_snapshot(&mut self, player: PlayerId, frame: Frame) {
        let current = self.session.frame();
        let wanted = frame.min(current);
        let (frame, state) = match self.session.state_at(wanted) {
            Some(state) => (wanted, state.clone()),
            None => match self.session.simulation().save_state() {
                Ok(state) => (current, state),
                Err(e) => {
                    tracing::warn!(error = %e, player = %player, "Failed to save snapshot");
                    return;
                }
            },
        };

        tracing::debug!(player = %player, frame, bytes = state.len(), "Sending snapshot");
        let snapshot = Snapshot {
            stage_seq: self.state.stage_seq,
            frame,
            state,
            stage_id: self.state.stage_id,
        };
        self.send_to(player, &NetMessage::Snapshot(snapshot));
    }

    /// Push snapshots to clients too far behind to catch up from frames
    pub(super) fn push_snapshots_to_lagging(&mut self, now: Instant) {
        let current = self.session.frame();
        let cooldown = self.config.snapshots.host_push_cooldown();
        let threshold = self.config.snapshots.host_push_behind_frames;

        let lagging: Vec<PlayerId> = self
            .state
            .clients
            .iter_mut()
            .filter_map(|(&player, client)| {
                let behind = client.frames_behind(current)?;
                let cooled = client
                    .last_snapshot_at
                    .is_none_or(|at| now.saturating_duration_since(at) >= cooldown);
                if behind >= threshold && cooled {
                    client.last_snapshot_at = Some(now);
                    Some(player)
                } else {
                    None
                }
            })
            .collect();

        for player in lagging {
            tracing::debug!(player = %player, current, "Client lagging, pushing snapshot");
            self.send_snapshot(player, current);
        }
    }

    /// Send every client the frames it has not acknowledged, plus bundles
    /// that changed in a rollback
    pub(super) fn resend_frames(&mut self) {
        let current = self.session.frame();
        let window_start = (current + 1).saturating_sub(self.config.session.max_resend_frames);
        let updates = std::mem::take(&mut self.state.pending_host_updates);
        let stage_seq = self.state.stage_seq;

        let mut batches = Vec::with_capacity(self.state.clients.len());
        for (&player, client) in &self.state.clients {
            let start = client
                .last_acked_host_frame
                .map_or(0, |acked| acked.min(current) + 1)
                .max(window_start);
            let frames: BTreeSet<Frame> = updates
                .iter()
                .copied()
                .chain(start..=current)
                .collect();
            let bundles: Vec<_> = frames
                .iter()
                .filter_map(|frame| self.state.host_frames.get(frame).cloned())
                .collect();
            if bundles.is_empty() {
                continue;
            }
            batches.push((
                player,
                NetMessage::FrameBatch(FrameBatch {
                    stage_seq,
                    last_ack: client.last_acked_client_input,
                    frames: bundles,
                }),
            ));
        }

        for (player, batch) in batches {
            self.send_to(player, &batch);
        }
    }

    /// Re-send `Start` to clients that have not reported ready
    pub(super) fn resend_start(&mut self, now: Instant) {
        let Some(selection) = self.selection.clone() else {
            return;
        };
        let interval = self.config.handshake.resend();
        if self
            .state
            .start_sent_at
            .is_some_and(|at| now.saturating_duration_since(at) < interval)
        {
            return;
        }
        self.state.start_sent_at = Some(now);

        let ready = self.state.handshake.ready_players();
        let waiting: Vec<(PlayerId, bool)> = self
            .players
            .iter()
            .filter(|(id, _)| **id != self.local_id && !ready.contains(*id))
            .map(|(&id, slot)| (id, !slot.is_active()))
            .collect();

        for (player, late_join) in waiting {
            tracing::debug!(player = %player, stage_seq = self.state.stage_seq, "Re-sending start");
            self.send_to(
                player,
                &NetMessage::Start(Start {
                    stage_seq: self.state.stage_seq,
                    selection: selection.clone(),
                    late_join,
                }),
            );
        }
    }

    // ========================================================================
    // Roster
    // ========================================================================

    pub(super) fn handle_peer_connected(&mut self, player: PlayerId, now: Instant) {
        if self.players.contains_key(&player) {
            return;
        }
        if self.players.len() >= self.config.room.max_players {
            tracing::info!(player = %player, "Room full, rejecting player");
            self.send_to(
                player,
                &NetMessage::Kick(Kick {
                    reason: Some("Room is full".to_string()),
                }),
            );
            self.transport.disconnect(player);
            return;
        }

        let stage_seq = self.state.stage_seq;
        let pending_spawn = self.selection.is_some();
        let mut slot = PlayerSlot::new(PlayerProfile::new(fallback_name(player)));
        slot.pending_since = pending_spawn.then_some(stage_seq);
        self.players.insert(player, slot);
        self.state.clients.insert(player, ClientState::default());

        // Existing roster to the newcomer
        let roster: Vec<(PlayerId, bool, PlayerProfile)> = self
            .players
            .iter()
            .filter(|(id, _)| **id != player)
            .map(|(&id, slot)| (id, !slot.is_active(), slot.profile.clone()))
            .collect();
        for (id, pending, _) in &roster {
            self.send_to(
                player,
                &NetMessage::PlayerJoin(PlayerJoin {
                    stage_seq,
                    player: *id,
                    pending_spawn: *pending,
                }),
            );
        }

        self.broadcast(&NetMessage::PlayerJoin(PlayerJoin {
            stage_seq,
            player,
            pending_spawn,
        }));
        self.send_to(
            player,
            &NetMessage::RoomUpdate(RoomUpdate {
                room: self.room.clone(),
            }),
        );
        for (id, _, profile) in roster {
            self.send_to(
                player,
                &NetMessage::PlayerProfile(ProfileUpdate {
                    player: id,
                    profile,
                }),
            );
        }

        if let Some(selection) = self.selection.clone() {
            self.send_to(
                player,
                &NetMessage::Start(Start {
                    stage_seq,
                    selection,
                    late_join: true,
                }),
            );
            let current = self.session.frame();
            if let Some(client) = self.state.clients.get_mut(&player) {
                client.last_snapshot_at = Some(now);
            }
            self.send_snapshot(player, current);
        }

        tracing::info!(player = %player, pending_spawn, "Player joined");
        self.events.push(NetplayEvent::PlayerJoined {
            player,
            pending_spawn,
        });
    }

    /// Drop `player` from the roster and tell everyone
    pub(super) fn remove_player(&mut self, player: PlayerId, now: Instant) {
        if player == self.local_id || self.players.remove(&player).is_none() {
            return;
        }
        self.state.clients.remove(&player);
        self.state.pending_rollback_players.remove(&player);
        self.state.ledger.forget(player);
        self.chat_limits.remove(&player);
        self.profile_limits.remove(&player);

        self.broadcast(&NetMessage::PlayerLeave(PlayerLeave { player }));
        let expected = self.expected_players();
        self.apply_handshake(HandshakeEvent::ExpectedPlayersChanged(expected), now);

        tracing::info!(player = %player, "Player left");
        self.events.push(NetplayEvent::PlayerLeft { player });
    }

    /// Host: remove `player` from the room
    pub fn kick(
        &mut self,
        player: PlayerId,
        reason: Option<String>,
        now: Instant,
    ) -> Result<(), NetplayError> {
        if self.role != Role::Host {
            return Err(NetplayError::NotHost);
        }
        if player == self.local_id || !self.players.contains_key(&player) {
            return Ok(());
        }
        self.send_to(player, &NetMessage::Kick(Kick { reason }));
        self.transport.disconnect(player);
        self.remove_player(player, now);
        Ok(())
    }

    /// Host: change room settings and broadcast them
    pub fn set_room(&mut self, room: RoomInfo) -> Result<(), NetplayError> {
        if self.role != Role::Host {
            return Err(NetplayError::NotHost);
        }
        self.room = room;
        self.broadcast(&NetMessage::RoomUpdate(RoomUpdate {
            room: self.room.clone(),
        }));
        self.events.push(NetplayEvent::RoomUpdated(self.room.clone()));
        Ok(())
    }
}
