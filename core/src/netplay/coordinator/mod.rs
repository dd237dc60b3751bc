//! Netplay coordinator
//!
//! One [`NetplayCoordinator`] runs one peer's side of a match, as host or
//! client. It owns the [`RollbackSession`], the per-stage [`NetplayState`],
//! the player roster and the transport, and is driven from outside:
//!
//! - [`poll_transport`](NetplayCoordinator::poll_transport) between frames
//!   to process network events
//! - [`tick`](NetplayCoordinator::tick) once per rendered frame with the
//!   elapsed wall-clock time and the local input sample
//!
//! Both calls are synchronous. Message handling never interrupts a tick.

mod client;
mod host;
mod resim;

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use rollsync_shared::{
    Frame, PlayerId, PlayerProfile, QuantizedInput, RoomInfo, StageId, StageSelection,
    sanitize_text,
};

use super::config::NetplayConfig;
use super::events::{NetplayError, NetplayEvent, TickReport};
use super::handshake::{HandshakeEffect, HandshakeEvent, HandshakePhase, StageHandshake};
use super::pacing;
use super::state::{ClientState, NetplayState, PlayerSlot, Role};
use crate::net::protocol::{
    ChatMessage, MessageDirection, NetMessage, ProfileUpdate, SnapshotReason, StageReady,
    StageSync, Start,
};
use crate::net::transport::{Transport, TransportEvent};
use crate::rollback::RollbackSession;
use crate::simulation::Simulation;

/// Display name for a player that has not sent a profile
fn fallback_name(player: PlayerId) -> String {
    format!("Player {}", u32::from(player.0) + 1)
}

/// Host or client side of a rollback netplay match
pub struct NetplayCoordinator<S, T> {
    role: Role,
    local_id: PlayerId,
    host_id: PlayerId,
    config: NetplayConfig,
    session: RollbackSession<S>,
    transport: T,
    players: BTreeMap<PlayerId, PlayerSlot>,
    room: RoomInfo,
    /// Stage of the current epoch, `None` in the lobby
    selection: Option<StageSelection>,
    state: NetplayState,
    chat_limits: HashMap<PlayerId, Instant>,
    profile_limits: HashMap<PlayerId, Instant>,
    events: Vec<NetplayEvent>,
    last_report: TickReport,
}

impl<S: Simulation, T: Transport> NetplayCoordinator<S, T> {
    /// Host a room. The first stage epoch is random so stale traffic from
    /// an earlier room cannot match it.
    pub fn host(
        sim: S,
        transport: T,
        local_id: PlayerId,
        config: NetplayConfig,
    ) -> Result<Self, NetplayError> {
        Self::new(Role::Host, sim, transport, local_id, local_id, config, rand::random())
    }

    /// Join the room hosted by `host_id`
    pub fn client(
        sim: S,
        transport: T,
        local_id: PlayerId,
        host_id: PlayerId,
        config: NetplayConfig,
    ) -> Result<Self, NetplayError> {
        Self::new(Role::Client, sim, transport, local_id, host_id, config, 0)
    }

    fn new(
        role: Role,
        sim: S,
        transport: T,
        local_id: PlayerId,
        host_id: PlayerId,
        config: NetplayConfig,
        stage_seq: u32,
    ) -> Result<Self, NetplayError> {
        config.validate()?;

        let mut session = RollbackSession::new(sim, config.session.rollback_config());
        session.prime(0)?;

        let mut players = BTreeMap::new();
        players.insert(
            local_id,
            PlayerSlot::new(PlayerProfile::new(fallback_name(local_id))),
        );

        let room = RoomInfo {
            max_players: u8::try_from(config.room.max_players).unwrap_or(u8::MAX),
            ..RoomInfo::default()
        };

        let mut coordinator = Self {
            role,
            local_id,
            host_id,
            config,
            session,
            transport,
            players,
            room,
            selection: None,
            state: NetplayState::new(
                role,
                stage_seq,
                StageHandshake::client(local_id, Duration::ZERO),
            ),
            chat_limits: HashMap::new(),
            profile_limits: HashMap::new(),
            events: Vec::new(),
            last_report: TickReport::default(),
        };
        coordinator.state = coordinator.fresh_state(stage_seq);

        tracing::info!(role = role.as_str(), player = %local_id, "Netplay coordinator created");
        Ok(coordinator)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_id(&self) -> PlayerId {
        self.local_id
    }

    pub fn host_id(&self) -> PlayerId {
        self.host_id
    }

    pub fn stage_seq(&self) -> u32 {
        self.state.stage_seq
    }

    pub fn current_frame(&self) -> Frame {
        self.session.frame()
    }

    pub fn handshake(&self) -> HandshakePhase {
        self.state.handshake.phase()
    }

    pub fn is_synced(&self) -> bool {
        self.state.handshake.is_synced()
    }

    /// Room roster, local player included
    pub fn players(&self) -> &BTreeMap<PlayerId, PlayerSlot> {
        &self.players
    }

    pub fn room(&self) -> &RoomInfo {
        &self.room
    }

    /// Stage of the current epoch
    pub fn selection(&self) -> Option<&StageSelection> {
        self.selection.as_ref()
    }

    pub fn config(&self) -> &NetplayConfig {
        &self.config
    }

    pub fn simulation(&self) -> &S {
        self.session.simulation()
    }

    /// Mutable simulation access, e.g. to load a stage before
    /// [`stage_loaded`](Self::stage_loaded).
    pub fn simulation_mut(&mut self) -> &mut S {
        self.session.simulation_mut()
    }

    pub fn session(&self) -> &RollbackSession<S> {
        &self.session
    }

    pub fn state(&self) -> &NetplayState {
        &self.state
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.state.rtt()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Result of the most recent [`tick`](Self::tick)
    pub fn last_report(&self) -> TickReport {
        self.last_report
    }

    /// Take every event raised since the last call
    pub fn drain_events(&mut self) -> Vec<NetplayEvent> {
        std::mem::take(&mut self.events)
    }

    // ========================================================================
    // Stage lifecycle
    // ========================================================================

    /// Host: open a new stage epoch and tell every client to load it
    pub fn start_stage(
        &mut self,
        selection: StageSelection,
        now: Instant,
    ) -> Result<(), NetplayError> {
        if self.role != Role::Host {
            return Err(NetplayError::NotHost);
        }
        let stage_seq = self.state.stage_seq.wrapping_add(1);
        for slot in self.players.values_mut() {
            slot.pending_since = None;
        }
        self.selection = Some(selection.clone());
        self.state = self.fresh_state(stage_seq);
        self.state.start_sent_at = Some(now);

        self.broadcast(&NetMessage::Start(Start {
            stage_seq,
            selection: selection.clone(),
            late_join: false,
        }));

        tracing::info!(
            stage_seq,
            stage = %selection.stage_id,
            course = %selection.course,
            "Stage starting"
        );
        self.events.push(NetplayEvent::StageStarting {
            stage_seq,
            selection,
            late_join: false,
        });
        Ok(())
    }

    /// The stage for the current epoch finished loading locally.
    ///
    /// The simulation must already hold the stage's initial state. History
    /// is re-primed at frame 0 and the handshake begins.
    pub fn stage_loaded(&mut self, stage_id: StageId, now: Instant) -> Result<(), NetplayError> {
        if self.selection.is_none() {
            return Err(NetplayError::NoStage);
        }
        self.state.stage_id = Some(stage_id);
        self.state.accumulator = 0.0;
        self.session.reset(0)?;
        tracing::debug!(stage_seq = self.state.stage_seq, stage = %stage_id, "Stage loaded");

        self.apply_handshake(HandshakeEvent::StageLoaded { stage_id }, now);
        if self.role == Role::Client {
            self.try_apply_pending_snapshot()?;
        }
        Ok(())
    }

    /// Host: end the match for everyone
    pub fn end_match(&mut self) -> Result<(), NetplayError> {
        if self.role != Role::Host {
            return Err(NetplayError::NotHost);
        }
        self.broadcast(&NetMessage::MatchEnd);
        self.return_to_lobby();
        Ok(())
    }

    /// Leave the current stage and discard its netplay state
    pub fn return_to_lobby(&mut self) {
        self.selection = None;
        for slot in self.players.values_mut() {
            slot.pending_since = None;
        }
        self.state = self.fresh_state(self.state.stage_seq);
        tracing::info!(stage_seq = self.state.stage_seq, "Returned to lobby");
    }

    /// Fresh per-stage state. Host client slots are recreated from the roster.
    fn fresh_state(&self, stage_seq: u32) -> NetplayState {
        let handshake = match self.role {
            Role::Host => StageHandshake::host(
                self.local_id,
                self.selection.as_ref().map(|selection| selection.stage_id),
                self.expected_players(),
                self.config.handshake.timeout(),
            ),
            Role::Client => StageHandshake::client(self.local_id, self.config.handshake.resend()),
        };
        let mut state = NetplayState::new(self.role, stage_seq, handshake);
        if self.role == Role::Host {
            for &player in self.players.keys().filter(|&&player| player != self.local_id) {
                state.clients.insert(player, ClientState::default());
            }
        }
        state
    }

    /// Players that take part in the simulation
    fn expected_players(&self) -> BTreeSet<PlayerId> {
        self.players
            .iter()
            .filter(|(_, slot)| slot.is_active())
            .map(|(&id, _)| id)
            .collect()
    }

    fn is_local_active(&self) -> bool {
        self.players
            .get(&self.local_id)
            .is_some_and(PlayerSlot::is_active)
    }

    pub(super) fn apply_handshake(&mut self, event: HandshakeEvent, now: Instant) {
        let (next, effects) = self.state.handshake.clone().handle(event, now);
        self.state.handshake = next;

        for effect in effects {
            let stage_seq = self.state.stage_seq;
            match effect {
                HandshakeEffect::SendStageReady { stage_id } => {
                    tracing::debug!(stage_seq, stage = %stage_id, "Sending stage_ready");
                    self.send_to(
                        self.host_id,
                        &NetMessage::StageReady(StageReady { stage_seq, stage_id }),
                    );
                }
                HandshakeEffect::BroadcastStageSync { stage_id } => {
                    let frame = self.session.frame();
                    self.broadcast(&NetMessage::StageSync(StageSync {
                        stage_seq,
                        stage_id,
                        frame,
                    }));
                }
                HandshakeEffect::SendStageSync { player, stage_id } => {
                    let frame = self.session.frame();
                    self.send_to(
                        player,
                        &NetMessage::StageSync(StageSync {
                            stage_seq,
                            stage_id,
                            frame,
                        }),
                    );
                }
                HandshakeEffect::Synced { frame } => match frame {
                    Some(host_frame) => self.on_stage_synced(host_frame, now),
                    None => {
                        let frame = self.session.frame();
                        tracing::info!(stage_seq, frame, "Stage synced");
                        self.events.push(NetplayEvent::StageSynced { stage_seq, frame });
                    }
                },
            }
        }
    }

    // ========================================================================
    // Driving
    // ========================================================================

    /// Process every pending transport event
    pub fn poll_transport(&mut self, now: Instant) -> Result<(), NetplayError> {
        while let Some(event) = self.transport.poll() {
            self.handle_event(event, now)?;
        }
        Ok(())
    }

    /// Process one transport event
    pub fn handle_event(
        &mut self,
        event: TransportEvent,
        now: Instant,
    ) -> Result<(), NetplayError> {
        match event {
            TransportEvent::Connected(peer) => {
                match self.role {
                    Role::Host => self.handle_peer_connected(peer, now),
                    Role::Client => tracing::debug!(peer = %peer, "Link up"),
                }
                Ok(())
            }
            TransportEvent::Disconnected(peer) => {
                match self.role {
                    Role::Host => self.remove_player(peer, now),
                    Role::Client if peer == self.host_id => {
                        tracing::warn!(host = %peer, "Lost connection to host");
                        self.events.push(NetplayEvent::HostLost);
                    }
                    Role::Client => {}
                }
                Ok(())
            }
            TransportEvent::Message { from, message } => self.handle_message(from, message, now),
        }
    }

    fn handle_message(
        &mut self,
        from: PlayerId,
        message: NetMessage,
        now: Instant,
    ) -> Result<(), NetplayError> {
        if message.is_stale(self.state.stage_seq) {
            tracing::trace!(
                from = %from,
                kind = message.kind(),
                msg_seq = ?message.stage_seq(),
                stage_seq = self.state.stage_seq,
                "Dropping stale message"
            );
            return Ok(());
        }

        match (self.role, message.direction()) {
            (Role::Host, MessageDirection::HostToClient)
            | (Role::Client, MessageDirection::ClientToHost) => {
                tracing::warn!(
                    from = %from,
                    kind = message.kind(),
                    "Unexpected message direction"
                );
                Ok(())
            }
            (Role::Host, _) => self.handle_client_message(from, message, now),
            (Role::Client, _) if from != self.host_id => {
                tracing::warn!(
                    from = %from,
                    kind = message.kind(),
                    "Ignoring message from non-host peer"
                );
                Ok(())
            }
            (Role::Client, _) => self.handle_host_message(message, now),
        }
    }

    /// Advance by `dt` of wall-clock time.
    ///
    /// Runs zero or more fixed simulation ticks depending on the handshake,
    /// the accumulator and (for clients) drift against the host. `input` is
    /// the local input sample used for every tick run by this call.
    pub fn tick(
        &mut self,
        dt: Duration,
        now: Instant,
        input: QuantizedInput,
    ) -> Result<TickReport, NetplayError> {
        let mut report = TickReport {
            ticks: 0,
            drift: 0.0,
            rate_scale: 1.0,
        };

        match self.state.handshake.phase() {
            HandshakePhase::Loading => {
                self.last_report = report;
                return Ok(report);
            }
            HandshakePhase::AwaitingStageSync | HandshakePhase::AwaitingStageReady => {
                if self.role == Role::Host {
                    self.resend_start(now);
                }
                self.apply_handshake(HandshakeEvent::Tick, now);
                if !self.state.handshake.is_synced() {
                    self.state.accumulator = 0.0;
                    self.last_report = report;
                    return Ok(report);
                }
            }
            HandshakePhase::Synced => {}
        }

        if self.role == Role::Host {
            self.resend_start(now);
            self.apply_pending_rollback()?;
        }

        let step = self.config.session.fixed_step();
        let current = self.session.frame();
        let drift = pacing::drift(self.target_frame(now), current, self.state.accumulator, step);
        report.drift = drift;

        if self.role == Role::Client {
            self.client_maintenance(drift, now);
            if pacing::is_too_far_ahead(drift, self.config.pacing.client_ahead_slack) {
                self.send_input_buffer();
                self.last_report = report;
                return Ok(report);
            }
        }

        let intro = self
            .session
            .simulation()
            .intro()
            .is_some_and(|timer| timer.is_running());
        let band = if intro {
            &self.config.pacing.intro
        } else {
            &self.config.pacing.steady
        };
        let plan = pacing::plan_ticks(
            band,
            self.role == Role::Client,
            drift,
            self.state.accumulator,
            dt.as_secs_f64(),
            step,
            self.config.session.max_frame_delta,
        );

        let mut accumulator = plan.accumulator;
        for _ in 0..plan.ticks {
            self.step(input.normalized(), now)?;
            accumulator -= step;
        }
        self.state.accumulator = accumulator.max(0.0);

        if self.role == Role::Host {
            self.push_snapshots_to_lagging(now);
        }

        report.ticks = plan.ticks;
        report.rate_scale = plan.rate_scale;
        self.last_report = report;
        Ok(report)
    }

    /// Frame this peer should be simulating now
    fn target_frame(&self, now: Instant) -> f64 {
        match self.role {
            Role::Host => f64::from(self.session.frame()),
            Role::Client => {
                let step = self.config.session.fixed_step();
                let since = self
                    .state
                    .last_host_frame_at
                    .map(|at| now.saturating_duration_since(at));
                let host = pacing::estimated_host_frame(
                    self.state.last_received_host_frame,
                    since,
                    step,
                    self.config.session.max_rollback_frames,
                );
                let lead = pacing::lead_frames(
                    &self.config.pacing,
                    self.state.rtt(),
                    step,
                    self.session.simulation().intro(),
                );
                host + f64::from(lead)
            }
        }
    }

    // ========================================================================
    // Presence
    // ========================================================================

    /// Send a chat line. Returns false when it was empty or rate limited.
    pub fn send_chat(&mut self, text: &str, now: Instant) -> Result<bool, NetplayError> {
        let text = sanitize_text(text, self.config.room.chat_max_len);
        if text.is_empty() || !self.allow_chat(self.local_id, now) {
            return Ok(false);
        }
        let message = NetMessage::Chat(ChatMessage {
            player: self.local_id,
            text: text.clone(),
        });
        match self.role {
            Role::Host => {
                self.broadcast(&message);
                self.events.push(NetplayEvent::Chat {
                    player: self.local_id,
                    text,
                });
            }
            Role::Client => self.send_to(self.host_id, &message),
        }
        Ok(true)
    }

    /// Update the local display profile
    pub fn set_profile(&mut self, profile: PlayerProfile) {
        let profile = profile.sanitized(&fallback_name(self.local_id));
        if let Some(slot) = self.players.get_mut(&self.local_id) {
            slot.profile = profile.clone();
        }
        let message = NetMessage::PlayerProfile(ProfileUpdate {
            player: self.local_id,
            profile,
        });
        match self.role {
            Role::Host => self.broadcast(&message),
            Role::Client => self.send_to(self.host_id, &message),
        }
    }

    /// Per-player chat rate limit
    fn allow_chat(&mut self, player: PlayerId, now: Instant) -> bool {
        let cooldown = self.config.room.chat_cooldown();
        allow(&mut self.chat_limits, player, now, cooldown)
    }

    fn allow_profile(&mut self, player: PlayerId, now: Instant) -> bool {
        let cooldown = self.config.room.profile_cooldown();
        allow(&mut self.profile_limits, player, now, cooldown)
    }

    /// Client: ask the host for a snapshot, subject to the request cooldown.
    ///
    /// Returns whether a request went out.
    pub fn request_snapshot(
        &mut self,
        reason: SnapshotReason,
        now: Instant,
    ) -> Result<bool, NetplayError> {
        if self.role != Role::Client {
            return Err(NetplayError::NotClient);
        }
        Ok(self.request_snapshot_at(reason, None, now))
    }

    // ========================================================================
    // Transport helpers
    // ========================================================================

    fn send_to(&mut self, peer: PlayerId, message: &NetMessage) {
        if let Err(e) = self.transport.send_to(peer, message) {
            tracing::warn!(
                error = %e,
                peer = %peer,
                kind = message.kind(),
                "Failed to send message"
            );
        }
    }

    fn broadcast(&mut self, message: &NetMessage) {
        if let Err(e) = self.transport.broadcast(message) {
            tracing::warn!(error = %e, kind = message.kind(), "Failed to broadcast message");
        }
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Human-readable status lines for an overlay
    pub fn debug_lines(&self, now: Instant) -> Vec<String> {
        let frame = self.session.frame();
        let step = self.config.session.fixed_step();
        let drift = pacing::drift(self.target_frame(now), frame, self.state.accumulator, step);
        let stats = self.session.stats();

        let mut lines = vec![
            format!("net {} id={}", self.role.as_str(), self.local_id),
            format!(
                "stage={} seq={} phase={}",
                self.state
                    .stage_id
                    .map_or_else(|| "-".to_string(), |id| id.to_string()),
                self.state.stage_seq,
                self.state.handshake.phase().as_str()
            ),
            format!(
                "frame={} host={} ack={}",
                frame,
                self.state.last_received_host_frame,
                self.state
                    .last_acked_local_frame
                    .map_or_else(|| "-".to_string(), |ack| ack.to_string())
            ),
            format!("drift={:.2} acc={:.3}", drift, self.state.accumulator),
            format!(
                "snap={} rtt={}",
                u8::from(self.state.awaiting_snapshot),
                self.state
                    .rtt()
                    .map_or_else(|| "-".to_string(), |rtt| format!("{}ms", rtt.as_millis()))
            ),
            format!(
                "rollbacks={} failed={} resim={}",
                stats.rollbacks, stats.failed_rollbacks, stats.frames_resimulated
            ),
        ];

        match self.role {
            Role::Client => {
                let host_age = self.state.last_host_frame_at.map_or_else(
                    || "n/a".to_string(),
                    |at| format!("{:.1}s", now.saturating_duration_since(at).as_secs_f64()),
                );
                lines.push(format!("hostAge={host_age}"));
            }
            Role::Host => {
                let behind: Vec<String> = self
                    .state
                    .clients
                    .iter()
                    .map(|(player, client)| match client.frames_behind(frame) {
                        Some(behind) => format!("{player}:{behind}"),
                        None => format!("{player}:-"),
                    })
                    .collect();
                if !behind.is_empty() {
                    lines.push(format!("behind={}", behind.join(" ")));
                }
            }
        }

        if let Some(slot) = self.players.get(&self.local_id)
            && !slot.is_active()
        {
            lines.push("local pending spawn".to_string());
        }
        lines
    }
}

/// Rate limit helper shared by chat and profile updates
fn allow(
    limits: &mut HashMap<PlayerId, Instant>,
    player: PlayerId,
    now: Instant,
    cooldown: Duration,
) -> bool {
    if let Some(last) = limits.get(&player)
        && now.saturating_duration_since(*last) < cooldown
    {
        return false;
    }
    limits.insert(player, now);
    true
}
