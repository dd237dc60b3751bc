//! Stage-ready / stage-sync handshake
//!
//! Every stage epoch starts with both roles in [`HandshakePhase::Loading`].
//! Once the stage is loaded locally:
//!
//! ```text
//! Host:   Loading -> AwaitingStageReady -> Synced
//!                    (all expected players ready, or timeout)
//! Client: Loading -> AwaitingStageSync  -> Synced
//!                    (resends stage_ready until stage_sync arrives)
//! ```
//!
//! The state machine is a pure value: [`StageHandshake::handle`] consumes
//! the current state and one event and returns the next state plus the
//! effects the coordinator must carry out. It never touches a transport.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use rollsync_shared::{Frame, PlayerId, StageId};

use super::Role;

/// Handshake phase for the current epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Stage not loaded locally yet
    Loading,
    /// Host: waiting for every expected player's `stage_ready`
    AwaitingStageReady,
    /// Client: waiting for the host's `stage_sync`
    AwaitingStageSync,
    /// Simulation running
    Synced,
}

impl HandshakePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::AwaitingStageReady => "awaiting_stage_ready",
            Self::AwaitingStageSync => "awaiting_stage_sync",
            Self::Synced => "synced",
        }
    }
}

/// Inputs to the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// Local stage finished loading
    StageLoaded { stage_id: StageId },
    /// Host: a peer reported readiness
    StageReady { player: PlayerId, stage_id: StageId },
    /// Client: host declared the stage synced at `frame`
    StageSync { stage_id: StageId, frame: Frame },
    /// Host: the set of players that must be ready changed
    ExpectedPlayersChanged(BTreeSet<PlayerId>),
    /// Periodic timer check (resends and timeouts)
    Tick,
}

/// Work the coordinator performs after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEffect {
    /// Client: send `stage_ready` to the host
    SendStageReady { stage_id: StageId },
    /// Host: broadcast `stage_sync` at the current frame
    BroadcastStageSync { stage_id: StageId },
    /// Host: send `stage_sync` to one late-ready player
    SendStageSync { player: PlayerId, stage_id: StageId },
    /// Handshake completed. Clients carry the host's frame.
    Synced { frame: Option<Frame> },
}

/// Handshake state for one stage epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageHandshake {
    role: Role,
    local: PlayerId,
    phase: HandshakePhase,
    stage_id: Option<StageId>,
    /// Host: stage the epoch was started with, known before loading finishes
    expected_stage: Option<StageId>,
    ready: BTreeSet<PlayerId>,
    expected: BTreeSet<PlayerId>,
    ready_sent_at: Option<Instant>,
    waiting_since: Option<Instant>,
    resend: Duration,
    timeout: Duration,
}

impl StageHandshake {
    /// Host handshake for a stage expecting `expected` players to report in
    pub fn host(
        local: PlayerId,
        stage: Option<StageId>,
        expected: BTreeSet<PlayerId>,
        timeout: Duration,
    ) -> Self {
        Self {
            role: Role::Host,
            local,
            phase: HandshakePhase::Loading,
            stage_id: None,
            expected_stage: stage,
            ready: BTreeSet::new(),
            expected,
            ready_sent_at: None,
            waiting_since: None,
            resend: Duration::ZERO,
            timeout,
        }
    }

    pub fn client(local: PlayerId, resend: Duration) -> Self {
        Self {
            role: Role::Client,
            local,
            phase: HandshakePhase::Loading,
            stage_id: None,
            expected_stage: None,
            ready: BTreeSet::new(),
            expected: BTreeSet::new(),
            ready_sent_at: None,
            waiting_since: None,
            resend,
            timeout: Duration::ZERO,
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    pub fn is_synced(&self) -> bool {
        self.phase == HandshakePhase::Synced
    }

    /// Stage loaded locally, if any
    pub fn stage_id(&self) -> Option<StageId> {
        self.stage_id
    }

    /// Host: players that have reported ready
    pub fn ready_players(&self) -> &BTreeSet<PlayerId> {
        &self.ready
    }

    /// Advance the state machine by one event
    pub fn handle(mut self, event: HandshakeEvent, now: Instant) -> (Self, Vec<HandshakeEffect>) {
        let mut effects = Vec::new();
        match self.role {
            Role::Host => self.handle_host(event, now, &mut effects),
            Role::Client => self.handle_client(event, now, &mut effects),
        }
        (self, effects)
    }

    fn handle_host(
        &mut self,
        event: HandshakeEvent,
        now: Instant,
        effects: &mut Vec<HandshakeEffect>,
    ) {
        match event {
            HandshakeEvent::StageLoaded { stage_id } => {
                if self.phase != HandshakePhase::Loading {
                    return;
                }
                // Readiness reported while we were still loading counts only
                // if it was for the stage we ended up loading
                if self.expected_stage.is_some_and(|expected| expected != stage_id) {
                    self.ready.clear();
                }
                self.stage_id = Some(stage_id);
                self.ready.insert(self.local);
                self.phase = HandshakePhase::AwaitingStageReady;
                self.waiting_since = Some(now);
                self.maybe_sync(effects);
            }
            HandshakeEvent::StageReady { player, stage_id } => {
                let stage = self.stage_id.or(self.expected_stage);
                if stage.is_some_and(|stage| stage != stage_id) {
                    return;
                }
                self.ready.insert(player);
                match self.phase {
                    HandshakePhase::AwaitingStageReady => self.maybe_sync(effects),
                    HandshakePhase::Synced => {
                        effects.push(HandshakeEffect::SendStageSync { player, stage_id });
                    }
                    HandshakePhase::Loading | HandshakePhase::AwaitingStageSync => {}
                }
            }
            HandshakeEvent::ExpectedPlayersChanged(expected) => {
                self.expected = expected;
                if self.phase == HandshakePhase::AwaitingStageReady {
                    self.maybe_sync(effects);
                }
            }
            HandshakeEvent::Tick => {
                if self.phase != HandshakePhase::AwaitingStageReady {
                    return;
                }
                let since = *self.waiting_since.get_or_insert(now);
                if now.saturating_duration_since(since) >= self.timeout {
                    self.complete_host(effects);
                }
            }
            HandshakeEvent::StageSync { .. } => {}
        }
    }

    fn maybe_sync(&mut self, effects: &mut Vec<HandshakeEffect>) {
        if self.expected.iter().all(|player| self.ready.contains(player)) {
            self.complete_host(effects);
        }
    }

    fn complete_host(&mut self, effects: &mut Vec<HandshakeEffect>) {
        let Some(stage_id) = self.stage_id else {
            return;
        };
        self.phase = HandshakePhase::Synced;
        self.waiting_since = None;
        effects.push(HandshakeEffect::BroadcastStageSync { stage_id });
        effects.push(HandshakeEffect::Synced { frame: None });
    }

    fn handle_client(
        &mut self,
        event: HandshakeEvent,
        now: Instant,
        effects: &mut Vec<HandshakeEffect>,
    ) {
        match event {
            HandshakeEvent::StageLoaded { stage_id } => {
                if self.phase != HandshakePhase::Loading {
                    return;
                }
                self.stage_id = Some(stage_id);
                self.phase = HandshakePhase::AwaitingStageSync;
                self.ready_sent_at = Some(now);
                effects.push(HandshakeEffect::SendStageReady { stage_id });
            }
            HandshakeEvent::StageSync { stage_id, frame } => {
                if self.phase != HandshakePhase::AwaitingStageSync
                    || self.stage_id != Some(stage_id)
                {
                    return;
                }
                self.phase = HandshakePhase::Synced;
                self.ready_sent_at = None;
                effects.push(HandshakeEffect::Synced { frame: Some(frame) });
            }
            HandshakeEvent::Tick => {
                if self.phase != HandshakePhase::AwaitingStageSync {
                    return;
                }
                let Some(stage_id) = self.stage_id else {
                    return;
                };
                let due = self
                    .ready_sent_at
                    .is_none_or(|sent| now.saturating_duration_since(sent) >= self.resend);
                if due {
                    self.ready_sent_at = Some(now);
                    effects.push(HandshakeEffect::SendStageReady { stage_id });
                }
            }
            HandshakeEvent::StageReady { .. } | HandshakeEvent::ExpectedPlayersChanged(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: PlayerId = PlayerId(0);
    const P1: PlayerId = PlayerId(1);
    const P2: PlayerId = PlayerId(2);
    const STAGE: StageId = StageId(3);

    fn host(expected: &[PlayerId]) -> StageHandshake {
        StageHandshake::host(
            HOST,
            Some(STAGE),
            expected.iter().copied().collect(),
            Duration::from_secs(12),
        )
    }

    #[test]
    fn test_host_waits_for_all_expected() {
        let t0 = Instant::now();
        let loaded = HandshakeEvent::StageLoaded { stage_id: STAGE };
        let (hs, effects) = host(&[HOST, P1, P2]).handle(loaded, t0);
        assert_eq!(hs.phase(), HandshakePhase::AwaitingStageReady);
        assert!(effects.is_empty());

        let (hs, effects) = hs.handle(
            HandshakeEvent::StageReady {
                player: P1,
                stage_id: STAGE,
            },
            t0,
        );
        assert!(effects.is_empty());

        let (hs, effects) = hs.handle(
            HandshakeEvent::StageReady {
                player: P2,
                stage_id: STAGE,
            },
            t0,
        );
        assert!(hs.is_synced());
        assert_eq!(
            effects,
            vec![
                HandshakeEffect::BroadcastStageSync { stage_id: STAGE },
                HandshakeEffect::Synced { frame: None },
            ]
        );
    }

    #[test]
    fn test_host_alone_syncs_on_load() {
        let loaded = HandshakeEvent::StageLoaded { stage_id: STAGE };
        let (hs, effects) = host(&[HOST]).handle(loaded, Instant::now());
        assert!(hs.is_synced());
        assert_eq!(effects.len(), 2);
    }

    #[test]
    fn test_host_keeps_early_readiness() {
        let t0 = Instant::now();
        let (hs, _) = host(&[HOST, P1]).handle(
            HandshakeEvent::StageReady {
                player: P1,
                stage_id: STAGE,
            },
            t0,
        );
        assert_eq!(hs.phase(), HandshakePhase::Loading);

        let (hs, _) = hs.handle(HandshakeEvent::StageLoaded { stage_id: STAGE }, t0);
        assert!(hs.is_synced());
    }

    #[test]
    fn test_host_ignores_wrong_stage() {
        let t0 = Instant::now();
        let (hs, _) = host(&[HOST, P1]).handle(HandshakeEvent::StageLoaded { stage_id: STAGE }, t0);
        let (hs, effects) = hs.handle(
            HandshakeEvent::StageReady {
                player: P1,
                stage_id: StageId(99),
            },
            t0,
        );
        assert!(effects.is_empty());
        assert!(!hs.ready_players().contains(&P1));
    }

    #[test]
    fn test_host_timeout_forces_sync() {
        let t0 = Instant::now();
        let (hs, _) = host(&[HOST, P1]).handle(HandshakeEvent::StageLoaded { stage_id: STAGE }, t0);

        let (hs, effects) = hs.handle(HandshakeEvent::Tick, t0 + Duration::from_secs(11));
        assert!(effects.is_empty());
        assert_eq!(hs.phase(), HandshakePhase::AwaitingStageReady);

        let (hs, effects) = hs.handle(HandshakeEvent::Tick, t0 + Duration::from_secs(12));
        assert!(hs.is_synced());
        assert!(effects.contains(&HandshakeEffect::BroadcastStageSync { stage_id: STAGE }));
    }

    #[test]
    fn test_host_resyncs_late_ready_player() {
        let t0 = Instant::now();
        let (hs, _) = host(&[HOST]).handle(HandshakeEvent::StageLoaded { stage_id: STAGE }, t0);
        let (_, effects) = hs.handle(
            HandshakeEvent::StageReady {
                player: P2,
                stage_id: STAGE,
            },
            t0,
        );
        assert_eq!(
            effects,
            vec![HandshakeEffect::SendStageSync {
                player: P2,
                stage_id: STAGE
            }]
        );
    }

    #[test]
    fn test_host_departure_unblocks_sync() {
        let t0 = Instant::now();
        let (hs, _) = host(&[HOST, P1]).handle(HandshakeEvent::StageLoaded { stage_id: STAGE }, t0);
        let (hs, _) = hs.handle(
            HandshakeEvent::ExpectedPlayersChanged([HOST].into_iter().collect()),
            t0,
        );
        assert!(hs.is_synced());
    }

    #[test]
    fn test_client_sends_ready_on_load_and_resends() {
        let t0 = Instant::now();
        let hs = StageHandshake::client(P1, Duration::from_secs(2));

        let (hs, effects) = hs.handle(HandshakeEvent::Tick, t0);
        assert!(effects.is_empty(), "nothing to resend while loading");

        let (hs, effects) = hs.handle(HandshakeEvent::StageLoaded { stage_id: STAGE }, t0);
        assert_eq!(hs.phase(), HandshakePhase::AwaitingStageSync);
        assert_eq!(effects, vec![HandshakeEffect::SendStageReady { stage_id: STAGE }]);

        let (hs, effects) = hs.handle(HandshakeEvent::Tick, t0 + Duration::from_millis(1999));
        assert!(effects.is_empty());

        let (_, effects) = hs.handle(HandshakeEvent::Tick, t0 + Duration::from_secs(2));
        assert_eq!(effects, vec![HandshakeEffect::SendStageReady { stage_id: STAGE }]);
    }

    #[test]
    fn test_client_sync() {
        let t0 = Instant::now();
        let (hs, _) = StageHandshake::client(P1, Duration::from_secs(2))
            .handle(HandshakeEvent::StageLoaded { stage_id: STAGE }, t0);

        let (hs, effects) = hs.handle(
            HandshakeEvent::StageSync {
                stage_id: StageId(4),
                frame: 0,
            },
            t0,
        );
        assert!(effects.is_empty(), "other stage is ignored");

        let (hs, effects) = hs.handle(
            HandshakeEvent::StageSync {
                stage_id: STAGE,
                frame: 12,
            },
            t0,
        );
        assert!(hs.is_synced());
        assert_eq!(effects, vec![HandshakeEffect::Synced { frame: Some(12) }]);

        let (_, effects) = hs.handle(
            HandshakeEvent::StageSync {
                stage_id: STAGE,
                frame: 40,
            },
            t0,
        );
        assert!(effects.is_empty(), "duplicate sync is ignored");
    }

    #[test]
    fn test_client_sync_while_loading_is_ignored() {
        let (hs, effects) = StageHandshake::client(P1, Duration::from_secs(2)).handle(
            HandshakeEvent::StageSync {
                stage_id: STAGE,
                frame: 5,
            },
            Instant::now(),
        );
        assert_eq!(hs.phase(), HandshakePhase::Loading);
        assert!(effects.is_empty());
    }
}
