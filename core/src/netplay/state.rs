//! Per-stage netplay bookkeeping
//!
//! [`NetplayState`] is rebuilt on every stage transition. History, acks and
//! hash tables are all stage-scoped, so nothing in here survives a new
//! `stage_seq`.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use rollsync_shared::{Frame, PlayerId, PlayerProfile, QuantizedInput, StageId};

use super::handshake::StageHandshake;
use crate::net::protocol::{FrameBundle, Snapshot};
use crate::rollback::InputLedger;

/// Which side of the session this coordinator plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Client,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Client => "client",
        }
    }
}

/// One roster entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSlot {
    pub profile: PlayerProfile,
    /// Epoch in which the player joined as a spectator. Cleared when the
    /// next stage starts.
    pub pending_since: Option<u32>,
}

impl PlayerSlot {
    pub fn new(profile: PlayerProfile) -> Self {
        Self {
            profile,
            pending_since: None,
        }
    }

    /// Player takes part in the simulation
    pub fn is_active(&self) -> bool {
        self.pending_since.is_none()
    }
}

/// Host-side view of one connected client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientState {
    /// Highest host frame the client confirmed receiving
    pub last_acked_host_frame: Option<Frame>,
    /// Highest input frame received from the client
    pub last_acked_client_input: Option<Frame>,
    /// Last snapshot the host sent unprompted
    pub last_snapshot_at: Option<Instant>,
    /// Last snapshot request the host honored
    pub last_snapshot_request_at: Option<Instant>,
}

impl ClientState {
    /// Frames between `current` and the client's acked host frame
    pub fn frames_behind(&self, current: Frame) -> Option<Frame> {
        self.last_acked_host_frame
            .map(|acked| current - acked.min(current))
    }
}

/// RTT pings in flight
#[derive(Debug, Default)]
pub struct PingTracker {
    next_id: u32,
    pending: HashMap<u32, Instant>,
    last_sent: Option<Instant>,
    rtt: Option<Duration>,
}

impl PingTracker {
    /// Whether a ping is due
    pub fn due(&self, now: Instant, interval: Duration) -> bool {
        self.last_sent
            .is_none_or(|sent| now.saturating_duration_since(sent) >= interval)
    }

    /// Register a new ping and return its id
    pub fn begin(&mut self, now: Instant) -> u32 {
        self.next_id = self.next_id.wrapping_add(1);
        self.pending.insert(self.next_id, now);
        self.last_sent = Some(now);
        self.next_id
    }

    /// Resolve ping `id`, updating the RTT estimate
    pub fn complete(&mut self, id: u32, now: Instant) -> Option<Duration> {
        let sent = self.pending.remove(&id)?;
        let rtt = now.saturating_duration_since(sent);
        self.rtt = Some(rtt);
        Some(rtt)
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }
}

/// Netplay bookkeeping for one stage epoch
#[derive(Debug)]
pub struct NetplayState {
    pub(crate) role: Role,
    pub(crate) stage_seq: u32,
    pub(crate) stage_id: Option<StageId>,
    pub(crate) handshake: StageHandshake,

    /// Received inputs, both local and remote
    pub(crate) ledger: InputLedger,
    /// Client: local inputs not yet acknowledged by the host
    pub(crate) pending_local_inputs: BTreeMap<Frame, QuantizedInput>,
    /// Client: highest local input frame the host acknowledged
    pub(crate) last_acked_local_frame: Option<Frame>,
    /// Client: highest host frame received
    pub(crate) last_received_host_frame: Frame,
    pub(crate) last_host_frame_at: Option<Instant>,

    /// Host: bundles for frames inside the resend window
    pub(crate) host_frames: BTreeMap<Frame, FrameBundle>,
    /// Host: per-client ack state
    pub(crate) clients: BTreeMap<PlayerId, ClientState>,
    /// Host: frames whose bundles changed after a rollback and must be resent
    pub(crate) pending_host_updates: BTreeSet<Frame>,
    /// Host: earliest frame needing correction this tick
    pub(crate) pending_rollback: Option<Frame>,
    pub(crate) pending_rollback_players: BTreeSet<PlayerId>,
    /// Host: last time `Start` went to clients that have not reported ready
    pub(crate) start_sent_at: Option<Instant>,
    /// Host: last frame whose hash was broadcast
    pub(crate) last_auth_hash_frame: Option<Frame>,

    /// Locally computed hashes
    pub(crate) hash_history: BTreeMap<Frame, u32>,
    /// Client: hashes claimed by the host
    pub(crate) expected_hashes: BTreeMap<Frame, u32>,

    /// Client: drift has exceeded the lag fuse since
    pub(crate) lag_behind_since: Option<Instant>,
    pub(crate) last_snapshot_request_at: Option<Instant>,
    pub(crate) awaiting_snapshot: bool,
    /// Client: snapshot received before it could be applied
    pub(crate) pending_snapshot: Option<Snapshot>,

    pub(crate) pings: PingTracker,
    /// Unconsumed simulation time in seconds
    pub(crate) accumulator: f64,
}

impl NetplayState {
    pub(crate) fn new(role: Role, stage_seq: u32, handshake: StageHandshake) -> Self {
        Self {
            role,
            stage_seq,
            stage_id: None,
            handshake,
            ledger: InputLedger::new(),
            pending_local_inputs: BTreeMap::new(),
            last_acked_local_frame: None,
            last_received_host_frame: 0,
            last_host_frame_at: None,
            host_frames: BTreeMap::new(),
            clients: BTreeMap::new(),
            pending_host_updates: BTreeSet::new(),
            pending_rollback: None,
            pending_rollback_players: BTreeSet::new(),
            start_sent_at: None,
            last_auth_hash_frame: None,
            hash_history: BTreeMap::new(),
            expected_hashes: BTreeMap::new(),
            lag_behind_since: None,
            last_snapshot_request_at: None,
            awaiting_snapshot: false,
            pending_snapshot: None,
            pings: PingTracker::default(),
            accumulator: 0.0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn stage_seq(&self) -> u32 {
        self.stage_seq
    }

    /// Stage loaded for this epoch, if loading finished
    pub fn stage_id(&self) -> Option<StageId> {
        self.stage_id
    }

    pub fn handshake(&self) -> &StageHandshake {
        &self.handshake
    }

    /// Locally computed hash at `frame`
    pub fn hash_at(&self, frame: Frame) -> Option<u32> {
        self.hash_history.get(&frame).copied()
    }

    /// Host-claimed hash at `frame`
    pub fn expected_hash(&self, frame: Frame) -> Option<u32> {
        self.expected_hashes.get(&frame).copied()
    }

    pub fn last_received_host_frame(&self) -> Frame {
        self.last_received_host_frame
    }

    pub fn last_acked_local_frame(&self) -> Option<Frame> {
        self.last_acked_local_frame
    }

    pub fn awaiting_snapshot(&self) -> bool {
        self.awaiting_snapshot
    }

    pub fn has_pending_snapshot(&self) -> bool {
        self.pending_snapshot.is_some()
    }

    /// Host view of `player`
    pub fn client(&self, player: PlayerId) -> Option<&ClientState> {
        self.clients.get(&player)
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.pings.rtt()
    }

    /// Drop stage-scoped history older than `min_frame`
    pub(crate) fn trim(&mut self, min_frame: Frame) {
        self.ledger.trim(min_frame);
        self.hash_history = self.hash_history.split_off(&min_frame);
        self.expected_hashes = self.expected_hashes.split_off(&min_frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_behind() {
        let mut client = ClientState::default();
        assert_eq!(client.frames_behind(50), None);
        client.last_acked_host_frame = Some(20);
        assert_eq!(client.frames_behind(50), Some(30));
        client.last_acked_host_frame = Some(70);
        assert_eq!(client.frames_behind(50), Some(0));
    }

    #[test]
    fn test_ping_roundtrip() {
        let t0 = Instant::now();
        let interval = Duration::from_secs(1);
        let mut pings = PingTracker::default();
        assert!(pings.due(t0, interval));

        let id = pings.begin(t0);
        assert!(!pings.due(t0 + Duration::from_millis(500), interval));
        assert!(pings.due(t0 + interval, interval));

        assert_eq!(pings.complete(id + 1, t0), None);
        let rtt = pings.complete(id, t0 + Duration::from_millis(80));
        assert_eq!(rtt, Some(Duration::from_millis(80)));
        assert_eq!(pings.rtt(), rtt);
        assert_eq!(pings.complete(id, t0), None, "pings resolve once");
    }

    #[test]
    fn test_slot_activity() {
        let mut slot = PlayerSlot::new(PlayerProfile::new("ana"));
        assert!(slot.is_active());
        slot.pending_since = Some(4);
        assert!(!slot.is_active());
    }
}
