//! Drives one host and N clients on virtual time and collects a report

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use rollsync_core::net::loopback::{LoopbackNetwork, LoopbackStats, LoopbackTransport};
use rollsync_core::{NetplayCoordinator, NetplayEvent};
use rollsync_shared::{PlayerId, QuantizedInput, StageId, StageSelection};
use tracing::{debug, info, warn};

use crate::arena::ArenaSim;
use crate::scenario::Scenario;

type Peer = NetplayCoordinator<ArenaSim, LoopbackTransport>;

const HOST_ID: PlayerId = PlayerId(0);

/// Run parameters that are not part of the scenario file
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub clients: u16,
    pub stages: u32,
    pub stage_seconds: f64,
    pub seed: u64,
    pub intro_frames: u32,
    /// Corrupt the first client's world at this tick of the first stage
    pub diverge_at: Option<u32>,
}

/// Random walk input generator, one per participant
struct Bot {
    rng: Pcg64,
    held: QuantizedInput,
    hold_ticks: u32,
}

impl Bot {
    fn new(seed: u64, player: PlayerId) -> Self {
        Self {
            rng: Pcg64::seed_from_u64(seed ^ (u64::from(player.0) << 32)),
            held: QuantizedInput::NEUTRAL,
            hold_ticks: 0,
        }
    }

    fn next(&mut self) -> QuantizedInput {
        if self.hold_ticks == 0 {
            self.held = QuantizedInput::new(
                self.rng.random_range(-127..=127),
                self.rng.random_range(-127..=127),
                u32::from(self.rng.random_bool(0.2)),
            );
            self.hold_ticks = self.rng.random_range(6..40);
        }
        self.hold_ticks -= 1;
        self.held
    }
}

struct Participant {
    peer: Peer,
    bot: Bot,
    desyncs: u32,
    snapshots: u32,
    connected: bool,
}

impl Participant {
    fn id(&self) -> PlayerId {
        self.peer.local_id()
    }

    /// React to coordinator events. Stage starts are loaded immediately.
    fn absorb_events(&mut self, now: Instant) -> Result<()> {
        for event in self.peer.drain_events() {
            match event {
                NetplayEvent::StageStarting { selection, late_join, .. } => {
                    debug!(
                        player = %self.id(),
                        stage = %selection.stage_id,
                        late_join,
                        "Loading stage"
                    );
                    self.peer.simulation_mut().load_stage(selection.seed);
                    self.peer.stage_loaded(selection.stage_id, now)?;
                }
                NetplayEvent::StageSynced { stage_seq, frame } => {
                    info!(player = %self.id(), stage_seq, frame, "Stage synced");
                }
                NetplayEvent::DesyncDetected { frame, local, remote } => {
                    self.desyncs += 1;
                    warn!(player = %self.id(), frame, local, remote, "Desync detected");
                }
                NetplayEvent::SnapshotApplied { frame } => {
                    self.snapshots += 1;
                    info!(player = %self.id(), frame, "Snapshot applied");
                }
                NetplayEvent::HostLost | NetplayEvent::Kicked { .. } => {
                    warn!(player = %self.id(), ?event, "Left the session");
                    self.connected = false;
                }
                other => debug!(player = %self.id(), event = ?other),
            }
        }
        Ok(())
    }
}

/// One participant's line in the final report
#[derive(Debug, Clone)]
pub struct PeerReport {
    pub player: PlayerId,
    pub frame: u32,
    pub rollbacks: u64,
    pub frames_resimulated: u64,
    pub desyncs: u32,
    pub snapshots: u32,
    pub rtt: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub peers: Vec<PeerReport>,
    pub network: LoopbackStats,
    /// Latest hashed frame every participant has settled, with agreement
    pub checked_frame: u32,
    pub hashes_agree: bool,
}

impl RunReport {
    pub fn print(&self) {
        println!(
            "{:<8} {:>7} {:>9} {:>8} {:>7} {:>9} {:>8}",
            "player", "frame", "rollbacks", "resim", "desyncs", "snapshots", "rtt"
        );
        for peer in &self.peers {
            let rtt = peer
                .rtt
                .map(|rtt| format!("{}ms", rtt.as_millis()))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<8} {:>7} {:>9} {:>8} {:>7} {:>9} {:>8}",
                peer.player.to_string(),
                peer.frame,
                peer.rollbacks,
                peer.frames_resimulated,
                peer.desyncs,
                peer.snapshots,
                rtt
            );
        }
        println!(
            "network: sent={} delivered={} dropped={} bytes={}",
            self.network.sent, self.network.delivered, self.network.dropped, self.network.bytes_sent
        );
        println!(
            "hashes at frame {}: {}",
            self.checked_frame,
            if self.hashes_agree { "agree" } else { "DIFFER" }
        );
    }
}

pub fn execute(scenario: &Scenario, options: &RunOptions) -> Result<RunReport> {
    let step = Duration::from_secs_f64(1.0 / f64::from(scenario.netplay.session.tick_rate_hz));
    let mut now = Instant::now();
    let network = LoopbackNetwork::new(scenario.link.conditions(), options.seed, now);

    let host = NetplayCoordinator::host(
        ArenaSim::new(options.intro_frames, None),
        network.endpoint(HOST_ID),
        HOST_ID,
        scenario.netplay.clone(),
    )
    .context("Failed to create host")?;
    let mut peers = vec![Participant {
        peer: host,
        bot: Bot::new(options.seed, HOST_ID),
        desyncs: 0,
        snapshots: 0,
        connected: true,
    }];

    for index in 0..options.clients {
        let id = PlayerId(index + 1);
        let diverge_at = if index == 0 { options.diverge_at } else { None };
        let peer = NetplayCoordinator::client(
            ArenaSim::new(options.intro_frames, diverge_at),
            network.endpoint(id),
            id,
            HOST_ID,
            scenario.netplay.clone(),
        )
        .with_context(|| format!("Failed to create client {id}"))?;
        network.connect(HOST_ID, id);
        peers.push(Participant {
            peer,
            bot: Bot::new(options.seed, id),
            desyncs: 0,
            snapshots: 0,
            connected: true,
        });
    }
    info!(
        clients = options.clients,
        latency_ms = scenario.link.latency_ms,
        jitter_ms = scenario.link.jitter_ms,
        loss = scenario.link.loss,
        "Session created"
    );

    let pump = |peers: &mut [Participant], now: &mut Instant| -> Result<()> {
        *now += step;
        network.advance_to(*now);
        for participant in peers.iter_mut().filter(|p| p.connected) {
            participant.peer.poll_transport(*now)?;
            let input = participant.bot.next();
            participant.peer.tick(step, *now, input)?;
            participant.absorb_events(*now)?;
        }
        Ok(())
    };

    // Let the roster settle before the first stage
    for _ in 0..10 {
        pump(&mut peers, &mut now)?;
    }

    let tick_rate = f64::from(scenario.netplay.session.tick_rate_hz);
    let stage_ticks = (options.stage_seconds * tick_rate) as u32;
    for stage in 1..=options.stages {
        let selection = StageSelection::new(
            StageId(stage),
            format!("arena-{stage}"),
            options.seed.wrapping_add(u64::from(stage)),
        );
        info!(stage, "Starting stage");
        peers[0].peer.start_stage(selection, now)?;
        peers[0].absorb_events(now)?;

        for _ in 0..stage_ticks {
            pump(&mut peers, &mut now)?;
        }
    }

    // Drain in-flight traffic so the last hashes settle
    for _ in 0..60 {
        pump(&mut peers, &mut now)?;
    }

    Ok(report(&peers, network.stats()))
}

fn report(peers: &[Participant], network: LoopbackStats) -> RunReport {
    let host = &peers[0].peer;
    let interval = host.config().session.hash_interval.max(1);
    let checked_frame = host.current_frame().saturating_sub(10) / interval * interval;
    let host_hash = host.state().hash_at(checked_frame);
    let hashes_agree = host_hash.is_some()
        && peers[1..]
            .iter()
            .filter(|p| p.connected)
            .all(|p| p.peer.state().hash_at(checked_frame) == host_hash);

    RunReport {
        peers: peers
            .iter()
            .map(|p| {
                let stats = p.peer.session().stats();
                PeerReport {
                    player: p.id(),
                    frame: p.peer.current_frame(),
                    rollbacks: stats.rollbacks,
                    frames_resimulated: stats.frames_resimulated,
                    desyncs: p.desyncs,
                    snapshots: p.snapshots,
                    rtt: p.peer.rtt(),
                }
            })
            .collect(),
        network,
        checked_frame,
        hashes_agree,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(clients: u16) -> RunOptions {
        RunOptions {
            clients,
            stages: 1,
            stage_seconds: 5.0,
            seed: 11,
            intro_frames: 0,
            diverge_at: None,
        }
    }

    #[test]
    fn test_perfect_link_converges() {
        let report = execute(&Scenario::default(), &options(3)).unwrap();
        assert!(report.hashes_agree, "differ at {}", report.checked_frame);
        assert_eq!(report.peers.len(), 4);
        assert!(report.peers.iter().all(|p| p.desyncs == 0));
        assert_eq!(report.network.dropped, 0);
    }

    #[test]
    fn test_divergence_is_repaired() {
        let mut opts = options(1);
        opts.diverge_at = Some(60);
        let report = execute(&Scenario::default(), &opts).unwrap();
        assert!(report.peers[1].desyncs >= 1);
        assert!(report.peers[1].snapshots >= 1);
        assert!(report.hashes_agree);
    }

    #[test]
    fn test_bot_is_reproducible() {
        let mut a = Bot::new(5, PlayerId(2));
        let mut b = Bot::new(5, PlayerId(2));
        let mut c = Bot::new(5, PlayerId(3));
        let first: Vec<_> = (0..100).map(|_| a.next()).collect();
        let second: Vec<_> = (0..100).map(|_| b.next()).collect();
        let third: Vec<_> = (0..100).map(|_| c.next()).collect();
        assert_eq!(first, second);
        assert_ne!(first, third);
    }
}
