//! Shared test utilities for unit and scenario tests

use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use rollsync_shared::{Frame, PlayerId, QuantizedInput, StageId, StageSelection};

use crate::net::loopback::{LinkConditions, LoopbackNetwork, LoopbackTransport};
use crate::netplay::{NetplayConfig, NetplayCoordinator, NetplayEvent};
use crate::rollback::{FrameInputs, StateBlob};
use crate::simulation::{IntroTimer, Presentation, Simulation, SimulationError};

// ============================================================================
// Test Simulation
// ============================================================================

const MAX_BODIES: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TestBody {
    pub x: i32,
    pub y: i32,
    pub vx: i32,
    pub vy: i32,
    pub presses: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TestWorld {
    pub tick: u32,
    pub bodies: [TestBody; MAX_BODIES],
}

/// Deterministic toy simulation: one damped body per player slot.
#[derive(Debug, Default)]
pub struct TestSim {
    pub world: TestWorld,
    /// Ticks advanced with visuals on
    pub visible_frames: u32,
    /// Ticks advanced during resimulation
    pub suppressed_frames: u32,
    /// One-shot corruption injected when the world reaches this tick
    pub diverge_at: Option<Frame>,
    /// Intro length in ticks (0 = no intro)
    pub intro_frames: u32,
}

impl TestSim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_intro(intro_frames: u32) -> Self {
        Self {
            intro_frames,
            ..Self::default()
        }
    }

    /// Reset the world to a stage's initial state
    pub fn load_stage(&mut self) {
        self.world = TestWorld::default();
    }

    pub fn body(&self, player: PlayerId) -> TestBody {
        self.world.bodies[usize::from(player.0) % MAX_BODIES]
    }
}

impl Simulation for TestSim {
    fn save_state(&self) -> Result<StateBlob, SimulationError> {
        Ok(StateBlob::new(bytemuck::bytes_of(&self.world).to_vec()))
    }

    fn load_state(&mut self, state: &StateBlob) -> Result<(), SimulationError> {
        if !state.verify() {
            return Err(SimulationError::ChecksumMismatch {
                expected: state.checksum,
                actual: StateBlob::compute_checksum(&state.data),
            });
        }
        self.world = bytemuck::try_pod_read_unaligned::<TestWorld>(&state.data)
            .map_err(|e| SimulationError::Load(e.to_string()))?;
        Ok(())
    }

    fn advance_frame(&mut self, inputs: &FrameInputs, presentation: Presentation) {
        self.world.tick += 1;
        for (player, input) in inputs.iter() {
            let body = &mut self.world.bodies[usize::from(player.0) % MAX_BODIES];
            body.vx = body.vx * 7 / 8 + i32::from(input.x);
            body.vy = body.vy * 7 / 8 + i32::from(input.y);
            body.x += body.vx;
            body.y += body.vy;
            body.presses += input.buttons.count_ones();
        }
        if self.diverge_at == Some(self.world.tick) {
            self.diverge_at = None;
            self.world.bodies[0].x += 1000;
        }
        match presentation {
            Presentation::Visible => self.visible_frames += 1,
            Presentation::Suppressed => self.suppressed_frames += 1,
        }
    }

    fn hash(&self) -> u32 {
        xxhash_rust::xxh3::xxh3_64(bytemuck::bytes_of(&self.world)) as u32
    }

    fn intro(&self) -> Option<IntroTimer> {
        (self.intro_frames > self.world.tick).then(|| IntroTimer {
            remaining: self.intro_frames - self.world.tick,
            total: self.intro_frames,
        })
    }
}

pub fn input(x: i8, y: i8) -> QuantizedInput {
    QuantizedInput::new(x, y, 0)
}

// ============================================================================
// Netplay Harness
// ============================================================================

pub const HOST_ID: PlayerId = PlayerId(0);

/// Fixed wall-clock step used by the harness (60 Hz)
pub const STEP: Duration = Duration::from_micros(16_667);

pub type TestCoordinator = NetplayCoordinator<TestSim, LoopbackTransport>;

/// One host and N clients wired over a loopback network.
///
/// Every [`pump`](Self::pump) advances wall-clock time by [`STEP`], delivers
/// due packets, polls every coordinator and ticks it once. Stage starts are
/// answered automatically with `stage_loaded`.
pub struct NetplayHarness {
    pub network: LoopbackNetwork,
    pub host: TestCoordinator,
    pub clients: Vec<TestCoordinator>,
    pub now: Instant,
    pub host_events: Vec<NetplayEvent>,
    pub client_events: Vec<Vec<NetplayEvent>>,
    /// Inputs fed each tick, indexed host first then clients
    pub inputs: Vec<QuantizedInput>,
    /// Coordinators that ignore stage starts (stuck loading)
    pub stalled_loading: Vec<PlayerId>,
}

impl NetplayHarness {
    pub fn new(clients: usize, conditions: LinkConditions) -> Self {
        Self::with_config(clients, conditions, NetplayConfig::default(), TestSim::new)
    }

    pub fn with_config(
        clients: usize,
        conditions: LinkConditions,
        config: NetplayConfig,
        make_sim: impl Fn() -> TestSim,
    ) -> Self {
        let now = Instant::now();
        let network = LoopbackNetwork::new(conditions, 7, now);
        let host = NetplayCoordinator::host(
            make_sim(),
            network.endpoint(HOST_ID),
            HOST_ID,
            config.clone(),
        )
        .expect("host coordinator");
        let mut harness = Self {
            network,
            host,
            clients: Vec::new(),
            now,
            host_events: Vec::new(),
            client_events: Vec::new(),
            inputs: vec![QuantizedInput::NEUTRAL],
            stalled_loading: Vec::new(),
        };
        for _ in 0..clients {
            harness.add_client(config.clone(), &make_sim);
        }
        harness.pump_for(4);
        harness
    }

    /// Connect one more client. Returns its player id.
    pub fn add_client(
        &mut self,
        config: NetplayConfig,
        make_sim: impl Fn() -> TestSim,
    ) -> PlayerId {
        let id = PlayerId(self.clients.len() as u16 + 1);
        let client =
            NetplayCoordinator::client(make_sim(), self.network.endpoint(id), id, HOST_ID, config)
                .expect("client coordinator");
        self.clients.push(client);
        self.client_events.push(Vec::new());
        self.inputs.push(QuantizedInput::NEUTRAL);
        self.network.connect(HOST_ID, id);
        id
    }

    pub fn client(&self, id: PlayerId) -> &TestCoordinator {
        &self.clients[usize::from(id.0) - 1]
    }

    pub fn client_mut(&mut self, id: PlayerId) -> &mut TestCoordinator {
        &mut self.clients[usize::from(id.0) - 1]
    }

    pub fn start_stage(&mut self, stage: u32) {
        let selection = StageSelection::new(StageId(stage), "test-course", u64::from(stage));
        self.host
            .start_stage(selection, self.now)
            .expect("host can start a stage");
        self.absorb_events();
    }

    /// Advance wall-clock time by one step and drive every participant once.
    pub fn pump(&mut self) {
        self.now += STEP;
        self.network.advance_to(self.now);

        self.host.poll_transport(self.now).expect("host poll");
        let host_input = self.inputs[0];
        self.host.tick(STEP, self.now, host_input).expect("host tick");

        for (index, client) in self.clients.iter_mut().enumerate() {
            client.poll_transport(self.now).expect("client poll");
            let client_input = self.inputs[index + 1];
            client.tick(STEP, self.now, client_input).expect("client tick");
        }
        self.absorb_events();
    }

    pub fn pump_for(&mut self, steps: usize) {
        for _ in 0..steps {
            self.pump();
        }
    }

    /// Pump until `done` holds or `max_steps` elapse. Returns whether it held.
    pub fn pump_until(&mut self, max_steps: usize, mut done: impl FnMut(&Self) -> bool) -> bool {
        for _ in 0..max_steps {
            if done(self) {
                return true;
            }
            self.pump();
        }
        done(self)
    }

    /// Collect events and answer stage starts with `stage_loaded`.
    fn absorb_events(&mut self) {
        let events = self.host.drain_events();
        for event in &events {
            if let NetplayEvent::StageStarting { selection, .. } = event {
                if !self.stalled_loading.contains(&HOST_ID) {
                    self.host.simulation_mut().load_stage();
                    self.host
                        .stage_loaded(selection.stage_id, self.now)
                        .expect("host stage load");
                }
            }
        }
        self.host_events.extend(events);

        for (index, client) in self.clients.iter_mut().enumerate() {
            let events = client.drain_events();
            for event in &events {
                if let NetplayEvent::StageStarting { selection, .. } = event {
                    if !self.stalled_loading.contains(&client.local_id()) {
                        client.simulation_mut().load_stage();
                        client
                            .stage_loaded(selection.stage_id, self.now)
                            .expect("client stage load");
                    }
                }
            }
            self.client_events[index].extend(events);
        }
    }

    /// Whether every participant reached the synced handshake phase
    pub fn all_synced(&self) -> bool {
        self.host.is_synced() && self.clients.iter().all(|client| client.is_synced())
    }

    /// Host hash history entry matched by every client at the same frame
    pub fn hashes_agree_at(&self, frame: Frame) -> bool {
        let Some(host_hash) = self.host.state().hash_at(frame) else {
            return false;
        };
        self.clients
            .iter()
            .all(|client| client.state().hash_at(frame) == Some(host_hash))
    }
}
