//! Arena: a small deterministic simulation for exercising the protocol
//!
//! Each player steers a puck around a walled arena. Pucks bounce off the
//! walls and off each other, so one wrong input anywhere changes every
//! later state. The whole world is a `Pod` struct saved with `bytemuck`.

use bytemuck::{Pod, Zeroable};
use rollsync_core::{
    FrameInputs, IntroTimer, Presentation, Simulation, SimulationError, StateBlob,
};
use rollsync_shared::PlayerId;

pub const MAX_PUCKS: usize = 8;

/// Half extent of the arena in fixed-point units
const ARENA_HALF: i32 = 64_000;
const PUCK_RADIUS: i32 = 1_500;
const MAX_SPEED: i32 = 900;
const BOOST_BUTTON: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Puck {
    pub x: i32,
    pub y: i32,
    pub vx: i32,
    pub vy: i32,
    pub bounces: u32,
    pub active: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ArenaWorld {
    pub tick: u32,
    pub seed: u32,
    pub pucks: [Puck; MAX_PUCKS],
}

#[derive(Debug, Default)]
pub struct ArenaSim {
    world: ArenaWorld,
    intro_frames: u32,
    /// Inject a one-off corruption at this tick
    diverge_at: Option<u32>,
    /// Ticks presented with visuals on
    pub visible_ticks: u64,
}

impl ArenaSim {
    pub fn new(intro_frames: u32, diverge_at: Option<u32>) -> Self {
        Self {
            intro_frames,
            diverge_at,
            ..Self::default()
        }
    }

    /// Reset the arena for a stage. Spawn points derive from the stage seed.
    pub fn load_stage(&mut self, seed: u64) {
        let seed = (seed ^ (seed >> 32)) as u32;
        let mut world = ArenaWorld {
            tick: 0,
            seed,
            ..ArenaWorld::default()
        };
        for (slot, puck) in world.pucks.iter_mut().enumerate() {
            let angle = (slot as i32 * 45 + (seed % 45) as i32) % 360;
            let (sx, sy) = spawn_offset(angle);
            puck.x = sx;
            puck.y = sy;
        }
        self.world = world;
    }

    pub fn world(&self) -> &ArenaWorld {
        &self.world
    }

    fn slot(player: PlayerId) -> usize {
        usize::from(player.0) % MAX_PUCKS
    }

    fn collide(&mut self) {
        let pucks = &mut self.world.pucks;
        for a in 0..MAX_PUCKS {
            for b in (a + 1)..MAX_PUCKS {
                if pucks[a].active == 0 || pucks[b].active == 0 {
                    continue;
                }
                let dx = pucks[b].x - pucks[a].x;
                let dy = pucks[b].y - pucks[a].y;
                let reach = 2 * PUCK_RADIUS;
                if dx.abs() < reach && dy.abs() < reach {
                    let (va, vb) = ((pucks[a].vx, pucks[a].vy), (pucks[b].vx, pucks[b].vy));
                    pucks[a].vx = vb.0;
                    pucks[a].vy = vb.1;
                    pucks[b].vx = va.0;
                    pucks[b].vy = va.1;
                    pucks[a].bounces += 1;
                    pucks[b].bounces += 1;
                }
            }
        }
    }
}

/// Integer-only spawn ring (coarse octants, no floats in the state path)
fn spawn_offset(angle: i32) -> (i32, i32) {
    const RING: i32 = ARENA_HALF / 2;
    match angle / 45 {
        0 => (RING, 0),
        1 => (RING * 7 / 10, RING * 7 / 10),
        2 => (0, RING),
        3 => (-RING * 7 / 10, RING * 7 / 10),
        4 => (-RING, 0),
        5 => (-RING * 7 / 10, -RING * 7 / 10),
        6 => (0, -RING),
        _ => (RING * 7 / 10, -RING * 7 / 10),
    }
}

fn reflect(position: &mut i32, velocity: &mut i32) -> bool {
    let limit = ARENA_HALF - PUCK_RADIUS;
    if *position > limit {
        *position = 2 * limit - *position;
        *velocity = -*velocity;
        true
    } else if *position < -limit {
        *position = -2 * limit - *position;
        *velocity = -*velocity;
        true
    } else {
        false
    }
}

impl Simulation for ArenaSim {
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
        self.world = bytemuck::try_pod_read_unaligned::<ArenaWorld>(&state.data)
            .map_err(|e| SimulationError::Load(e.to_string()))?;
        Ok(())
    }

    fn advance_frame(&mut self, inputs: &FrameInputs, presentation: Presentation) {
        self.world.tick += 1;
        let frozen = self.intro().is_some();

        for puck in self.world.pucks.iter_mut() {
            puck.active = 0;
        }
        for (player, input) in inputs.iter() {
            let puck = &mut self.world.pucks[Self::slot(player)];
            puck.active = 1;
            if frozen {
                continue;
            }
            let thrust = if input.buttons & BOOST_BUTTON != 0 { 24 } else { 12 };
            puck.vx = (puck.vx * 31 / 32 + i32::from(input.x) * thrust / 8)
                .clamp(-MAX_SPEED, MAX_SPEED);
            puck.vy = (puck.vy * 31 / 32 + i32::from(input.y) * thrust / 8)
                .clamp(-MAX_SPEED, MAX_SPEED);
        }

        for puck in self.world.pucks.iter_mut().filter(|p| p.active != 0) {
            puck.x += puck.vx;
            puck.y += puck.vy;
            let hit_x = reflect(&mut puck.x, &mut puck.vx);
            let hit_y = reflect(&mut puck.y, &mut puck.vy);
            if hit_x || hit_y {
                puck.bounces += 1;
            }
        }
        self.collide();

        if self.diverge_at == Some(self.world.tick) {
            self.diverge_at = None;
            self.world.pucks[0].x ^= 0x55;
        }
        if presentation == Presentation::Visible {
            self.visible_ticks += 1;
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
