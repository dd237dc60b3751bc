//! Host-authoritative rollback netplay
//!
//! A star topology: one host, any number of clients. Every peer simulates
//! locally with rollback; the host's bundles and hash claims are the
//! authority.
//!
//! # Protocol Flow
//!
//! ```text
//! Host                                   Client
//!  |                                       |
//!  |-- PlayerJoin / RoomUpdate / Profile ->|  on connect
//!  |-- Start(seq, stage) ----------------->|  new epoch, both load
//!  |<-------------------- StageReady(seq) -|  resent until synced
//!  |-- StageSync(seq, frame) ------------->|  everyone ready (or timeout)
//!  |                                       |
//!  |<----- InputBatch(unacked, last_ack) --|  every client tick
//!  |-- FrameBatch(bundles, hash claim) --->|  every host tick
//!  |<------------ SnapshotRequest(reason) -|  mismatch, lag, host stall
//!  |-- Snapshot(frame, state) ------------>|
//! ```
//!
//! # Pacing
//!
//! Clients run a few frames ahead of their estimate of the host frame so
//! their inputs arrive before the host simulates them. See [`pacing`].
//!
//! # Module Structure
//!
//! - `config`: tunables, loadable from TOML
//! - `coordinator`: [`NetplayCoordinator`], split into host, client and
//!   resimulation halves
//! - `events`: application-facing events and errors
//! - `handshake`: stage load handshake state machine
//! - `pacing`: drift correction math
//! - `state`: per-stage bookkeeping

pub mod config;
mod coordinator;
mod events;
pub mod handshake;
pub mod pacing;
mod state;

#[cfg(test)]
mod tests;

pub use config::{ConfigError, NetplayConfig};
pub use coordinator::NetplayCoordinator;
pub use events::{NetplayError, NetplayEvent, TickReport};
pub use handshake::{HandshakePhase, StageHandshake};
pub use state::{ClientState, NetplayState, PingTracker, PlayerSlot, Role};
