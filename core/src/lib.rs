//! Rollsync Core - rollback netcode for host-authoritative multiplayer
//!
//! This crate provides the deterministic rollback engine and the netplay
//! protocol that keeps a host and its clients converged on the same
//! simulation.
//!
//! # Architecture
//!
//! - [`Simulation`] - Trait implemented by the game's deterministic tick
//! - [`RollbackSession`] - Frame-indexed state history and resimulation
//! - [`NetplayCoordinator`] - Host/client protocol, pacing and recovery
//! - [`Transport`] - Message channel the coordinator talks through

pub mod net;
pub mod netplay;
pub mod rollback;
pub mod simulation;
#[cfg(test)]
pub(crate) mod test_utils;

// Re-export core traits and types
pub use simulation::{IntroTimer, Presentation, Simulation, SimulationError};

// Re-export rollback types
pub use rollback::{
    DEFAULT_MAX_ROLLBACK_FRAMES, FrameInputs, InputLedger, RollbackConfig, RollbackError,
    RollbackSession, RollbackStats, StateBlob,
};

// Re-export netplay types
pub use net::{NetMessage, Transport, TransportError, TransportEvent, WireError};
pub use netplay::{
    NetplayConfig, NetplayCoordinator, NetplayError, NetplayEvent, Role, TickReport,
};
