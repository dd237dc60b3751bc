//! In-memory loopback network
//!
//! Connects any number of [`LoopbackTransport`] endpoints inside one process.
//! Every packet goes through the real wire framing and is subject to the
//! configured [`LinkConditions`] (latency, jitter, loss), driven by a seeded
//! PCG generator so a run is reproducible for a given seed.
//!
//! Time does not flow on its own: the owner calls
//! [`LoopbackNetwork::advance_to`] to deliver packets whose delivery time
//! has passed.

mod network;

#[cfg(test)]
mod tests;

pub use network::{LinkConditions, LoopbackNetwork, LoopbackStats, LoopbackTransport};
