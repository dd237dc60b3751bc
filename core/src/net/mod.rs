//! Networking for rollsync
//!
//! - [`protocol`] - Wire messages exchanged between host and clients
//! - [`transport`] - The peer channel abstraction the coordinator sends through
//! - [`loopback`] - In-process network with simulated latency and loss
//!
//! # Architecture
//!
//! ```text
//!                    ┌─────────────────────┐
//!                    │ NetplayCoordinator  │
//!                    └──────────┬──────────┘
//!                               │ NetMessage
//!                    ┌──────────▼──────────┐
//!                    │   Wire framing      │
//!                    │ [RSYN][ver][len]    │
//!                    └──────────┬──────────┘
//!                               │ bytes
//!                    ┌──────────▼──────────┐
//!                    │     Transport       │
//!                    │ (loopback, relay..) │
//!                    └─────────────────────┘
//! ```

pub mod loopback;
pub mod protocol;
pub mod transport;

pub use protocol::{MessageDirection, NetMessage, WireError};
pub use transport::{Transport, TransportError, TransportEvent};
