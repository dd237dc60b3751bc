//! Transport abstraction
//!
//! The coordinator talks to peers through [`Transport`]. Implementations are
//! unreliable and unordered: messages may be dropped, duplicated by resends,
//! or arrive out of order. The protocol layer is responsible for idempotence
//! and staleness rejection.

use rollsync_shared::PlayerId;

use super::protocol::NetMessage;

/// Events surfaced by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A peer link came up
    Connected(PlayerId),
    /// A peer link went down
    Disconnected(PlayerId),
    /// A message arrived from `from`
    Message { from: PlayerId, message: NetMessage },
}

/// Error type for transport send operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No link to the addressed peer
    #[error("no link to peer {0}")]
    UnknownPeer(PlayerId),
}

/// Message-based peer channel
pub trait Transport {
    /// Send `message` to one peer
    fn send_to(&mut self, peer: PlayerId, message: &NetMessage) -> Result<(), TransportError>;

    /// Send `message` to every connected peer
    fn broadcast(&mut self, message: &NetMessage) -> Result<(), TransportError>;

    /// Next pending event, if any
    fn poll(&mut self) -> Option<TransportEvent>;

    /// Drop the link to `peer`
    fn disconnect(&mut self, peer: PlayerId);
}
