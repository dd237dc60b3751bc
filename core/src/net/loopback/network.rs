//! Loopback network and endpoints

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use rollsync_shared::PlayerId;
use tracing::{debug, trace, warn};

use crate::net::protocol::NetMessage;
use crate::net::transport::{Transport, TransportError, TransportEvent};

/// Simulated link quality
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConditions {
    /// One-way base latency
    pub latency: Duration,
    /// Uniform extra delay in `0..=jitter`
    pub jitter: Duration,
    /// Probability in `0.0..=1.0` that a packet is dropped
    pub loss: f64,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self::perfect()
    }
}

impl LinkConditions {
    /// No latency, no loss
    pub fn perfect() -> Self {
        Self {
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            loss: 0.0,
        }
    }

    pub fn new(latency: Duration, jitter: Duration, loss: f64) -> Self {
        Self {
            latency,
            jitter,
            loss: loss.clamp(0.0, 1.0),
        }
    }
}

/// Packet counters for the whole network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    pub sent: u64,
    pub delivered: u64,
    /// Dropped by the loss roll or a partition
    pub dropped: u64,
    pub bytes_sent: u64,
}

/// Undirected link key
type Link = (PlayerId, PlayerId);

fn link(a: PlayerId, b: PlayerId) -> Link {
    if a <= b { (a, b) } else { (b, a) }
}

enum Payload {
    Packet(Vec<u8>),
    /// Remote end of a link closed by `from`
    Close,
}

struct InFlight {
    deliver_at: Instant,
    seq: u64,
    from: PlayerId,
    to: PlayerId,
    payload: Payload,
}

/// Queued for an endpoint. Packets stay framed until polled.
enum Delivery {
    Event(TransportEvent),
    Packet { from: PlayerId, bytes: Vec<u8> },
}

struct NetworkInner {
    conditions: LinkConditions,
    overrides: BTreeMap<Link, LinkConditions>,
    links: BTreeSet<Link>,
    partitioned: BTreeSet<Link>,
    inboxes: BTreeMap<PlayerId, VecDeque<Delivery>>,
    in_flight: Vec<InFlight>,
    rng: Pcg64Mcg,
    now: Instant,
    next_seq: u64,
    stats: LoopbackStats,
}

impl NetworkInner {
    fn conditions_for(&self, key: Link) -> LinkConditions {
        self.overrides.get(&key).copied().unwrap_or(self.conditions)
    }

    fn send(
        &mut self,
        from: PlayerId,
        to: PlayerId,
        message: &NetMessage,
    ) -> Result<(), TransportError> {
        let key = link(from, to);
        if !self.links.contains(&key) {
            return Err(TransportError::UnknownPeer(to));
        }

        let bytes = message.to_bytes();
        self.stats.sent += 1;
        self.stats.bytes_sent += bytes.len() as u64;

        let conditions = self.conditions_for(key);
        if self.partitioned.contains(&key) || self.rng.random::<f64>() < conditions.loss {
            self.stats.dropped += 1;
            trace!(%from, %to, kind = message.kind(), "Loopback packet dropped");
            return Ok(());
        }

        let jitter_us = conditions.jitter.as_micros() as u64;
        let jitter = if jitter_us > 0 {
            Duration::from_micros(self.rng.random_range(0..=jitter_us))
        } else {
            Duration::ZERO
        };

        let deliver_at = self.now + conditions.latency + jitter;
        self.schedule(deliver_at, from, to, Payload::Packet(bytes));
        Ok(())
    }

    fn schedule(&mut self, deliver_at: Instant, from: PlayerId, to: PlayerId, payload: Payload) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight.push(InFlight {
            deliver_at,
            seq,
            from,
            to,
            payload,
        });
    }

    fn push_event(&mut self, to: PlayerId, event: TransportEvent) {
        if let Some(inbox) = self.inboxes.get_mut(&to) {
            inbox.push_back(Delivery::Event(event));
        }
    }

    /// Close the link from `a`'s side.
    ///
    /// `a` is told at once. `b` is told once everything `a` already sent has
    /// landed, so a parting message arrives before the disconnect.
    fn disconnect(&mut self, a: PlayerId, b: PlayerId) {
        let key = link(a, b);
        if !self.links.remove(&key) {
            return;
        }
        debug!(%a, %b, "Loopback link down");
        self.push_event(a, TransportEvent::Disconnected(b));
        let conditions = self.conditions_for(key);
        let close_at = self.now + conditions.latency + conditions.jitter;
        self.schedule(close_at, a, b, Payload::Close);
    }
}

/// Shared in-process network.
///
/// Cloning yields another handle to the same network.
#[derive(Clone)]
pub struct LoopbackNetwork {
    inner: Rc<RefCell<NetworkInner>>,
}

impl LoopbackNetwork {
    /// Create a network with default `conditions` for every link
    pub fn new(conditions: LinkConditions, seed: u64, now: Instant) -> Self {
        Self {
            inner: Rc::new(RefCell::new(NetworkInner {
                conditions,
                overrides: BTreeMap::new(),
                links: BTreeSet::new(),
                partitioned: BTreeSet::new(),
                inboxes: BTreeMap::new(),
                in_flight: Vec::new(),
                rng: Pcg64Mcg::seed_from_u64(seed),
                now,
                next_seq: 0,
                stats: LoopbackStats::default(),
            })),
        }
    }

    /// Create the endpoint for `id`
    pub fn endpoint(&self, id: PlayerId) -> LoopbackTransport {
        self.inner.borrow_mut().inboxes.entry(id).or_default();
        LoopbackTransport {
            id,
            inner: Rc::clone(&self.inner),
        }
    }

    /// Bring up the link between `a` and `b`. Both sides see `Connected`.
    pub fn connect(&self, a: PlayerId, b: PlayerId) {
        let mut inner = self.inner.borrow_mut();
        if !inner.links.insert(link(a, b)) {
            return;
        }
        debug!(%a, %b, "Loopback link up");
        inner.push_event(a, TransportEvent::Connected(b));
        inner.push_event(b, TransportEvent::Connected(a));
    }

    /// Tear down the link between `a` and `b`. Both sides see `Disconnected`.
    ///
    /// Acts as if `a` closed the link.
    pub fn disconnect(&self, a: PlayerId, b: PlayerId) {
        self.inner.borrow_mut().disconnect(a, b);
    }

    /// Override conditions for the link between `a` and `b`
    pub fn set_link_conditions(&self, a: PlayerId, b: PlayerId, conditions: LinkConditions) {
        self.inner
            .borrow_mut()
            .overrides
            .insert(link(a, b), conditions);
    }

    /// Silently drop every packet between `a` and `b` while `partitioned`.
    ///
    /// Unlike [`disconnect`](Self::disconnect) neither side is told.
    pub fn set_partitioned(&self, a: PlayerId, b: PlayerId, partitioned: bool) {
        let mut inner = self.inner.borrow_mut();
        if partitioned {
            inner.partitioned.insert(link(a, b));
        } else {
            inner.partitioned.remove(&link(a, b));
        }
    }

    /// Move network time to `now` and deliver every packet that is due
    pub fn advance_to(&self, now: Instant) {
        let mut inner = self.inner.borrow_mut();
        if now > inner.now {
            inner.now = now;
        }
        let now = inner.now;

        let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.in_flight)
            .into_iter()
            .partition(|packet| packet.deliver_at <= now);
        inner.in_flight = pending;
        due.sort_by_key(|packet| (packet.deliver_at, packet.seq));

        for packet in due {
            let Some(inbox) = inner.inboxes.get_mut(&packet.to) else {
                inner.stats.dropped += 1;
                continue;
            };
            match packet.payload {
                Payload::Packet(bytes) => {
                    inbox.push_back(Delivery::Packet {
                        from: packet.from,
                        bytes,
                    });
                    inner.stats.delivered += 1;
                }
                Payload::Close => {
                    inbox.push_back(Delivery::Event(TransportEvent::Disconnected(packet.from)));
                }
            }
        }
    }

    /// Packets sent but not yet delivered or dropped
    pub fn in_flight(&self) -> usize {
        self.inner
            .borrow()
            .in_flight
            .iter()
            .filter(|packet| matches!(packet.payload, Payload::Packet(_)))
            .count()
    }

    pub fn stats(&self) -> LoopbackStats {
        self.inner.borrow().stats
    }
}

/// One participant's view of a [`LoopbackNetwork`]
pub struct LoopbackTransport {
    id: PlayerId,
    inner: Rc<RefCell<NetworkInner>>,
}

impl LoopbackTransport {
    pub fn local_id(&self) -> PlayerId {
        self.id
    }

    /// Peers this endpoint currently has a link to
    pub fn peers(&self) -> Vec<PlayerId> {
        let inner = self.inner.borrow();
        inner
            .links
            .iter()
            .filter_map(|&(a, b)| {
                if a == self.id {
                    Some(b)
                } else if b == self.id {
                    Some(a)
                } else {
                    None
                }
            })
            .collect()
    }
}

impl Transport for LoopbackTransport {
    fn send_to(&mut self, peer: PlayerId, message: &NetMessage) -> Result<(), TransportError> {
        self.inner.borrow_mut().send(self.id, peer, message)
    }

    fn broadcast(&mut self, message: &NetMessage) -> Result<(), TransportError> {
        for peer in self.peers() {
            self.send_to(peer, message)?;
        }
        Ok(())
    }

    fn poll(&mut self) -> Option<TransportEvent> {
        loop {
            let delivery = self
                .inner
                .borrow_mut()
                .inboxes
                .get_mut(&self.id)?
                .pop_front()?;

            match delivery {
                Delivery::Event(event) => return Some(event),
                Delivery::Packet { from, bytes } => match NetMessage::from_bytes(&bytes) {
                    Ok(message) => return Some(TransportEvent::Message { from, message }),
                    Err(e) => {
                        warn!(%from, to = %self.id, error = %e, "Dropping malformed packet");
                    }
                },
            }
        }
    }

    fn disconnect(&mut self, peer: PlayerId) {
        self.inner.borrow_mut().disconnect(self.id, peer);
    }
}
