//! Tests for the loopback network

use std::time::{Duration, Instant};

use rollsync_shared::PlayerId;

use crate::net::protocol::NetMessage;
use crate::net::transport::{Transport, TransportError, TransportEvent};

use super::{LinkConditions, LoopbackNetwork};

const A: PlayerId = PlayerId(0);
const B: PlayerId = PlayerId(1);
const C: PlayerId = PlayerId(2);

fn drain(transport: &mut impl Transport) -> Vec<TransportEvent> {
    std::iter::from_fn(|| transport.poll()).collect()
}

#[test]
fn test_connect_notifies_both_sides() {
    let now = Instant::now();
    let network = LoopbackNetwork::new(LinkConditions::perfect(), 1, now);
    let mut a = network.endpoint(A);
    let mut b = network.endpoint(B);

    network.connect(A, B);
    network.connect(A, B);

    assert_eq!(drain(&mut a), vec![TransportEvent::Connected(B)]);
    assert_eq!(drain(&mut b), vec![TransportEvent::Connected(A)]);
}

#[test]
fn test_send_requires_link() {
    let now = Instant::now();
    let network = LoopbackNetwork::new(LinkConditions::perfect(), 1, now);
    let mut a = network.endpoint(A);
    let _b = network.endpoint(B);

    let result = a.send_to(B, &NetMessage::Ping(1));
    assert!(matches!(result, Err(TransportError::UnknownPeer(B))));
}

#[test]
fn test_latency_delays_delivery() {
    let start = Instant::now();
    let conditions = LinkConditions::new(Duration::from_millis(50), Duration::ZERO, 0.0);
    let network = LoopbackNetwork::new(conditions, 1, start);
    let mut a = network.endpoint(A);
    let mut b = network.endpoint(B);
    network.connect(A, B);
    drain(&mut b);

    a.send_to(B, &NetMessage::Ping(9)).unwrap();
    network.advance_to(start + Duration::from_millis(49));
    assert!(drain(&mut b).is_empty());
    assert_eq!(network.in_flight(), 1);

    network.advance_to(start + Duration::from_millis(50));
    assert_eq!(
        drain(&mut b),
        vec![TransportEvent::Message {
            from: A,
            message: NetMessage::Ping(9)
        }]
    );
}

#[test]
fn test_delivery_preserves_send_order_without_jitter() {
    let start = Instant::now();
    let network = LoopbackNetwork::new(LinkConditions::perfect(), 1, start);
    let mut a = network.endpoint(A);
    let mut b = network.endpoint(B);
    network.connect(A, B);
    drain(&mut b);

    for n in 0..5 {
        a.send_to(B, &NetMessage::Pong(n)).unwrap();
    }
    network.advance_to(start);

    let pongs: Vec<u32> = drain(&mut b)
        .into_iter()
        .filter_map(|event| match event {
            TransportEvent::Message {
                message: NetMessage::Pong(n),
                ..
            } => Some(n),
            _ => None,
        })
        .collect();
    assert_eq!(pongs, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_total_loss_drops_everything() {
    let start = Instant::now();
    let conditions = LinkConditions::new(Duration::ZERO, Duration::ZERO, 1.0);
    let network = LoopbackNetwork::new(conditions, 1, start);
    let mut a = network.endpoint(A);
    let mut b = network.endpoint(B);
    network.connect(A, B);
    drain(&mut b);

    for n in 0..10 {
        a.send_to(B, &NetMessage::Ping(n)).unwrap();
    }
    network.advance_to(start + Duration::from_secs(1));

    assert!(drain(&mut b).is_empty());
    let stats = network.stats();
    assert_eq!(stats.sent, 10);
    assert_eq!(stats.dropped, 10);
    assert_eq!(stats.delivered, 0);
}

#[test]
fn test_partial_loss_is_reproducible_per_seed() {
    fn delivered(seed: u64) -> u64 {
        let start = Instant::now();
        let conditions = LinkConditions::new(Duration::ZERO, Duration::from_millis(5), 0.3);
        let network = LoopbackNetwork::new(conditions, seed, start);
        let mut a = network.endpoint(A);
        let _b = network.endpoint(B);
        network.connect(A, B);
        for n in 0..200 {
            a.send_to(B, &NetMessage::Ping(n)).unwrap();
        }
        network.advance_to(start + Duration::from_secs(1));
        network.stats().delivered
    }

    let first = delivered(42);
    assert_eq!(first, delivered(42));
    assert!(first > 100 && first < 200, "delivered {first}");
}

#[test]
fn test_broadcast_reaches_all_peers() {
    let start = Instant::now();
    let network = LoopbackNetwork::new(LinkConditions::perfect(), 1, start);
    let mut a = network.endpoint(A);
    let mut b = network.endpoint(B);
    let mut c = network.endpoint(C);
    network.connect(A, B);
    network.connect(A, C);
    drain(&mut b);
    drain(&mut c);

    a.broadcast(&NetMessage::MatchEnd).unwrap();
    network.advance_to(start);

    assert_eq!(drain(&mut b).len(), 1);
    assert_eq!(drain(&mut c).len(), 1);
}

#[test]
fn test_disconnect_lands_after_in_flight_packets() {
    let start = Instant::now();
    let conditions = LinkConditions::new(Duration::from_millis(20), Duration::ZERO, 0.0);
    let network = LoopbackNetwork::new(conditions, 1, start);
    let mut a = network.endpoint(A);
    let mut b = network.endpoint(B);
    network.connect(A, B);
    drain(&mut a);
    drain(&mut b);

    a.send_to(B, &NetMessage::MatchEnd).unwrap();
    a.disconnect(B);
    assert_eq!(drain(&mut a), vec![TransportEvent::Disconnected(B)]);
    assert!(matches!(
        a.send_to(B, &NetMessage::Ping(1)),
        Err(TransportError::UnknownPeer(B))
    ));

    network.advance_to(start + Duration::from_millis(10));
    assert!(drain(&mut b).is_empty());

    network.advance_to(start + Duration::from_millis(20));
    assert_eq!(
        drain(&mut b),
        vec![
            TransportEvent::Message {
                from: A,
                message: NetMessage::MatchEnd
            },
            TransportEvent::Disconnected(A),
        ]
    );
}

#[test]
fn test_partition_is_silent_and_reversible() {
    let start = Instant::now();
    let network = LoopbackNetwork::new(LinkConditions::perfect(), 1, start);
    let mut a = network.endpoint(A);
    let mut b = network.endpoint(B);
    network.connect(A, B);
    drain(&mut b);

    network.set_partitioned(A, B, true);
    a.send_to(B, &NetMessage::Ping(1)).unwrap();
    network.advance_to(start);
    assert!(drain(&mut b).is_empty());

    network.set_partitioned(A, B, false);
    a.send_to(B, &NetMessage::Ping(2)).unwrap();
    network.advance_to(start);
    assert_eq!(drain(&mut b).len(), 1);
}

#[test]
fn test_link_override_applies_to_one_pair() {
    let start = Instant::now();
    let network = LoopbackNetwork::new(LinkConditions::perfect(), 1, start);
    let mut a = network.endpoint(A);
    let mut b = network.endpoint(B);
    let mut c = network.endpoint(C);
    network.connect(A, B);
    network.connect(A, C);
    network.set_link_conditions(
        A,
        C,
        LinkConditions::new(Duration::from_millis(100), Duration::ZERO, 0.0),
    );
    drain(&mut b);
    drain(&mut c);

    a.broadcast(&NetMessage::Ping(3)).unwrap();
    network.advance_to(start + Duration::from_millis(10));

    assert_eq!(drain(&mut b).len(), 1);
    assert!(drain(&mut c).is_empty());
}
