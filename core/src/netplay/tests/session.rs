//! Handshake, steady-state sync, epochs and pacing

use rollsync_shared::QuantizedInput;

use super::{P1, P2, count, settled_hash_frame, synced_stage};
use crate::net::loopback::LinkConditions;
use crate::net::protocol::{FrameBatch, InputBatch, InputEntry, NetMessage};
use crate::net::transport::TransportEvent;
use crate::netplay::{HandshakePhase, NetplayConfig, NetplayEvent};
use crate::simulation::Simulation;
use crate::test_utils::{HOST_ID, NetplayHarness, STEP, TestSim, input};

#[test]
fn test_handshake_reaches_sync() {
    let mut h = NetplayHarness::new(2, LinkConditions::perfect());
    assert_eq!(h.host.handshake(), HandshakePhase::Loading);

    h.start_stage(1);
    assert_eq!(h.host.handshake(), HandshakePhase::AwaitingStageReady);
    assert_eq!(h.host.current_frame(), 0);

    assert!(h.pump_until(60, NetplayHarness::all_synced));
    let seq = h.host.stage_seq();
    for (index, client) in h.clients.iter().enumerate() {
        assert_eq!(client.stage_seq(), seq);
        assert_eq!(
            count(&h.client_events[index], |e| matches!(e, NetplayEvent::StageSynced { .. })),
            1
        );
    }
    assert_eq!(
        count(&h.host_events, |e| matches!(e, NetplayEvent::StageSynced { .. })),
        1
    );
}

#[test]
fn test_lost_start_is_resent() {
    let mut h = NetplayHarness::new(1, LinkConditions::perfect());
    h.network.set_partitioned(HOST_ID, P1, true);
    h.start_stage(1);
    h.pump_for(10);
    h.network.set_partitioned(HOST_ID, P1, false);

    let starts = |h: &NetplayHarness| {
        count(&h.client_events[0], |e| matches!(e, NetplayEvent::StageStarting { .. }))
    };
    assert_eq!(starts(&h), 0);
    assert_eq!(h.host.handshake(), HandshakePhase::AwaitingStageReady);

    // One resend interval plus slack, well short of the forced-sync timeout
    let resend = h.host.config().handshake.resend();
    let steps = (resend.as_micros() / STEP.as_micros()) as usize + 30;
    assert!(h.pump_until(steps, |h| starts(h) == 1));
    assert!(h.pump_until(60, NetplayHarness::all_synced));
    assert_eq!(h.client(P1).stage_seq(), h.host.stage_seq());
    assert_eq!(starts(&h), 1);
}

#[test]
fn test_steady_play_keeps_hashes_in_agreement() {
    let mut h = NetplayHarness::new(2, LinkConditions::perfect());
    h.inputs = vec![input(3, 0), input(-2, 5), input(1, 1)];
    synced_stage(&mut h, 1);
    h.pump_for(180);

    let frame = settled_hash_frame(&h);
    assert!(frame >= 150, "host only reached {}", h.host.current_frame());
    assert!(h.hashes_agree_at(frame), "hashes differ at frame {frame}");

    // Early frames ran on predicted client inputs and had to be corrected
    assert!(h.host.session().stats().rollbacks > 0);
    for events in &h.client_events {
        assert_eq!(
            count(events, |e| matches!(e, NetplayEvent::DesyncDetected { .. })),
            0
        );
    }
}

#[test]
fn test_clients_lead_the_host() {
    let mut h = NetplayHarness::new(1, LinkConditions::perfect());
    h.inputs = vec![input(1, 0), input(0, 1)];
    synced_stage(&mut h, 1);
    h.pump_for(240);

    let host = h.host.current_frame();
    let client = h.client(P1).current_frame();
    assert!(client > host, "client {client} should lead host {host}");
    assert!(client <= host + 16, "client {client} ran away from host {host}");

    assert_eq!(h.host.last_report().rate_scale, 1.0);
    assert!(h.host.rtt().is_none());
    assert!(h.client(P1).rtt().is_some());
    assert!(h.client(P1).state().last_acked_local_frame().is_some());
}

#[test]
fn test_stage_transition_opens_new_epoch() {
    let mut h = NetplayHarness::new(2, LinkConditions::perfect());
    h.inputs = vec![input(1, 2), input(2, 1), input(-1, 0)];
    synced_stage(&mut h, 1);
    h.pump_for(90);
    let first_seq = h.host.stage_seq();

    synced_stage(&mut h, 2);
    let second_seq = h.host.stage_seq();
    assert_eq!(second_seq, first_seq.wrapping_add(1));

    for (index, client) in h.clients.iter().enumerate() {
        assert_eq!(client.stage_seq(), second_seq);
        assert_eq!(
            client.selection().map(|selection| selection.stage_id.0),
            Some(2)
        );
        assert_eq!(
            count(&h.client_events[index], |e| matches!(e, NetplayEvent::StageStarting { .. })),
            2
        );
        assert!(client.current_frame() < 30, "history restarts with the stage");
    }

    h.pump_for(120);
    assert!(h.hashes_agree_at(settled_hash_frame(&h)));
}

#[test]
fn test_messages_from_previous_epoch_are_dropped() {
    let mut h = NetplayHarness::new(1, LinkConditions::perfect());
    synced_stage(&mut h, 1);
    let old_seq = h.host.stage_seq();
    synced_stage(&mut h, 2);
    let new_seq = h.host.stage_seq();

    let frame = h.host.current_frame() + 1;
    let spoof = input(90, 90);
    let batch = |stage_seq| NetMessage::InputBatch(InputBatch {
        stage_seq,
        player: P1,
        last_ack: None,
        entries: vec![InputEntry { frame, input: spoof }],
    });

    let now = h.now;
    h.host
        .handle_event(TransportEvent::Message { from: P1, message: batch(old_seq) }, now)
        .unwrap();
    assert_ne!(h.host.state().ledger.received(frame, P1), Some(spoof));

    h.host
        .handle_event(TransportEvent::Message { from: P1, message: batch(new_seq) }, now)
        .unwrap();
    assert_eq!(h.host.state().ledger.received(frame, P1), Some(spoof));

    // Client side: a stale frame batch must not move acks
    let stale = NetMessage::FrameBatch(FrameBatch {
        stage_seq: old_seq,
        last_ack: Some(99_999),
        frames: Vec::new(),
    });
    h.client_mut(P1)
        .handle_event(TransportEvent::Message { from: HOST_ID, message: stale }, now)
        .unwrap();
    assert_ne!(h.client(P1).state().last_acked_local_frame(), Some(99_999));
}

#[test]
fn test_inputs_outside_window_are_ignored() {
    let mut h = NetplayHarness::new(1, LinkConditions::perfect());
    synced_stage(&mut h, 1);
    h.pump_for(30);

    let seq = h.host.stage_seq();
    let far = h.host.current_frame() + 500;
    let acked = h.host.state().client(P1).unwrap().last_acked_client_input;
    let now = h.now;
    let message = NetMessage::InputBatch(InputBatch {
        stage_seq: seq,
        player: P1,
        last_ack: None,
        entries: vec![InputEntry { frame: far, input: input(4, 4) }],
    });
    h.host
        .handle_event(TransportEvent::Message { from: P1, message }, now)
        .unwrap();
    assert_eq!(h.host.state().ledger.received(far, P1), None);

    // Rejected entries do not count as received
    let client = h.host.state().client(P1).unwrap();
    assert_eq!(client.last_acked_client_input, acked);
    assert!(acked.is_some_and(|frame| frame < far));
}

#[test]
fn test_host_forces_sync_after_timeout() {
    let mut h = NetplayHarness::new(2, LinkConditions::perfect());
    h.stalled_loading.push(P1);
    h.start_stage(1);

    h.pump_for(120);
    assert!(!h.host.is_synced());
    assert_eq!(h.host.current_frame(), 0);
    assert_eq!(h.client(P2).handshake(), HandshakePhase::AwaitingStageSync);

    assert!(h.pump_until(900, |h| h.host.is_synced()));
    assert!(h.pump_until(10, |h| h.client(P2).is_synced()));
    assert_eq!(h.client(P1).handshake(), HandshakePhase::Loading);
}

#[test]
fn test_intro_scales_client_lead() {
    let mut h = NetplayHarness::with_config(
        1,
        LinkConditions::perfect(),
        NetplayConfig::default(),
        || TestSim::with_intro(180),
    );
    h.inputs = vec![input(1, 1), input(-1, 1)];
    synced_stage(&mut h, 1);

    assert!(h.pump_until(120, |h| h.host.simulation().world.tick >= 30));
    let host = h.host.current_frame();
    let client = h.client(P1).current_frame();
    assert!(h.client(P1).simulation().intro().is_some());
    assert!(client <= host + 3, "client {client} too far ahead of host {host} during intro");
    let report = h.client(P1).last_report();
    assert!((0.85..=1.35).contains(&report.rate_scale));

    h.pump_for(300);
    assert!(h.client(P1).simulation().intro().is_none());
    assert!(h.client(P1).current_frame() > h.host.current_frame());
}

#[test]
fn test_spectating_client_sends_acks_only() {
    let mut h = NetplayHarness::new(1, LinkConditions::perfect());
    synced_stage(&mut h, 1);
    h.pump_for(30);

    let late = h.add_client(NetplayConfig::default(), TestSim::new);
    h.inputs[2] = QuantizedInput::new(9, 9, 0);
    assert!(h.pump_until(120, |h| h.client(late).is_synced()));
    h.pump_for(60);

    let frame = h.host.current_frame();
    assert_eq!(h.host.state().ledger.received(frame, late), None);
    let client = h.host.state().client(late).unwrap();
    assert!(client.last_acked_host_frame.is_some());
    assert!(client.last_acked_client_input.is_none());
}
