//! Tests for rollback session

use rollsync_shared::{Frame, PlayerId};

use crate::rollback::config::RollbackConfig;
use crate::rollback::inputs::FrameInputs;
use crate::simulation::Simulation;
use crate::test_utils::{TestSim, input};

use super::{RollbackError, RollbackSession};

const P1: PlayerId = PlayerId(1);

fn primed_session(window: u32) -> RollbackSession<TestSim> {
    let mut session = RollbackSession::new(TestSim::new(), RollbackConfig::with_window(window));
    session.prime(0).unwrap();
    session
}

fn inputs_for(x: i8) -> FrameInputs {
    [(P1, input(x, 0))].into_iter().collect()
}

fn advance_range(session: &mut RollbackSession<TestSim>, frames: std::ops::RangeInclusive<Frame>) {
    for frame in frames {
        session.advance_to(frame, inputs_for(10)).unwrap();
    }
}

#[test]
fn test_prime_records_initial_state() {
    let session = primed_session(30);
    assert_eq!(session.frame(), 0);
    assert!(session.state_at(0).is_some());
    assert_eq!(session.inputs_at(0), Some(&FrameInputs::new()));
}

#[test]
fn test_advance_records_state_and_inputs() {
    let mut session = primed_session(30);
    session.advance_to(1, inputs_for(10)).unwrap();
    assert_eq!(session.frame(), 1);
    assert_eq!(session.inputs_at(1), Some(&inputs_for(10)));
    assert_eq!(session.simulation().world.tick, 1);
    assert_eq!(session.simulation().body(P1).x, 10);
}

#[test]
fn test_rollback_then_resim_matches_straight_run() {
    let mut straight = primed_session(30);
    advance_range(&mut straight, 1..=10);
    let expected = straight.state_at(10).cloned().unwrap();

    let mut session = primed_session(30);
    advance_range(&mut session, 1..=10);
    session.rollback_to(5).unwrap();
    assert_eq!(session.frame(), 5);
    advance_range(&mut session, 6..=10);

    assert_eq!(session.state_at(10), Some(&expected));
    assert_eq!(session.hash(), straight.hash());
}

#[test]
fn test_rollback_restores_exact_prior_state() {
    let mut session = primed_session(30);
    advance_range(&mut session, 1..=10);
    let at_four = session.state_at(4).cloned().unwrap();
    session.rollback_to(4).unwrap();
    assert_eq!(session.simulation().save_state().unwrap(), at_four);
}

#[test]
fn test_rollback_window_boundary() {
    let mut session = primed_session(30);
    advance_range(&mut session, 1..=100);

    // 100 - 30 = 70 is the oldest retained frame.
    assert_eq!(session.oldest_frame(), Some(70));
    session.rollback_to(70).unwrap();
    assert_eq!(session.frame(), 70);

    let err = session.rollback_to(69).unwrap_err();
    assert!(matches!(
        err,
        RollbackError::FramePruned {
            frame: 69,
            oldest: Some(70)
        }
    ));
    assert!(session.rollback_to(65).is_err());
    // A failed rollback leaves the session where it was.
    assert_eq!(session.frame(), 70);
    assert_eq!(session.stats().failed_rollbacks, 2);
}

#[test]
fn test_history_is_pruned_below_window() {
    let mut session = primed_session(30);
    advance_range(&mut session, 1..=100);
    for frame in 0..70 {
        assert!(session.state_at(frame).is_none(), "state {frame} retained");
        assert!(session.inputs_at(frame).is_none(), "inputs {frame} retained");
    }
    for frame in 70..=100 {
        assert!(session.state_at(frame).is_some());
    }
}

#[test]
fn test_rollback_to_future_frame_fails() {
    let mut session = primed_session(30);
    advance_range(&mut session, 1..=3);
    assert!(session.rollback_to(9).is_err());
}

#[test]
fn test_reset_discards_history() {
    let mut session = primed_session(30);
    advance_range(&mut session, 1..=5);
    session.reset(5).unwrap();
    assert_eq!(session.oldest_frame(), Some(5));
    assert!(session.state_at(3).is_none());
    assert_eq!(session.frame(), 5);
}

#[test]
fn test_suppressed_advances_are_not_presented() {
    let mut session = primed_session(30);
    advance_range(&mut session, 1..=4);
    session.rollback_to(1).unwrap();

    session.set_suppress_visuals(true);
    advance_range(&mut session, 2..=4);
    session.set_suppress_visuals(false);

    let sim = session.simulation();
    assert_eq!(sim.visible_frames, 4);
    assert_eq!(sim.suppressed_frames, 3);
    let stats = session.stats();
    assert_eq!(stats.frames_advanced, 4);
    assert_eq!(stats.frames_resimulated, 3);
    assert_eq!(stats.rollbacks, 1);
}

#[test]
fn test_rollback_with_corrected_inputs_diverges() {
    let mut session = primed_session(30);
    advance_range(&mut session, 1..=6);
    let original = session.hash();

    session.rollback_to(3).unwrap();
    session.advance_to(4, inputs_for(-20)).unwrap();
    advance_range(&mut session, 5..=6);
    assert_ne!(session.hash(), original);
}
