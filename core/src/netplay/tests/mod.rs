//! Scenario tests: full host/client sessions over the loopback network

mod session;

use rollsync_shared::PlayerId;

use crate::netplay::NetplayEvent;
use crate::test_utils::NetplayHarness;

const P1: PlayerId = PlayerId(1);
const P2: PlayerId = PlayerId(2);

/// Latest hashed frame that every participant has settled
fn settled_hash_frame(h: &NetplayHarness) -> u32 {
    let interval = h.host.config().session.hash_interval;
    h.host.current_frame().saturating_sub(10) / interval * interval
}

fn count(events: &[NetplayEvent], pred: impl Fn(&NetplayEvent) -> bool) -> usize {
    events.iter().filter(|event| pred(event)).count()
}

fn synced_stage(h: &mut NetplayHarness, stage: u32) {
    h.start_stage(stage);
    assert!(
        h.pump_until(120, NetplayHarness::all_synced),
        "stage {stage} never synced"
    );
}
