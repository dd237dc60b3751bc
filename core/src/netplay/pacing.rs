//! Drift-correction pacing
//!
//! A client aims to stay a few frames ahead of where it believes the host
//! is: far enough that its inputs reach the host before the host simulates
//! those frames. The gap between that target and the local simulation
//! position is the *drift*. It drives a clamped proportional playback rate,
//! plus forced and extra ticks when the gap grows too large for gradual
//! correction.
//!
//! Everything here is a pure function of its arguments.

use std::time::Duration;

use rollsync_shared::Frame;

use super::config::{PacingConfig, RateBand};
use crate::simulation::IntroTimer;

/// Extrapolated host frame.
///
/// `last_received` plus the frames the host should have simulated since it
/// arrived, capped at `max(1, max_rollback)` so a long silence cannot run
/// the estimate away.
pub fn estimated_host_frame(
    last_received: Frame,
    since_last: Option<Duration>,
    fixed_step: f64,
    max_rollback: u32,
) -> f64 {
    let Some(elapsed) = since_last else {
        return f64::from(last_received);
    };
    let max_advance = f64::from(max_rollback.max(1));
    let advance = (elapsed.as_secs_f64() / fixed_step).clamp(0.0, max_advance);
    f64::from(last_received) + advance
}

/// Intro lead scale in `0.0..=1.0`, ramping up as the intro runs out
pub fn intro_lead_scale(intro: Option<IntroTimer>) -> f64 {
    match intro {
        Some(timer) if timer.is_running() => {
            (1.0 - f64::from(timer.remaining) / f64::from(timer.total)).clamp(0.0, 1.0)
        }
        _ => 1.0,
    }
}

/// Frames a client should run ahead of the estimated host frame
pub fn lead_frames(
    config: &PacingConfig,
    rtt: Option<Duration>,
    fixed_step: f64,
    intro: Option<IntroTimer>,
) -> u32 {
    let mut lead = config.client_lead_frames;
    if let Some(rtt) = rtt.filter(|rtt| !rtt.is_zero()) {
        let rtt_frames = rtt.as_secs_f64() / fixed_step;
        let extra = (rtt_frames * 0.5).floor().max(0.0) as u32;
        lead += extra.min(config.client_max_extra_lead);
    }
    let scale = intro_lead_scale(intro);
    if scale >= 1.0 {
        lead
    } else {
        (f64::from(lead) * scale).floor() as u32
    }
}

/// Target minus the fractional simulation position
pub fn drift(target: f64, current: Frame, accumulator: f64, fixed_step: f64) -> f64 {
    target - (f64::from(current) + accumulator / fixed_step)
}

/// Whether a client is so far ahead it should stop ticking
pub fn is_too_far_ahead(drift: f64, slack: u32) -> bool {
    drift < -f64::from(slack)
}

/// Outcome of [`plan_ticks`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickPlan {
    /// Simulation ticks to run now
    pub ticks: u32,
    /// Playback rate applied to `dt`
    pub rate_scale: f64,
    /// Accumulator after adding scaled `dt`, before ticks are consumed
    pub accumulator: f64,
}

/// Decide how many ticks to run for `dt` seconds of wall-clock time.
///
/// `adjust_rate` is true for clients; the host always plays at 1.0.
pub fn plan_ticks(
    band: &RateBand,
    adjust_rate: bool,
    drift: f64,
    accumulator: f64,
    dt: f64,
    fixed_step: f64,
    max_frame_delta: u32,
) -> TickPlan {
    let rate_scale = if adjust_rate {
        (1.0 + drift * band.drift_gain).clamp(band.rate_min, band.rate_max)
    } else {
        1.0
    };

    let accumulator =
        (accumulator.max(0.0) + dt * rate_scale).min(fixed_step * f64::from(max_frame_delta));
    let mut ticks = (accumulator / fixed_step).floor() as u32;

    if ticks == 0 && drift > band.force_tick {
        ticks = 1;
    }
    if drift > band.extra_ticks {
        ticks = (ticks + band.extra_tick_boost).max(1).min(band.max_ticks);
    }

    TickPlan {
        ticks,
        rate_scale,
        accumulator,
    }
}
