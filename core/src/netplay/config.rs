//! Netplay tuning (`[netplay]` TOML tables)
//!
//! Every tunable of the synchronization protocol lives here, grouped into
//! sections. All fields have defaults, so an empty file (or no file) yields
//! the stock configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rollback::{DEFAULT_MAX_ROLLBACK_FRAMES, RollbackConfig};

/// Complete netplay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NetplayConfig {
    /// Rollback window, resend window and hashing
    #[serde(default)]
    pub session: SessionConfig,
    /// Client drift correction
    #[serde(default)]
    pub pacing: PacingConfig,
    /// Stage-ready/stage-sync handshake
    #[serde(default)]
    pub handshake: HandshakeConfig,
    /// Snapshot rate limits
    #[serde(default)]
    pub snapshots: SnapshotConfig,
    /// Host input acceptance window
    #[serde(default)]
    pub inputs: InputWindowConfig,
    /// Room limits and presence rate limits
    #[serde(default)]
    pub room: RoomLimits,
}

/// Core session parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Frames of history kept for rollback (default: 30)
    #[serde(default = "default_max_rollback")]
    pub max_rollback_frames: u32,
    /// Frames resent each tick to cover packet loss (default: 8)
    #[serde(default = "default_max_resend")]
    pub max_resend_frames: u32,
    /// Hash every N frames, 0 disables desync detection (default: 15)
    #[serde(default = "default_hash_interval")]
    pub hash_interval: u32,
    /// Simulation rate (default: 60)
    #[serde(default = "default_tick_rate")]
    pub tick_rate_hz: u32,
    /// Accumulator cap in ticks, bounds catch-up after a stall (default: 5)
    #[serde(default = "default_max_frame_delta")]
    pub max_frame_delta: u32,
}

/// One set of rate-correction parameters.
///
/// Two bands exist: steady play and the intro countdown, where clients
/// converge faster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateBand {
    /// Slowest playback rate
    pub rate_min: f64,
    /// Fastest playback rate
    pub rate_max: f64,
    /// Rate change per frame of drift
    pub drift_gain: f64,
    /// Drift above which at least one tick runs
    pub force_tick: f64,
    /// Drift above which extra ticks are added
    pub extra_ticks: f64,
    /// Ticks added past `extra_ticks`
    pub extra_tick_boost: u32,
    /// Tick cap once extra ticks kick in
    pub max_ticks: u32,
}

impl RateBand {
    pub fn steady() -> Self {
        Self {
            rate_min: 0.9,
            rate_max: 1.1,
            drift_gain: 0.05,
            force_tick: 3.0,
            extra_ticks: 6.0,
            extra_tick_boost: 1,
            max_ticks: 3,
        }
    }

    pub fn intro() -> Self {
        Self {
            rate_min: 0.85,
            rate_max: 1.35,
            drift_gain: 0.1,
            force_tick: 1.0,
            extra_ticks: 2.0,
            extra_tick_boost: 2,
            max_ticks: 6,
        }
    }
}

/// Client drift-correction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Base frames a client runs ahead of the estimated host frame (default: 2)
    #[serde(default = "default_client_lead")]
    pub client_lead_frames: u32,
    /// Cap on RTT-derived extra lead (default: 12)
    #[serde(default = "default_client_max_extra_lead")]
    pub client_max_extra_lead: u32,
    /// Frames ahead of target before a client stops ticking (default: 2)
    #[serde(default = "default_client_ahead_slack")]
    pub client_ahead_slack: u32,
    #[serde(default = "RateBand::steady")]
    pub steady: RateBand,
    #[serde(default = "RateBand::intro")]
    pub intro: RateBand,
    /// Drift that arms the lag fuse (default: 24)
    #[serde(default = "default_lag_fuse_frames")]
    pub lag_fuse_frames: u32,
    /// Time the fuse must stay armed before a snapshot request (default: 500)
    #[serde(default = "default_lag_fuse_ms")]
    pub lag_fuse_ms: u64,
    /// Host silence before a client asks for a snapshot (default: 3000)
    #[serde(default = "default_host_stall_ms")]
    pub host_stall_ms: u64,
    /// RTT ping interval (default: 1000)
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
}

/// Stage handshake timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Client `stage_ready` resend interval (default: 2000)
    #[serde(default = "default_stage_ready_resend_ms")]
    pub stage_ready_resend_ms: u64,
    /// Host gives up waiting for readiness after this long (default: 12000)
    #[serde(default = "default_stage_ready_timeout_ms")]
    pub stage_ready_timeout_ms: u64,
}

/// Snapshot rate limits.
///
/// A verified mismatch may re-request sooner than suspected lag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Client cooldown after a lag request, host cooldown per requesting
    /// client (default: 1000)
    #[serde(default = "default_lag_cooldown_ms")]
    pub lag_cooldown_ms: u64,
    /// Client cooldown after a mismatch request (default: 250)
    #[serde(default = "default_mismatch_cooldown_ms")]
    pub mismatch_cooldown_ms: u64,
    /// Host cooldown between unsolicited snapshots to one client (default: 1500)
    #[serde(default = "default_host_push_cooldown_ms")]
    pub host_push_cooldown_ms: u64,
    /// Ack lag at which the host pushes a snapshot (default: 120)
    #[serde(default = "default_host_push_behind_frames")]
    pub host_push_behind_frames: u32,
}

/// Host-side input acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputWindowConfig {
    /// Inputs further ahead of the host frame are ignored (default: 60)
    #[serde(default = "default_max_input_ahead")]
    pub max_ahead: u32,
    /// Inputs further behind are ignored, also capped by the rollback
    /// window (default: 60)
    #[serde(default = "default_max_input_behind")]
    pub max_behind: u32,
    /// Corrections older than this are answered with a snapshot instead of a
    /// rollback (default: 16)
    #[serde(default = "default_host_max_input_rollback")]
    pub host_max_rollback: u32,
}

/// Room and presence limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomLimits {
    /// Players including the host (default: 8)
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    /// Minimum gap between chat lines per player (default: 800)
    #[serde(default = "default_chat_cooldown_ms")]
    pub chat_cooldown_ms: u64,
    /// Minimum gap between profile updates per player (default: 1500)
    #[serde(default = "default_profile_cooldown_ms")]
    pub profile_cooldown_ms: u64,
    /// Chat line length in characters (default: 200)
    #[serde(default = "default_chat_max_len")]
    pub chat_max_len: usize,
}

fn default_max_rollback() -> u32 {
    DEFAULT_MAX_ROLLBACK_FRAMES
}
fn default_max_resend() -> u32 {
    8
}
fn default_hash_interval() -> u32 {
    15
}
fn default_tick_rate() -> u32 {
    60
}
fn default_max_frame_delta() -> u32 {
    5
}

fn default_client_lead() -> u32 {
    2
}
fn default_client_max_extra_lead() -> u32 {
    12
}
fn default_client_ahead_slack() -> u32 {
    2
}
fn default_lag_fuse_frames() -> u32 {
    24
}
fn default_lag_fuse_ms() -> u64 {
    500
}
fn default_host_stall_ms() -> u64 {
    3000
}
fn default_ping_interval_ms() -> u64 {
    1000
}

fn default_stage_ready_resend_ms() -> u64 {
    2000
}
fn default_stage_ready_timeout_ms() -> u64 {
    12_000
}

fn default_lag_cooldown_ms() -> u64 {
    1000
}
fn default_mismatch_cooldown_ms() -> u64 {
    250
}
fn default_host_push_cooldown_ms() -> u64 {
    1500
}
fn default_host_push_behind_frames() -> u32 {
    120
}

fn default_max_input_ahead() -> u32 {
    60
}
fn default_max_input_behind() -> u32 {
    60
}
fn default_host_max_input_rollback() -> u32 {
    16
}

fn default_max_players() -> usize {
    usize::from(rollsync_shared::RoomInfo::default().max_players)
}
fn default_chat_cooldown_ms() -> u64 {
    800
}
fn default_profile_cooldown_ms() -> u64 {
    1500
}
fn default_chat_max_len() -> usize {
    rollsync_shared::MAX_CHAT_LEN
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_rollback_frames: default_max_rollback(),
            max_resend_frames: default_max_resend(),
            hash_interval: default_hash_interval(),
            tick_rate_hz: default_tick_rate(),
            max_frame_delta: default_max_frame_delta(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            client_lead_frames: default_client_lead(),
            client_max_extra_lead: default_client_max_extra_lead(),
            client_ahead_slack: default_client_ahead_slack(),
            steady: RateBand::steady(),
            intro: RateBand::intro(),
            lag_fuse_frames: default_lag_fuse_frames(),
            lag_fuse_ms: default_lag_fuse_ms(),
            host_stall_ms: default_host_stall_ms(),
            ping_interval_ms: default_ping_interval_ms(),
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            stage_ready_resend_ms: default_stage_ready_resend_ms(),
            stage_ready_timeout_ms: default_stage_ready_timeout_ms(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            lag_cooldown_ms: default_lag_cooldown_ms(),
            mismatch_cooldown_ms: default_mismatch_cooldown_ms(),
            host_push_cooldown_ms: default_host_push_cooldown_ms(),
            host_push_behind_frames: default_host_push_behind_frames(),
        }
    }
}

impl Default for InputWindowConfig {
    fn default() -> Self {
        Self {
            max_ahead: default_max_input_ahead(),
            max_behind: default_max_input_behind(),
            host_max_rollback: default_host_max_input_rollback(),
        }
    }
}

impl Default for RoomLimits {
    fn default() -> Self {
        Self {
            max_players: default_max_players(),
            chat_cooldown_ms: default_chat_cooldown_ms(),
            profile_cooldown_ms: default_profile_cooldown_ms(),
            chat_max_len: default_chat_max_len(),
        }
    }
}

impl SessionConfig {
    /// Fixed simulation step in seconds
    pub fn fixed_step(&self) -> f64 {
        1.0 / f64::from(self.tick_rate_hz.max(1))
    }

    pub fn rollback_config(&self) -> RollbackConfig {
        RollbackConfig::with_window(self.max_rollback_frames)
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

impl PacingConfig {
    pub fn lag_fuse(&self) -> Duration {
        millis(self.lag_fuse_ms)
    }

    pub fn host_stall(&self) -> Duration {
        millis(self.host_stall_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        millis(self.ping_interval_ms)
    }
}

impl HandshakeConfig {
    pub fn resend(&self) -> Duration {
        millis(self.stage_ready_resend_ms)
    }

    pub fn timeout(&self) -> Duration {
        millis(self.stage_ready_timeout_ms)
    }
}

impl SnapshotConfig {
    pub fn lag_cooldown(&self) -> Duration {
        millis(self.lag_cooldown_ms)
    }

    pub fn mismatch_cooldown(&self) -> Duration {
        millis(self.mismatch_cooldown_ms)
    }

    pub fn host_push_cooldown(&self) -> Duration {
        millis(self.host_push_cooldown_ms)
    }
}

impl RoomLimits {
    pub fn chat_cooldown(&self) -> Duration {
        millis(self.chat_cooldown_ms)
    }

    pub fn profile_cooldown(&self) -> Duration {
        millis(self.profile_cooldown_ms)
    }
}

/// Configuration load/validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl NetplayConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject values the protocol cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.session.max_rollback_frames == 0 {
            return invalid("session.max_rollback_frames must be at least 1");
        }
        if self.session.max_resend_frames == 0 {
            return invalid("session.max_resend_frames must be at least 1");
        }
        if self.session.tick_rate_hz == 0 {
            return invalid("session.tick_rate_hz must be at least 1");
        }
        if self.session.max_frame_delta == 0 {
            return invalid("session.max_frame_delta must be at least 1");
        }
        for (name, band) in [("steady", &self.pacing.steady), ("intro", &self.pacing.intro)] {
            if !(band.rate_min > 0.0 && band.rate_min <= band.rate_max) {
                return Err(ConfigError::Invalid(format!(
                    "pacing.{name}: rate bounds must satisfy 0 < rate_min <= rate_max"
                )));
            }
            if band.max_ticks == 0 {
                return Err(ConfigError::Invalid(format!(
                    "pacing.{name}.max_ticks must be at least 1"
                )));
            }
        }
        if self.inputs.host_max_rollback > self.session.max_rollback_frames {
            return invalid("inputs.host_max_rollback cannot exceed session.max_rollback_frames");
        }
        if self.snapshots.mismatch_cooldown_ms > self.snapshots.lag_cooldown_ms {
            return invalid(
                "snapshots.mismatch_cooldown_ms cannot exceed snapshots.lag_cooldown_ms",
            );
        }
        if self.room.max_players < 2 {
            return invalid("room.max_players must be at least 2");
        }
        Ok(())
    }
}
