//! Scenario file (`rollsync-sim.toml`)
//!
//! ```toml
//! [link]
//! latency_ms = 40
//! jitter_ms = 10
//! loss = 0.02
//!
//! [netplay.session]
//! max_rollback_frames = 30
//! ```
//!
//! Command-line flags override the `[link]` table.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rollsync_core::NetplayConfig;
use rollsync_core::net::loopback::LinkConditions;
use serde::{Deserialize, Serialize};

/// Link quality applied to every host/client pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    pub latency_ms: u64,
    pub jitter_ms: u64,
    pub loss: f64,
}

impl LinkSection {
    pub fn conditions(&self) -> LinkConditions {
        LinkConditions::new(
            Duration::from_millis(self.latency_ms),
            Duration::from_millis(self.jitter_ms),
            self.loss,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub link: LinkSection,
    pub netplay: NetplayConfig,
}

impl Scenario {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(text).context("Failed to parse scenario")?;
        scenario
            .netplay
            .validate()
            .context("Invalid [netplay] section")?;
        if !(0.0..=1.0).contains(&scenario.link.loss) {
            anyhow::bail!("link.loss must be within 0.0..=1.0");
        }
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Apply link overrides given on the command line
    pub fn override_link(
        &mut self,
        latency_ms: Option<u64>,
        jitter_ms: Option<u64>,
        loss: Option<f64>,
    ) {
        if let Some(latency_ms) = latency_ms {
            self.link.latency_ms = latency_ms;
        }
        if let Some(jitter_ms) = jitter_ms {
            self.link.jitter_ms = jitter_ms;
        }
        if let Some(loss) = loss {
            self.link.loss = loss.clamp(0.0, 1.0);
        }
    }
}
