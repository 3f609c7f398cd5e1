//! Coordinator configuration.
//!
//! Every timing knob the coordinator uses is explicit configuration rather
//! than an implicit constant: the poll interval, the open-task cap, the
//! stuck-claim threshold, and the stats cadence all live here. Missing file
//! or missing fields fall back to defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::{flog_debug, Result};

/// Default number of worker identities with private claim directories.
pub const DEFAULT_WORKER_POOL: u8 = 10;

/// Default cap on simultaneously open (published, unclaimed) tasks.
pub const DEFAULT_MAX_OPEN_TASKS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sleep between coordinator ticks, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of tasks published into open-tasks at once.
    #[serde(default = "default_max_open_tasks")]
    pub max_open_tasks: usize,
    /// Number of worker identities (private claim directories) to provision.
    #[serde(default = "default_worker_pool")]
    pub worker_pool: u8,
    /// Seconds a claimed entry may sit untouched before it is reported stuck.
    /// Zero disables stuck detection.
    #[serde(default = "default_stuck_claim_secs")]
    pub stuck_claim_secs: u64,
    /// Move stuck claims back to open-tasks instead of only reporting them.
    #[serde(default)]
    pub requeue_stuck: bool,
    /// Write a stats snapshot every N ticks.
    #[serde(default = "default_stats_every_ticks")]
    pub stats_every_ticks: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_open_tasks() -> usize {
    DEFAULT_MAX_OPEN_TASKS
}

fn default_worker_pool() -> u8 {
    DEFAULT_WORKER_POOL
}

fn default_stuck_claim_secs() -> u64 {
    900
}

fn default_stats_every_ticks() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_open_tasks: default_max_open_tasks(),
            worker_pool: default_worker_pool(),
            stuck_claim_secs: default_stuck_claim_secs(),
            requeue_stuck: false,
            stats_every_ticks: default_stats_every_ticks(),
        }
    }
}

impl Config {
    /// Load configuration from `foreman.toml` in the current directory.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("foreman.toml"))
    }

    /// Load configuration from the given path, using defaults if it is absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        flog_debug!("Config::load_from path={}", path.display());
        if !path.exists() {
            flog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        flog_debug!(
            "Config loaded: poll_interval_ms={}, max_open_tasks={}, worker_pool={}",
            config.poll_interval_ms,
            config.max_open_tasks,
            config.worker_pool
        );
        Ok(config)
    }

    /// The poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The stuck-claim threshold, or `None` when detection is disabled.
    pub fn stuck_claim_threshold(&self) -> Option<Duration> {
        if self.stuck_claim_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.stuck_claim_secs))
        }
    }
}
