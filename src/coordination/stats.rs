//! Advisory progress snapshots.
//!
//! The coordinator periodically writes a snapshot of aggregate counts to
//! `stats/current.json` for dashboards and the `status` command. Snapshots
//! are purely advisory; the terminal directories remain the authoritative
//! state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::Result;

const SNAPSHOT_FILE: &str = "current.json";

/// Aggregate counts by state at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub ready: usize,
    pub open: usize,
    pub help_requests: usize,
    pub stuck_claims: usize,
    pub completion_pct: f64,
}

impl ProgressSnapshot {
    /// Build a snapshot, deriving the completion percentage.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        total: usize,
        completed: usize,
        failed: usize,
        in_progress: usize,
        ready: usize,
        open: usize,
        help_requests: usize,
        stuck_claims: usize,
    ) -> Self {
        let completion_pct = if total == 0 {
            100.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        Self {
            timestamp: Utc::now(),
            total,
            completed,
            failed,
            in_progress,
            ready,
            open,
            help_requests,
            stuck_claims,
            completion_pct,
        }
    }

    /// Write the snapshot to `current.json` under the stats directory.
    pub fn write_to(&self, stats_dir: &Path) -> Result<()> {
        fs::create_dir_all(stats_dir)?;
        let path = stats_dir.join(SNAPSHOT_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Read the latest snapshot, if one has been written.
    pub fn read_from(stats_dir: &Path) -> Result<Option<Self>> {
        let path = stats_dir.join(SNAPSHOT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

impl std::fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "complete: {}/{} ({:.1}%) | active: {} | ready: {} | open: {} | failed: {} | help: {}",
            self.completed,
            self.total,
            self.completion_pct,
            self.in_progress,
            self.ready,
            self.open,
            self.failed,
            self.help_requests
        )
    }
}
