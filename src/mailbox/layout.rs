//! Mailbox directory tree.
//!
//! Message state is encoded by which directory an envelope file lives in:
//!
//! ```text
//! <base>/
//!   open-tasks/       published, unclaimed
//!   worker-001/ ...   one private claim directory per worker identity
//!   finished-tasks/   terminal: completed
//!   failed-tasks/     terminal: failed
//!   help-me/          waiting for operator guidance
//!   stats/            advisory progress snapshots
//! ```
//!
//! `MailboxLayout` is the only type that knows this encoding, so the backing
//! store could be swapped without touching the coordinator or workers.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::task::TaskId;
use crate::{Error, Result};

/// Default directory name for the mailbox tree.
pub const DEFAULT_BASE_DIR: &str = "coordination";

const OPEN_DIR: &str = "open-tasks";
const FINISHED_DIR: &str = "finished-tasks";
const FAILED_DIR: &str = "failed-tasks";
const HELP_DIR: &str = "help-me";
const STATS_DIR: &str = "stats";

/// A worker identity: a small positive integer with a fixed-width name.
///
/// Identities are bounded by the configured pool size; each one owns a
/// private claim directory (`worker-007`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(u8);

impl WorkerId {
    /// Create a worker id, validating it against the pool size.
    pub fn new(id: u8, pool: u8) -> Result<Self> {
        if id == 0 || id > pool {
            return Err(Error::WorkerIdOutOfRange { id, pool });
        }
        Ok(Self(id))
    }

    /// The raw integer identity.
    pub fn index(&self) -> u8 {
        self.0
    }

    /// Fixed-width directory name, e.g. `worker-007`.
    pub fn name(&self) -> String {
        format!("worker-{:03}", self.0)
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Paths into the mailbox directory tree.
#[derive(Debug, Clone)]
pub struct MailboxLayout {
    base: PathBuf,
}

impl MailboxLayout {
    /// Create a layout rooted at the given base directory. Does not touch
    /// the filesystem; call `ensure` to create the tree.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The base directory of the tree.
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn open_dir(&self) -> PathBuf {
        self.base.join(OPEN_DIR)
    }

    pub fn finished_dir(&self) -> PathBuf {
        self.base.join(FINISHED_DIR)
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.base.join(FAILED_DIR)
    }

    pub fn help_dir(&self) -> PathBuf {
        self.base.join(HELP_DIR)
    }

    pub fn stats_dir(&self) -> PathBuf {
        self.base.join(STATS_DIR)
    }

    /// A worker's private claim directory.
    pub fn worker_dir(&self, worker: WorkerId) -> PathBuf {
        self.base.join(worker.name())
    }

    /// Path of a task's envelope file within a directory.
    pub fn entry_path(&self, dir: &Path, task_id: &TaskId) -> PathBuf {
        dir.join(format!("{}.json", task_id))
    }

    /// Create the full directory tree for a pool of workers.
    ///
    /// Idempotent; failure here is fatal at coordinator startup.
    pub fn ensure(&self, pool: u8) -> Result<()> {
        for dir in [
            self.open_dir(),
            self.finished_dir(),
            self.failed_dir(),
            self.help_dir(),
            self.stats_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        for id in 1..=pool {
            // Pool bounds guarantee validity here.
            if let Ok(worker) = WorkerId::new(id, pool) {
                fs::create_dir_all(self.worker_dir(worker))?;
            }
        }
        Ok(())
    }

    /// List the task ids present in a directory, derived from `*.json` file
    /// stems. Missing directories list as empty.
    pub fn list_entries(&self, dir: &Path) -> Result<Vec<(TaskId, PathBuf)>> {
        let mut entries = Vec::new();
        let read = match fs::read_dir(dir) {
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(err.into()),
        };
        for entry in read {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                entries.push((TaskId::new(stem), path.clone()));
            }
        }
        // Directory iteration order is platform-defined; sort for stable scans.
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    /// All worker identities for a pool size.
    pub fn worker_ids(&self, pool: u8) -> Vec<WorkerId> {
        (1..=pool).filter_map(|id| WorkerId::new(id, pool).ok()).collect()
    }
}
