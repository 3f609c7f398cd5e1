//! Worker side of the mailbox protocol.
//!
//! A worker repeatedly scans open-tasks, claims one entry with an atomic
//! rename into its private directory, hands the envelope to its `Executor`,
//! and resolves the claim into exactly one terminal directory. Losing a
//! claim race is routine: the rename fails with `NotFound` and the worker
//! simply tries the next candidate.
//!
//! How a task is actually carried out is opaque to this module; anything
//! implementing `Executor` (an automated agent, a script, a human driving a
//! REPL) is a valid worker.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::task::TaskId;
use crate::mailbox::envelope::Envelope;
use crate::mailbox::layout::MailboxLayout;
use crate::mailbox::WorkerId;
use crate::{flog, flog_debug, flog_error, flog_warn, Result};

/// Default sleep between scans of open-tasks when nothing is claimable.
pub const DEFAULT_WORKER_POLL: Duration = Duration::from_secs(3);

/// The result of executing a claimed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Task done; the string is the completion summary.
    Completed(String),
    /// Task failed; the string is the error detail, preserved verbatim.
    Failed(String),
    /// Worker needs operator guidance; the string explains the issue.
    Help(String),
}

/// The opaque executor boundary.
///
/// Implementations receive the full envelope (task payload, completed
/// dependencies, operator guidance if republished) and must return exactly
/// one outcome per claim.
pub trait Executor: Send + Sync {
    fn execute(&self, envelope: &Envelope) -> Outcome;
}

/// Fallback executor used when no real executor is configured: every task
/// becomes a help request, so a human can pick it up.
pub struct HelpExecutor;

impl Executor for HelpExecutor {
    fn execute(&self, _envelope: &Envelope) -> Outcome {
        Outcome::Help("Manual intervention required (no executor configured)".to_string())
    }
}

/// Result of a single claim attempt across the open directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    /// An entry was claimed into the worker's private directory.
    Claimed(PathBuf),
    /// Entries existed but every rename lost the race to another worker.
    AllRacesLost,
    /// Nothing was available to claim.
    NothingOpen,
}

/// A single worker identity's claim/execute/resolve loop.
pub struct Worker {
    id: WorkerId,
    layout: MailboxLayout,
    executor: Box<dyn Executor>,
    poll_interval: Duration,
}

impl Worker {
    /// Create a worker with the given executor.
    pub fn new(id: WorkerId, layout: MailboxLayout, executor: Box<dyn Executor>) -> Self {
        Self {
            id,
            layout,
            executor,
            poll_interval: DEFAULT_WORKER_POLL,
        }
    }

    /// Create a worker that routes every task to the help queue.
    pub fn with_default_executor(id: WorkerId, layout: MailboxLayout) -> Self {
        Self::new(id, layout, Box::new(HelpExecutor))
    }

    /// Override the scan interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// This worker's identity.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Try to claim one open task.
    ///
    /// The scan starts at an offset staggered by worker id so concurrent
    /// workers begin from different entries. The atomic rename is the only
    /// mutual-exclusion primitive: exactly one racing worker wins; losers
    /// observe `NotFound` and move on.
    pub fn try_claim(&self) -> Result<ClaimResult> {
        let entries = self.layout.list_entries(&self.layout.open_dir())?;
        if entries.is_empty() {
            return Ok(ClaimResult::NothingOpen);
        }

        let offset = (self.id.index() as usize - 1) % entries.len();
        for i in 0..entries.len() {
            let (task_id, path) = &entries[(offset + i) % entries.len()];
            let dest = self
                .layout
                .entry_path(&self.layout.worker_dir(self.id), task_id);
            match fs::rename(path, &dest) {
                Ok(()) => {
                    flog!("[{}] claimed {}", self.id, task_id);
                    return Ok(ClaimResult::Claimed(dest));
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    // Another worker won this entry; not an error.
                    flog_debug!("[{}] lost claim race for {}", self.id, task_id);
                    continue;
                }
                Err(err) => {
                    flog_error!("[{}] claiming {}: {}", self.id, task_id, err);
                    continue;
                }
            }
        }

        Ok(ClaimResult::AllRacesLost)
    }

    /// Execute a claimed envelope and move it to exactly one terminal
    /// directory.
    ///
    /// The annotation is written onto the claim file first, then the file is
    /// atomically renamed into the terminal directory, so observers never
    /// see an unannotated terminal entry.
    pub fn process_claim(&self, claim_path: &Path) -> Result<(TaskId, Outcome)> {
        let mut envelope = Envelope::read_from(claim_path)?;
        let task_id = envelope.task_id.clone();
        flog!("[{}] executing {}: {}", self.id, task_id, envelope.task.title);

        let outcome = self.executor.execute(&envelope);

        let dest_dir = match &outcome {
            Outcome::Completed(summary) => {
                envelope.annotate_completed(&self.id.name(), summary);
                self.layout.finished_dir()
            }
            Outcome::Failed(error) => {
                envelope.annotate_failed(&self.id.name(), error);
                self.layout.failed_dir()
            }
            Outcome::Help(request) => {
                envelope.annotate_help(self.id, request);
                self.layout.help_dir()
            }
        };

        envelope.write_to(claim_path)?;
        let dest = self.layout.entry_path(&dest_dir, &task_id);
        fs::rename(claim_path, &dest)?;

        match &outcome {
            Outcome::Completed(_) => flog!("[{}] completed {}", self.id, task_id),
            Outcome::Failed(error) => flog_warn!("[{}] failed {}: {}", self.id, task_id, error),
            Outcome::Help(request) => flog!("[{}] help requested for {}: {}", self.id, task_id, request),
        }

        Ok((task_id, outcome))
    }

    /// Main worker loop: claim, execute, resolve, repeat until cancelled.
    ///
    /// Per-task errors are logged and never abort the loop; a claim file
    /// that cannot be parsed stays in the private directory for inspection.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        flog!("[{}] worker loop started", self.id);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.try_claim()? {
                ClaimResult::Claimed(path) => {
                    if let Err(err) = self.process_claim(&path) {
                        flog_error!("[{}] processing {}: {}", self.id, path.display(), err);
                    }
                }
                ClaimResult::AllRacesLost => {
                    // Other workers are draining the queue; retry promptly.
                    continue;
                }
                ClaimResult::NothingOpen => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        flog!("[{}] worker loop stopped", self.id);
        Ok(())
    }
}
