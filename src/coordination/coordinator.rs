//! The coordinator loop.
//!
//! One coordinator process drives the whole run: it publishes ready tasks
//! into the open directory, observes worker progress by listing the shared
//! directory tree, releases resources when tasks reach terminal state, and
//! recomputes the frontier to discover newly unblocked work. The loop is a
//! single-threaded poll: every scan and acquisition attempt is non-blocking
//! and the loop sleeps a fixed interval between ticks.
//!
//! The coordinator's in-memory state is never the source of truth. On
//! startup a reconciliation pass rebuilds the completed/failed sets from the
//! terminal directories and re-derives in-flight claims and held resources
//! from the worker-private directories, so a crashed coordinator can be
//! restarted against a live mailbox.

use std::collections::HashMap;
use std::fs;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordination::frontier::FrontierState;
use crate::coordination::remedy::{CircuitBreaker, Remediation};
use crate::coordination::resources::ResourceManager;
use crate::coordination::stats::ProgressSnapshot;
use crate::core::graph::TaskGraph;
use crate::core::task::{ExecutionRecord, Task, TaskId, TaskState};
use crate::mailbox::envelope::Envelope;
use crate::mailbox::layout::MailboxLayout;
use crate::mailbox::WorkerId;
use crate::manifest::Manifest;
use crate::{flog, flog_debug, flog_error, flog_warn, Error, Result};

/// Coordinator lifecycle phases.
///
/// `Monitoring` loops on itself; every other transition is strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Dispatching,
    Monitoring,
    Draining,
    Terminated,
}

impl Phase {
    /// Whether a transition to the target phase is valid from this phase.
    pub fn can_transition(&self, target: Phase) -> bool {
        matches!(
            (self, target),
            (Phase::Initializing, Phase::Dispatching)
                | (Phase::Dispatching, Phase::Monitoring)
                | (Phase::Monitoring, Phase::Draining)
                | (Phase::Draining, Phase::Terminated)
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Initializing => write!(f, "initializing"),
            Phase::Dispatching => write!(f, "dispatching"),
            Phase::Monitoring => write!(f, "monitoring"),
            Phase::Draining => write!(f, "draining"),
            Phase::Terminated => write!(f, "terminated"),
        }
    }
}

/// What a single tick observed and did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub newly_completed: Vec<TaskId>,
    pub newly_failed: Vec<TaskId>,
    pub newly_claimed: Vec<(TaskId, WorkerId)>,
    pub new_help_requests: Vec<TaskId>,
    pub published: Vec<TaskId>,
    pub stuck_claims: Vec<TaskId>,
}

impl TickReport {
    /// Whether the tick observed or caused any state change.
    pub fn is_quiet(&self) -> bool {
        self.newly_completed.is_empty()
            && self.newly_failed.is_empty()
            && self.newly_claimed.is_empty()
            && self.new_help_requests.is_empty()
            && self.published.is_empty()
    }
}

/// The coordinator: owns the graph, the frontier, the resource manager, and
/// per-task execution records.
pub struct Coordinator {
    graph: TaskGraph,
    layout: MailboxLayout,
    config: Config,
    frontier: FrontierState,
    resources: ResourceManager,
    breaker: CircuitBreaker,
    records: HashMap<TaskId, ExecutionRecord>,
    phase: Phase,
    tick_count: u64,
    stuck_count: usize,
}

impl Coordinator {
    /// Build a coordinator from a parsed manifest.
    ///
    /// Graph validation errors (unknown edge ids, duplicates, cycles) are
    /// fatal here, before any directory is touched.
    pub fn from_manifest(
        manifest: &Manifest,
        layout: MailboxLayout,
        config: Config,
    ) -> Result<Self> {
        let graph = TaskGraph::load(manifest)?;
        let resources = ResourceManager::from_declarations(&manifest.resources);
        let records = graph
            .task_ids()
            .map(|id| (id.clone(), ExecutionRecord::new(id.clone())))
            .collect();

        Ok(Self {
            graph,
            layout,
            config,
            frontier: FrontierState::new(),
            resources,
            breaker: CircuitBreaker::with_defaults(),
            records,
            phase: Phase::Initializing,
            tick_count: 0,
            stuck_count: 0,
        })
    }

    /// Replace the default circuit breaker (custom signature rules).
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn frontier(&self) -> &FrontierState {
        &self.frontier
    }

    pub fn record(&self, id: &TaskId) -> Option<&ExecutionRecord> {
        self.records.get(id)
    }

    fn advance(&mut self, target: Phase) -> Result<()> {
        if !self.phase.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.phase.to_string(),
                to: target.to_string(),
            });
        }
        flog_debug!("Coordinator phase {} -> {}", self.phase, target);
        self.phase = target;
        Ok(())
    }

    /// Create the directory tree and rebuild state from its contents.
    ///
    /// Directory-creation failure is fatal at startup. The reconciliation
    /// pass makes a restarted coordinator consistent with a live mailbox:
    /// terminal directories repopulate the completed/failed sets, and
    /// envelopes in open, claimed, and help locations repopulate dispatch
    /// state and resource holds.
    pub fn initialize(&mut self) -> Result<()> {
        self.layout.ensure(self.config.worker_pool)?;

        // Terminal directories are the durable record.
        for (id, path) in self.layout.list_entries(&self.layout.finished_dir())? {
            if !self.ensure_record(&id, &path) {
                continue;
            }
            self.frontier.mark_completed(id.clone());
            if let Some(record) = self.records.get_mut(&id) {
                record.completed();
            }
        }
        for (id, path) in self.layout.list_entries(&self.layout.failed_dir())? {
            if !self.ensure_record(&id, &path) {
                continue;
            }
            let reason = Envelope::read_from(&path)
                .ok()
                .and_then(|envelope| envelope.failure.map(|f| f.error))
                .unwrap_or_else(|| "unknown".to_string());
            self.frontier.mark_failed(id.clone());
            if let Some(record) = self.records.get_mut(&id) {
                record.failed(&reason);
            }
        }

        // In-flight envelopes: open, claimed, and help entries still hold
        // their resources.
        let mut holders: Vec<(TaskId, Vec<String>)> = Vec::new();

        for (id, path) in self.layout.list_entries(&self.layout.open_dir())? {
            if !self.ensure_record(&id, &path) {
                continue;
            }
            let envelope = Envelope::read_from(&path)?;
            self.frontier.mark_dispatched(id.clone());
            if let Some(record) = self.records.get_mut(&id) {
                record.published(envelope.held_resources.clone());
            }
            holders.push((id, envelope.held_resources));
        }

        for worker in self.layout.worker_ids(self.config.worker_pool) {
            for (id, path) in self.layout.list_entries(&self.layout.worker_dir(worker))? {
                if !self.ensure_record(&id, &path) {
                    continue;
                }
                let envelope = Envelope::read_from(&path)?;
                self.frontier.mark_dispatched(id.clone());
                if let Some(record) = self.records.get_mut(&id) {
                    record.published(envelope.held_resources.clone());
                    record.claimed(worker);
                }
                holders.push((id, envelope.held_resources));
            }
        }

        for (id, path) in self.layout.list_entries(&self.layout.help_dir())? {
            if !self.ensure_record(&id, &path) {
                continue;
            }
            let envelope = Envelope::read_from(&path)?;
            self.frontier.mark_dispatched(id.clone());
            if let Some(record) = self.records.get_mut(&id) {
                record.published(envelope.held_resources.clone());
                record.help_requested();
            }
            holders.push((id, envelope.held_resources));
        }

        self.resources
            .reconcile(holders.iter().map(|(id, names)| (id, names.as_slice())));

        flog!(
            "Reconciled mailbox: {} completed, {} failed, {} in flight",
            self.frontier.completed().len(),
            self.frontier.failed().len(),
            self.frontier.dispatched_count()
        );

        self.advance(Phase::Dispatching)
    }

    /// Make sure an observed entry has a record; entries for ids the graph
    /// does not know (e.g. leftovers from another manifest) are ignored.
    fn ensure_record(&mut self, id: &TaskId, path: &std::path::Path) -> bool {
        if self.records.contains_key(id) {
            return true;
        }
        if self.graph.contains_task(id) {
            self.records
                .insert(id.clone(), ExecutionRecord::new(id.clone()));
            return true;
        }
        flog_warn!(
            "Ignoring entry for unknown task {} at {}",
            id,
            path.display()
        );
        false
    }

    /// One scheduling tick: observe, release, remediate, publish, report.
    pub fn tick(&mut self) -> Result<TickReport> {
        self.tick_count += 1;
        let mut report = TickReport::default();

        self.scan_finished(&mut report)?;
        self.scan_failed(&mut report)?;
        self.scan_help(&mut report)?;
        self.scan_claims(&mut report)?;
        self.detect_stuck(&mut report)?;
        self.publish_ready(&mut report)?;

        if self.tick_count % self.config.stats_every_ticks == 0 {
            let snapshot = self.snapshot();
            snapshot.write_to(&self.layout.stats_dir())?;
            flog!("{}", snapshot);
        }

        Ok(report)
    }

    fn scan_finished(&mut self, report: &mut TickReport) -> Result<()> {
        for (id, path) in self.layout.list_entries(&self.layout.finished_dir())? {
            if self.frontier.is_completed(&id) || !self.ensure_record(&id, &path) {
                continue;
            }
            self.frontier.mark_completed(id.clone());
            let held = if let Some(record) = self.records.get_mut(&id) {
                record.completed();
                std::mem::take(&mut record.held_resources)
            } else {
                Vec::new()
            };
            self.resources.release(&id, &held);
            flog!("Completed: {}", id);
            report.newly_completed.push(id);
        }
        Ok(())
    }

    fn scan_failed(&mut self, report: &mut TickReport) -> Result<()> {
        for (id, path) in self.layout.list_entries(&self.layout.failed_dir())? {
            if self.frontier.is_failed(&id)
                || self.frontier.is_completed(&id)
                || !self.ensure_record(&id, &path)
            {
                continue;
            }
            let reason = Envelope::read_from(&path)
                .ok()
                .and_then(|envelope| envelope.failure.map(|f| f.error))
                .unwrap_or_else(|| "unknown".to_string());

            self.frontier.mark_failed(id.clone());
            let held = if let Some(record) = self.records.get_mut(&id) {
                record.failed(&reason);
                std::mem::take(&mut record.held_resources)
            } else {
                Vec::new()
            };
            self.resources.release(&id, &held);
            flog_warn!("Failed: {}: {}", id, reason);

            if let Some((rule, remediation)) = self.breaker.inspect(&id, &reason) {
                self.apply_remediation(&id, &rule, remediation);
            }

            report.newly_failed.push(id);
        }
        Ok(())
    }

    fn scan_help(&mut self, report: &mut TickReport) -> Result<()> {
        for (id, path) in self.layout.list_entries(&self.layout.help_dir())? {
            if !self.ensure_record(&id, &path) {
                continue;
            }
            let already_seen = self
                .records
                .get(&id)
                .map(|record| record.state == TaskState::Help)
                .unwrap_or(false);
            if already_seen {
                continue;
            }
            let request = Envelope::read_from(&path)
                .ok()
                .and_then(|envelope| envelope.help.map(|h| h.request))
                .unwrap_or_else(|| "assistance requested".to_string());
            if let Some(record) = self.records.get_mut(&id) {
                record.help_requested();
            }
            flog_warn!("Help requested for {}: {}", id, request);
            report.new_help_requests.push(id);
        }
        Ok(())
    }

    fn scan_claims(&mut self, report: &mut TickReport) -> Result<()> {
        for worker in self.layout.worker_ids(self.config.worker_pool) {
            for (id, path) in self.layout.list_entries(&self.layout.worker_dir(worker))? {
                if !self.ensure_record(&id, &path) {
                    continue;
                }
                let newly_claimed = self
                    .records
                    .get(&id)
                    .map(|record| {
                        matches!(record.state, TaskState::Published | TaskState::Help)
                    })
                    .unwrap_or(false);
                if newly_claimed {
                    if let Some(record) = self.records.get_mut(&id) {
                        record.claimed(worker);
                    }
                    flog!("Claimed: {} by {}", id, worker);
                    report.newly_claimed.push((id, worker));
                }
            }
        }
        Ok(())
    }

    /// Report claims whose envelope has not been touched within the
    /// configured threshold; optionally requeue them into open-tasks.
    ///
    /// Requeue is off by default: a slow worker may still resolve the task,
    /// and the first terminal placement wins.
    fn detect_stuck(&mut self, report: &mut TickReport) -> Result<()> {
        let Some(threshold) = self.config.stuck_claim_threshold() else {
            return Ok(());
        };
        self.stuck_count = 0;

        for worker in self.layout.worker_ids(self.config.worker_pool) {
            for (id, path) in self.layout.list_entries(&self.layout.worker_dir(worker))? {
                let age = fs::metadata(&path)
                    .and_then(|meta| meta.modified())
                    .ok()
                    .and_then(|mtime| SystemTime::now().duration_since(mtime).ok());
                let Some(age) = age else { continue };
                if age < threshold {
                    continue;
                }

                report.stuck_claims.push(id.clone());
                if !self.config.requeue_stuck {
                    // Still stuck after this tick; requeued claims are not.
                    self.stuck_count += 1;
                    flog_warn!(
                        "Stuck claim: {} held by {} for {}s",
                        id,
                        worker,
                        age.as_secs()
                    );
                    continue;
                }

                match Envelope::read_from(&path) {
                    Ok(mut envelope) => {
                        envelope.retry_count += 1;
                        envelope.write_to(&path)?;
                        let dest = self.layout.entry_path(&self.layout.open_dir(), &id);
                        fs::rename(&path, &dest)?;
                        if let Some(record) = self.records.get_mut(&id) {
                            record.republished();
                        }
                        flog_warn!(
                            "Requeued stuck claim {} (held by {} for {}s)",
                            id,
                            worker,
                            age.as_secs()
                        );
                    }
                    Err(err) => {
                        flog_error!("Reading stuck claim {}: {}", path.display(), err);
                    }
                }
            }
        }
        Ok(())
    }

    /// Publish ready tasks up to the open-task cap, gating each publication
    /// on resource acquisition and any active cooldown.
    fn publish_ready(&mut self, report: &mut TickReport) -> Result<()> {
        let mut open_count = self
            .records
            .values()
            .filter(|record| record.state == TaskState::Published)
            .count();

        for id in self.frontier.ready_tasks(&self.graph) {
            if open_count >= self.config.max_open_tasks {
                break;
            }
            let in_cooldown = self
                .records
                .get(&id)
                .map(|record| record.in_cooldown())
                .unwrap_or(false);
            if in_cooldown {
                flog_debug!("Holding {} back: cooldown active", id);
                continue;
            }

            let Some(task) = self.graph.get_task(&id).cloned() else {
                continue;
            };

            // Resource acquisition gates publication; on contention the task
            // simply stays in the frontier for a later tick.
            if !self.resources.try_acquire(&id, &task.resources) {
                flog_debug!("Holding {} back: resources unavailable", id);
                continue;
            }

            let path = self.layout.entry_path(&self.layout.open_dir(), &id);
            if path.exists() {
                // Already on disk (e.g. operator republish raced this tick).
                self.resources.release(&id, &task.resources);
                self.frontier.mark_dispatched(id.clone());
                continue;
            }

            let deps_completed = self.graph.predecessors(&id);
            let held = task.resources.clone();
            let mut envelope = Envelope::new(task, deps_completed, held.clone());
            if let Some(record) = self.records.get(&id) {
                envelope.retry_count = record.retry_count;
            }
            envelope.write_to(&path)?;

            self.frontier.mark_dispatched(id.clone());
            if let Some(record) = self.records.get_mut(&id) {
                record.published(held);
            }
            open_count += 1;
            flog!("Published: {} -> open-tasks/", id);
            report.published.push(id);
        }
        Ok(())
    }

    fn apply_remediation(&mut self, task_id: &TaskId, rule: &str, remediation: Remediation) {
        flog!(
            "Circuit breaker matched '{}' for {}: {}",
            rule,
            task_id,
            remediation.describe()
        );
        match remediation {
            Remediation::InjectTask(task) => {
                if self.graph.contains_task(&task.id) {
                    flog_debug!("Repair task {} already present", task.id);
                    return;
                }
                let id = task.id.clone();
                self.records
                    .insert(id.clone(), ExecutionRecord::new(id.clone()));
                if let Err(err) = self.graph.insert_task(task) {
                    flog_error!("Injecting repair task {}: {}", id, err);
                }
            }
            Remediation::Cooldown(duration) => {
                if let Some(record) = self.records.get_mut(task_id) {
                    record.cooldown_until = Some(
                        chrono::Utc::now()
                            + chrono::Duration::from_std(duration)
                                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
                    );
                }
            }
            Remediation::BumpResource { resource, factor } => {
                if !self.resources.bump_capacity(&resource, factor) {
                    flog_debug!("No shared pool named '{}' to bump", resource);
                }
            }
        }
    }

    /// Build the current progress snapshot from execution records.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let count_state = |state: TaskState| {
            self.records
                .values()
                .filter(|record| record.state == state)
                .count()
        };
        ProgressSnapshot::new(
            self.graph.task_count(),
            self.frontier.completed().len(),
            self.frontier.failed().len(),
            count_state(TaskState::Claimed),
            self.frontier.ready_tasks(&self.graph).len(),
            count_state(TaskState::Published),
            count_state(TaskState::Help),
            self.stuck_count,
        )
    }

    /// Whether every task has reached a terminal state.
    pub fn is_drained(&self) -> bool {
        self.frontier.all_terminal(&self.graph)
    }

    /// Run the coordinator to completion or cancellation.
    ///
    /// On cancellation the loop drains immediately: in-flight claims are
    /// left exactly as-is for a later coordinator to reconcile.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<ProgressSnapshot> {
        self.initialize()?;

        flog!(
            "Coordinator started: {} tasks, {} edges, base {}",
            self.graph.task_count(),
            self.graph.edge_count(),
            self.layout.base().display()
        );
        println!(
            "Coordinating {} tasks under {}",
            self.graph.task_count(),
            self.layout.base().display()
        );

        // Initial wave, then settle into monitoring.
        let mut report = TickReport::default();
        self.publish_ready(&mut report)?;
        println!("Published initial frontier: {} task(s)", report.published.len());
        self.advance(Phase::Monitoring)?;

        while !self.is_drained() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    flog!("Interrupt: draining with claims left in place");
                    println!("Interrupted; leaving in-flight claims as-is.");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }

            let report = self.tick()?;
            if !report.is_quiet() {
                println!("{}", self.snapshot());
            }
        }

        self.advance(Phase::Draining)?;
        let snapshot = self.snapshot();
        snapshot.write_to(&self.layout.stats_dir())?;
        flog!("Final: {}", snapshot);
        self.advance(Phase::Terminated)?;
        Ok(snapshot)
    }
}

/// Operator override: record a synthetic completion for a task so its
/// dependents unblock. The record is written straight into finished-tasks
/// and is observed by a running coordinator like any real completion.
pub fn write_override_completion(
    layout: &MailboxLayout,
    task_id: &TaskId,
    note: &str,
) -> Result<()> {
    let mut envelope = Envelope::new(
        Task::new(task_id.as_str(), "operator override"),
        Vec::new(),
        Vec::new(),
    );
    envelope.annotate_completed("operator", note);
    envelope.write_to(&layout.entry_path(&layout.finished_dir(), task_id))?;
    // Clear a stale failure record so the override is unambiguous on disk.
    let failed = layout.entry_path(&layout.failed_dir(), task_id);
    if failed.exists() {
        fs::remove_file(failed)?;
    }
    Ok(())
}

/// Operator help resolution: attach guidance to a help-state envelope and
/// republish it into open-tasks for re-claiming. This is the only state
/// transition that returns an envelope to Open.
pub fn resolve_help(layout: &MailboxLayout, task_id: &TaskId, guidance: &str) -> Result<Envelope> {
    let help_path = layout.entry_path(&layout.help_dir(), task_id);
    if !help_path.exists() {
        return Err(Error::NoHelpRequest(task_id.to_string()));
    }
    let mut envelope = Envelope::read_from(&help_path)?;
    envelope.resolve_with_guidance(guidance);
    envelope.write_to(&help_path)?;
    fs::rename(&help_path, layout.entry_path(&layout.open_dir(), task_id))?;
    flog!("Republished {} with guidance", task_id);
    Ok(envelope)
}
