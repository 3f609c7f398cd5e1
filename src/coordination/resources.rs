//! Resource management for task publication.
//!
//! Resources gate when a ready task may be published, independently of the
//! dependency graph: an exclusive resource admits one holder, a shared pool
//! admits up to its capacity. Acquisition is a non-blocking, all-or-nothing
//! try; there is no waiter queue or fairness ordering, callers simply retry
//! on a later tick.
//!
//! Holders are tracked by task id rather than as raw counters, which makes
//! release idempotent and lets a restarted coordinator rebuild holder state
//! from the claimed envelopes it finds on disk.

use std::collections::{HashMap, HashSet};

use crate::core::task::TaskId;
use crate::manifest::ResourceSpec;
use crate::{flog_debug, flog_warn};

#[derive(Debug, Clone)]
enum ResourceState {
    Exclusive { holder: Option<TaskId> },
    Shared { capacity: usize, holders: HashSet<TaskId> },
}

impl ResourceState {
    fn available_for(&self, task: &TaskId) -> bool {
        match self {
            ResourceState::Exclusive { holder } => {
                holder.is_none() || holder.as_ref() == Some(task)
            }
            ResourceState::Shared { capacity, holders } => {
                holders.contains(task) || holders.len() < *capacity
            }
        }
    }

    fn grant(&mut self, task: &TaskId) {
        match self {
            ResourceState::Exclusive { holder } => *holder = Some(task.clone()),
            ResourceState::Shared { holders, .. } => {
                holders.insert(task.clone());
            }
        }
    }

    fn revoke(&mut self, task: &TaskId) {
        match self {
            ResourceState::Exclusive { holder } => {
                if holder.as_ref() == Some(task) {
                    *holder = None;
                }
            }
            ResourceState::Shared { holders, .. } => {
                holders.remove(task);
            }
        }
    }

    fn in_use(&self) -> usize {
        match self {
            ResourceState::Exclusive { holder } => usize::from(holder.is_some()),
            ResourceState::Shared { holders, .. } => holders.len(),
        }
    }
}

/// Tracks exclusive and shared-limited resources across tasks.
#[derive(Debug, Clone, Default)]
pub struct ResourceManager {
    resources: HashMap<String, ResourceState>,
}

impl ResourceManager {
    /// Build the manager from the manifest's resource declarations.
    pub fn from_declarations(declarations: &HashMap<String, ResourceSpec>) -> Self {
        let resources = declarations
            .iter()
            .map(|(name, spec)| {
                let state = match spec {
                    ResourceSpec::Exclusive => ResourceState::Exclusive { holder: None },
                    ResourceSpec::Shared { capacity } => ResourceState::Shared {
                        capacity: *capacity,
                        holders: HashSet::new(),
                    },
                };
                (name.clone(), state)
            })
            .collect();
        Self { resources }
    }

    /// Attempt to acquire every named resource for the task, all-or-nothing.
    ///
    /// If any resource is unavailable, every grant made during this call is
    /// rolled back before returning false; the caller never retains a
    /// partial grant. Names without a declaration are skipped with a
    /// warning.
    pub fn try_acquire(&mut self, task: &TaskId, names: &[String]) -> bool {
        let mut acquired: Vec<&String> = Vec::new();

        for name in names {
            let Some(state) = self.resources.get_mut(name) else {
                flog_warn!("Task {} requires undeclared resource '{}'", task, name);
                continue;
            };
            if !state.available_for(task) {
                // Rollback
                for granted in acquired {
                    if let Some(state) = self.resources.get_mut(granted) {
                        state.revoke(task);
                    }
                }
                flog_debug!("Resource '{}' unavailable for {}", name, task);
                return false;
            }
            state.grant(task);
            acquired.push(name);
        }

        true
    }

    /// Release the named resources held by the task.
    ///
    /// Unconditional and idempotent per resource: releasing a resource the
    /// task does not hold is a no-op, and a shared pool can never go below
    /// zero in-use.
    pub fn release(&mut self, task: &TaskId, names: &[String]) {
        for name in names {
            if let Some(state) = self.resources.get_mut(name) {
                state.revoke(task);
            }
        }
    }

    /// Grow a shared pool's capacity by the given factor (circuit-breaker
    /// remediation). Exclusive resources and unknown names are untouched.
    pub fn bump_capacity(&mut self, name: &str, factor: usize) -> bool {
        match self.resources.get_mut(name) {
            Some(ResourceState::Shared { capacity, .. }) => {
                let old = *capacity;
                *capacity = old.saturating_mul(factor).max(old + 1);
                flog_debug!("Resource '{}' capacity {} -> {}", name, old, *capacity);
                true
            }
            _ => false,
        }
    }

    /// Rebuild holder state from claimed envelopes found on disk after a
    /// coordinator restart. Existing grants are cleared first.
    pub fn reconcile<'a>(&mut self, holders: impl Iterator<Item = (&'a TaskId, &'a [String])>) {
        for state in self.resources.values_mut() {
            match state {
                ResourceState::Exclusive { holder } => *holder = None,
                ResourceState::Shared { holders, .. } => holders.clear(),
            }
        }
        for (task, names) in holders {
            for name in names {
                if let Some(state) = self.resources.get_mut(name) {
                    state.grant(task);
                }
            }
        }
    }

    /// Number of current holders of a resource, if declared.
    pub fn in_use(&self, name: &str) -> Option<usize> {
        self.resources.get(name).map(|state| state.in_use())
    }

    /// Whether a resource name is declared.
    pub fn is_declared(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }
}
