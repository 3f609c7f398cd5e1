//! Failure-signature remediation ("circuit breaker").
//!
//! The circuit breaker inspects worker-reported failure text for known
//! signatures and proposes a remediation: inject a repair task into the
//! graph, cool a task down before republication, or bump a shared
//! resource's capacity. Matching is best-effort and purely advisory; an
//! unmatched failure simply gets no automatic remediation.
//!
//! Rules are an ordered list of (regex signature -> remedy template), so new
//! signatures can be registered without touching scheduler logic.

use regex::Regex;
use std::time::Duration;

use crate::core::task::{Task, TaskId};
use crate::{Error, Result};

/// Template for the action a rule proposes when its signature matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remedy {
    /// Inject a repair task derived from the failing task's id.
    InjectRepairTask {
        /// Suffix appended to the failing task id (e.g. ".FIX.PKG").
        id_suffix: String,
        title: String,
        description: String,
    },
    /// Delay republication of the failing task.
    Cooldown { seconds: u64 },
    /// Grow a shared resource pool.
    BumpResource { resource: String, factor: usize },
}

/// A concrete remediation proposed for a specific failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remediation {
    InjectTask(Task),
    Cooldown(Duration),
    BumpResource { resource: String, factor: usize },
}

impl Remediation {
    /// Short description for logs and stats.
    pub fn describe(&self) -> String {
        match self {
            Remediation::InjectTask(task) => format!("inject repair task {}", task.id),
            Remediation::Cooldown(duration) => format!("cooldown {}s", duration.as_secs()),
            Remediation::BumpResource { resource, factor } => {
                format!("bump resource '{}' x{}", resource, factor)
            }
        }
    }
}

struct SignatureRule {
    name: String,
    pattern: Regex,
    remedy: Remedy,
}

/// Ordered signature rules applied to failure output.
pub struct CircuitBreaker {
    rules: Vec<SignatureRule>,
}

impl CircuitBreaker {
    /// A breaker with no rules; use `add_rule` to register signatures.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// The stock rule set: dependency-resolution failures, rate limiting,
    /// out-of-memory, and schema drift.
    pub fn with_defaults() -> Self {
        let mut breaker = Self::empty();
        // Patterns compile from literals; failures here would be programmer
        // error, so fall back to skipping the rule rather than panicking.
        let _ = breaker.add_rule(
            "dependency-resolution",
            r"(?i)cannot resolve|module not found",
            Remedy::InjectRepairTask {
                id_suffix: ".FIX.PKG".to_string(),
                title: "Install missing packages".to_string(),
                description: "Install the project's missing dependencies, then stop.".to_string(),
            },
        );
        let _ = breaker.add_rule(
            "rate-limit",
            r"(?i)\b429\b|rate.?limit",
            Remedy::Cooldown { seconds: 30 },
        );
        let _ = breaker.add_rule(
            "out-of-memory",
            r"(?i)\bOOM\b|out of memory",
            Remedy::BumpResource {
                resource: "memory".to_string(),
                factor: 2,
            },
        );
        let _ = breaker.add_rule(
            "schema-drift",
            r"(?i)migration conflict|schema drift",
            Remedy::InjectRepairTask {
                id_suffix: ".FIX.SCHEMA".to_string(),
                title: "Sync database schema".to_string(),
                description: "Re-run pending migrations so the schema matches, then stop."
                    .to_string(),
            },
        );
        breaker
    }

    /// Register a rule. Rules are tried in registration order; the first
    /// matching signature wins.
    pub fn add_rule(&mut self, name: &str, pattern: &str, remedy: Remedy) -> Result<()> {
        let pattern = Regex::new(pattern)
            .map_err(|err| Error::Validation(format!("Bad signature pattern '{}': {}", name, err)))?;
        self.rules.push(SignatureRule {
            name: name.to_string(),
            pattern,
            remedy,
        });
        Ok(())
    }

    /// Number of registered rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Inspect failure output for a known signature and instantiate its
    /// remedy for the failing task. Returns the matched rule name alongside
    /// the proposed remediation.
    pub fn inspect(&self, task_id: &TaskId, output: &str) -> Option<(String, Remediation)> {
        for rule in &self.rules {
            if !rule.pattern.is_match(output) {
                continue;
            }
            let remediation = match &rule.remedy {
                Remedy::InjectRepairTask {
                    id_suffix,
                    title,
                    description,
                } => Remediation::InjectTask(
                    Task::new(format!("{}{}", task_id, id_suffix), title.clone())
                        .with_description(description.clone()),
                ),
                Remedy::Cooldown { seconds } => {
                    Remediation::Cooldown(Duration::from_secs(*seconds))
                }
                Remedy::BumpResource { resource, factor } => Remediation::BumpResource {
                    resource: resource.clone(),
                    factor: *factor,
                },
            };
            return Some((rule.name.clone(), remediation));
        }
        None
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_defaults()
    }
}
