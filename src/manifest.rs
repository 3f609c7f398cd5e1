//! Task manifest parsing.
//!
//! The manifest is a single JSON document declaring the tasks, the
//! dependency edges between them, and the shared resources tasks may
//! require. It is read once at startup; the coordinator never writes it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::core::task::{Task, TaskId};
use crate::{flog_debug, Result};

/// A dependency edge: `from` must complete before `to` may start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: TaskId,
    pub to: TaskId,
}

/// Declaration of a coordinator-managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ResourceSpec {
    /// Only one task may hold the resource at a time.
    Exclusive,
    /// Up to `capacity` tasks may hold the resource concurrently.
    Shared { capacity: usize },
}

/// The parsed manifest: task definitions, dependency edges, and resource
/// declarations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub resources: HashMap<String, ResourceSpec>,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&content)?;
        flog_debug!(
            "Manifest loaded from {}: {} tasks, {} edges, {} resources",
            path.display(),
            manifest.tasks.len(),
            manifest.edges.len(),
            manifest.resources.len()
        );
        Ok(manifest)
    }
}
