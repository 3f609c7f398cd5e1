//! Task dependency graph.
//!
//! The graph is built once from the manifest and validated at load time:
//! duplicate task ids, edges referencing unknown tasks, and cycles are all
//! hard errors rather than silently tolerated. After load the graph is only
//! mutated through explicit repair-task injection.

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

use crate::core::task::{Task, TaskId};
use crate::manifest::Manifest;
use crate::{Error, Result};

/// Directed acyclic graph over the manifest's tasks.
///
/// Nodes are task definitions; an edge A -> B means A must complete before
/// B may start.
pub struct TaskGraph {
    /// The underlying directed graph.
    graph: DiGraph<Task, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    /// Create an empty graph. Mostly useful in tests; production graphs come
    /// from `load`.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Build and validate the graph from a parsed manifest.
    ///
    /// # Errors
    /// Returns `Error::GraphLoad` if:
    /// - two tasks share an id
    /// - an edge references a task id that is not declared
    /// - the edge set contains a cycle
    pub fn load(manifest: &Manifest) -> Result<Self> {
        let mut graph = Self::new();

        for task in &manifest.tasks {
            if graph.task_index.contains_key(&task.id) {
                return Err(Error::GraphLoad(format!(
                    "Duplicate task id: {}",
                    task.id
                )));
            }
            let index = graph.graph.add_node(task.clone());
            graph.task_index.insert(task.id.clone(), index);
        }

        for edge in &manifest.edges {
            let from = graph.task_index.get(&edge.from).ok_or_else(|| {
                Error::GraphLoad(format!(
                    "Edge references unknown task id: {} (-> {})",
                    edge.from, edge.to
                ))
            })?;
            let to = graph.task_index.get(&edge.to).ok_or_else(|| {
                Error::GraphLoad(format!(
                    "Edge references unknown task id: {} ({} ->)",
                    edge.to, edge.from
                ))
            })?;
            graph.graph.add_edge(*from, *to, ());
        }

        if is_cyclic_directed(&graph.graph) {
            return Err(Error::GraphLoad(
                "Dependency edges contain a cycle".to_string(),
            ));
        }

        Ok(graph)
    }

    /// Insert a task after load (circuit-breaker repair injection).
    ///
    /// The task is added with no edges, so it becomes ready on the next
    /// scheduling tick.
    ///
    /// # Errors
    /// Returns an error if a task with the same id already exists.
    pub fn insert_task(&mut self, task: Task) -> Result<()> {
        if self.task_index.contains_key(&task.id) {
            return Err(Error::Validation(format!(
                "Task {} already exists in graph",
                task.id
            )));
        }
        let id = task.id.clone();
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        Ok(())
    }

    /// Get a task definition by id.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Whether the graph contains a task.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// Number of tasks in the graph.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of dependency edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All task ids in the graph.
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.task_index.keys()
    }

    /// Ids of every task that must complete before the given task.
    pub fn predecessors(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbor_ids(id, petgraph::Direction::Incoming)
    }

    /// Ids of every task that depends on the given task.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbor_ids(id, petgraph::Direction::Outgoing)
    }

    fn neighbor_ids(&self, id: &TaskId, direction: petgraph::Direction) -> Vec<TaskId> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph
                .neighbors_directed(index, direction)
                .filter_map(|neighbor| self.graph.node_weight(neighbor))
                .map(|task| task.id.clone())
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Tasks whose every predecessor is completed, excluding those in the
    /// `excluded` set (already dispatched, failed, or completed).
    ///
    /// This is the frontier computation; it is done from scratch on every
    /// call rather than incrementally patched.
    pub fn ready_tasks(
        &self,
        completed: &HashSet<TaskId>,
        excluded: &HashSet<TaskId>,
    ) -> Vec<TaskId> {
        self.graph
            .node_indices()
            .filter_map(|index| {
                let task = self.graph.node_weight(index)?;
                if completed.contains(&task.id) || excluded.contains(&task.id) {
                    return None;
                }

                let deps_satisfied = self
                    .graph
                    .neighbors_directed(index, petgraph::Direction::Incoming)
                    .all(|dep_index| {
                        self.graph
                            .node_weight(dep_index)
                            .map(|dep| completed.contains(&dep.id))
                            .unwrap_or(false)
                    });

                if deps_satisfied {
                    Some(task.id.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Whether every task in the graph is in the given set.
    pub fn all_in(&self, set: &HashSet<TaskId>) -> bool {
        self.task_index.keys().all(|id| set.contains(id))
    }

    /// Tasks in topological order (each task after all its predecessors).
    ///
    /// Used by the dry-run plan output. Load-time validation rejects cycles,
    /// so this only fails if a cyclic repair task was somehow injected.
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let task_id = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.id.as_str())
                .unwrap_or("unknown");
            Error::Validation(format!("Cycle detected at task: {}", task_id))
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index))
            .collect())
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}
