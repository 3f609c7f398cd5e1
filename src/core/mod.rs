//! Core data structures: task definitions and the dependency graph.

pub mod graph;
pub mod task;

pub use graph::TaskGraph;
pub use task::{DefinitionOfDone, ExecutionRecord, Task, TaskId, TaskState};
