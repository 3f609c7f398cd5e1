//! Coordination: the rolling-frontier scheduler and its supporting pieces.

pub mod coordinator;
pub mod frontier;
pub mod remedy;
pub mod resources;
pub mod stats;

pub use coordinator::{resolve_help, write_override_completion, Coordinator, Phase, TickReport};
pub use frontier::FrontierState;
pub use remedy::{CircuitBreaker, Remediation, Remedy};
pub use resources::ResourceManager;
pub use stats::ProgressSnapshot;
