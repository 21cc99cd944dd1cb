// Corral - coordination service for autonomous agents working a shared
// GitHub issue backlog. This exposes the core components for testing and
// integration.

pub mod audit;
pub mod config;
pub mod coordination;
pub mod engine;
pub mod github;
pub mod priority;
pub mod server;
pub mod telemetry;
pub mod tools;

// Re-export key types for easy access
pub use audit::{AuditLog, AuditOutcome, AuditRecord};
pub use config::{RepoSpec, StoragePaths};
pub use coordination::{
    BatchState, BatchStatus, BatchStore, LockRecord, LockStore, Phase, WorkflowState, WorkflowStore,
};
pub use engine::Engine;
pub use github::{GitHubClient, GitHubError, IssueSummary};
pub use priority::{calculate_score, PriorityClass, PriorityScore};
pub use telemetry::{generate_session_id, init_telemetry};
