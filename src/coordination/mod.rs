// Filesystem-backed coordination state shared by every session on the host:
// per-issue claim files, per-issue workflow records, and per-batch queues.

pub mod batch;
pub mod locks;
pub mod process;
pub mod workflow;

pub use batch::{BatchError, BatchState, BatchStatus, BatchStore, CompletedIssue};
pub use locks::{LockEntry, LockError, LockRecord, LockStore};
pub use process::{ProcessProbe, StaticProcessProbe, SystemProcessProbe};
pub use workflow::{
    AdvanceRequest, Phase, PhaseTransition, SkipJustification, WorkflowError, WorkflowState,
    WorkflowStore,
};
