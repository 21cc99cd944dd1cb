// GitHub remote client: typed wrapper over the REST endpoints the
// coordination engine consumes, split into per-concern handlers.

pub mod branches;
pub mod client;
pub mod comments;
pub mod errors;
pub mod issues;
pub mod labels;
pub mod pulls;
pub mod retry;
pub mod types;

pub use client::GitHubClient;
pub use errors::GitHubError;
pub use labels::{label_families, LabelSpec};
pub use pulls::PullRequestStatus;
pub use types::{CheckStatus, IssueSummary, PrState, ReviewStatus};
