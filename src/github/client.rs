use async_trait::async_trait;
use octocrab::Octocrab;

#[cfg(test)]
use mockall::automock;

use super::branches::BranchHandler;
use super::comments::CommentHandler;
use super::errors::GitHubError;
use super::issues::IssueHandler;
use super::labels::LabelHandler;
use super::pulls::{PullRequestHandler, PullRequestStatus};
use super::types::{IssueSummary, ParentIssue};

/// Trait over the remote operations the engine needs, so tool handlers can
/// be exercised against a test double.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GitHubOps: Send + Sync {
    async fn fetch_open_issues(&self) -> Result<Vec<IssueSummary>, GitHubError>;
    async fn fetch_issue(&self, issue_number: u64) -> Result<IssueSummary, GitHubError>;
    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: Vec<String>,
    ) -> Result<IssueSummary, GitHubError>;
    async fn add_label(&self, issue_number: u64, label: &str) -> Result<(), GitHubError>;
    async fn remove_label(&self, issue_number: u64, label: &str) -> Result<(), GitHubError>;
    async fn close_issue(&self, issue_number: u64) -> Result<(), GitHubError>;
    async fn reopen_issue(&self, issue_number: u64) -> Result<(), GitHubError>;
    async fn add_comment(&self, issue_number: u64, body: &str) -> Result<(), GitHubError>;
    async fn fetch_parent(&self, issue_number: u64) -> Option<ParentIssue>;
    async fn create_branch_from_default(&self, branch_name: &str) -> Result<(), GitHubError>;
    async fn create_pull_request(
        &self,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<(u64, Option<String>), GitHubError>;
    async fn get_pr_status(&self, pr_number: u64) -> Result<PullRequestStatus, GitHubError>;
    async fn has_write_access(&self) -> Result<bool, GitHubError>;
    async fn ensure_labels_exist(&self) -> Result<Vec<(String, String)>, GitHubError>;
    async fn default_branch(&self) -> Result<String, GitHubError>;
    fn owner(&self) -> &str;
    fn repo(&self) -> &str;
}

/// Facade over the per-concern handlers, bound to one `(owner, repo)` pair.
/// Cheap to construct per operation: `Octocrab` clones share the underlying
/// HTTP client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    pub issues: IssueHandler,
    pub pulls: PullRequestHandler,
    pub branches: BranchHandler,
    pub comments: CommentHandler,
    pub labels: LabelHandler,
    owner: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(octocrab: Octocrab, owner: String, repo: String) -> Self {
        GitHubClient {
            issues: IssueHandler::new(octocrab.clone(), owner.clone(), repo.clone()),
            pulls: PullRequestHandler::new(octocrab.clone(), owner.clone(), repo.clone()),
            branches: BranchHandler::new(octocrab.clone(), owner.clone(), repo.clone()),
            comments: CommentHandler::new(octocrab.clone(), owner.clone(), repo.clone()),
            labels: LabelHandler::new(octocrab, owner.clone(), repo.clone()),
            owner,
            repo,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[async_trait]
impl GitHubOps for GitHubClient {
    async fn fetch_open_issues(&self) -> Result<Vec<IssueSummary>, GitHubError> {
        self.issues.fetch_open_issues().await
    }

    async fn fetch_issue(&self, issue_number: u64) -> Result<IssueSummary, GitHubError> {
        self.issues.fetch_issue(issue_number).await
    }

    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: Vec<String>,
    ) -> Result<IssueSummary, GitHubError> {
        self.issues.create_issue(title, body, labels).await
    }

    async fn add_label(&self, issue_number: u64, label: &str) -> Result<(), GitHubError> {
        self.issues.add_label(issue_number, label).await
    }

    async fn remove_label(&self, issue_number: u64, label: &str) -> Result<(), GitHubError> {
        self.issues.remove_label(issue_number, label).await
    }

    async fn close_issue(&self, issue_number: u64) -> Result<(), GitHubError> {
        self.issues
            .set_state(issue_number, octocrab::models::IssueState::Closed)
            .await
    }

    async fn reopen_issue(&self, issue_number: u64) -> Result<(), GitHubError> {
        self.issues
            .set_state(issue_number, octocrab::models::IssueState::Open)
            .await
    }

    async fn add_comment(&self, issue_number: u64, body: &str) -> Result<(), GitHubError> {
        self.comments.create_issue_comment(issue_number, body).await
    }

    async fn fetch_parent(&self, issue_number: u64) -> Option<ParentIssue> {
        self.issues.fetch_parent(issue_number).await
    }

    async fn create_branch_from_default(&self, branch_name: &str) -> Result<(), GitHubError> {
        self.branches.create_branch_from_default(branch_name).await
    }

    async fn create_pull_request(
        &self,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<(u64, Option<String>), GitHubError> {
        self.pulls.create_pull_request(title, head, base, body).await
    }

    async fn get_pr_status(&self, pr_number: u64) -> Result<PullRequestStatus, GitHubError> {
        self.pulls.get_status(pr_number).await
    }

    async fn has_write_access(&self) -> Result<bool, GitHubError> {
        self.branches.has_write_access().await
    }

    async fn ensure_labels_exist(&self) -> Result<Vec<(String, String)>, GitHubError> {
        self.labels.ensure_labels_exist().await
    }

    async fn default_branch(&self) -> Result<String, GitHubError> {
        self.branches.default_branch().await
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    fn repo(&self) -> &str {
        &self.repo
    }
}
