use octocrab::Octocrab;
use tracing::debug;

use super::errors::GitHubError;
use super::retry::RetryHandler;
use super::types::{IssueSummary, ParentIssue};

/// Handler for GitHub issue operations.
#[derive(Debug, Clone)]
pub struct IssueHandler {
    octocrab: Octocrab,
    owner: String,
    repo: String,
    retry: RetryHandler,
}

impl IssueHandler {
    pub fn new(octocrab: Octocrab, owner: String, repo: String) -> Self {
        Self {
            octocrab,
            owner,
            repo,
            retry: RetryHandler::default(),
        }
    }

    /// Fetch every open issue, following pagination. Pull requests come back
    /// on the same endpoint and are filtered out here.
    pub async fn fetch_open_issues(&self) -> Result<Vec<IssueSummary>, GitHubError> {
        let page = self
            .retry
            .run("list_issues", || async move {
                self.octocrab
                    .issues(&self.owner, &self.repo)
                    .list()
                    .state(octocrab::params::State::Open)
                    .per_page(100)
                    .send()
                    .await
            })
            .await?;

        let issues: Vec<octocrab::models::issues::Issue> =
            self.octocrab.all_pages(page).await.map_err(GitHubError::Api)?;

        Ok(issues
            .iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(IssueSummary::from_octocrab)
            .collect())
    }

    /// Fetch a single issue by number.
    pub async fn fetch_issue(&self, issue_number: u64) -> Result<IssueSummary, GitHubError> {
        let issue = self
            .retry
            .run("get_issue", || async move {
                self.octocrab
                    .issues(&self.owner, &self.repo)
                    .get(issue_number)
                    .await
            })
            .await?;
        Ok(IssueSummary::from_octocrab(&issue))
    }

    /// Create a new issue with the given labels.
    pub async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: Vec<String>,
    ) -> Result<IssueSummary, GitHubError> {
        let issue = self
            .octocrab
            .issues(&self.owner, &self.repo)
            .create(title)
            .body(body)
            .labels(labels)
            .send()
            .await
            .map_err(GitHubError::Api)?;
        debug!(issue = issue.number, "created issue");
        Ok(IssueSummary::from_octocrab(&issue))
    }

    /// Add a label. Adding one that is already present is a successful no-op
    /// on the GitHub side, so no pre-check is needed.
    pub async fn add_label(&self, issue_number: u64, label: &str) -> Result<(), GitHubError> {
        self.retry
            .run("add_label", || async move {
                self.octocrab
                    .issues(&self.owner, &self.repo)
                    .add_labels(issue_number, &[label.to_string()])
                    .await
            })
            .await?;
        Ok(())
    }

    /// Remove a label; absence is treated as success.
    pub async fn remove_label(&self, issue_number: u64, label: &str) -> Result<(), GitHubError> {
        let result = self
            .octocrab
            .issues(&self.owner, &self.repo)
            .remove_label(issue_number, label)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(octocrab::Error::GitHub { source, .. })
                if source.status_code.as_u16() == 404 =>
            {
                Ok(())
            }
            Err(e) => Err(GitHubError::Api(e)),
        }
    }

    /// Set the open/closed state of an issue.
    pub async fn set_state(
        &self,
        issue_number: u64,
        state: octocrab::models::IssueState,
    ) -> Result<(), GitHubError> {
        self.retry
            .run("set_issue_state", || {
                let state = state.clone();
                async move {
                    self.octocrab
                        .issues(&self.owner, &self.repo)
                        .update(issue_number)
                        .state(state)
                        .send()
                        .await
                }
            })
            .await?;
        Ok(())
    }

    /// Sub-issue parent lookup. This signal is advisory: any failure, from a
    /// 404 to a deserialization mismatch, degrades to "no parent".
    pub async fn fetch_parent(&self, issue_number: u64) -> Option<ParentIssue> {
        let route = format!(
            "/repos/{}/{}/issues/{}/parent",
            self.owner, self.repo, issue_number
        );
        match self.octocrab.get::<ParentIssue, _, ()>(route, None).await {
            Ok(parent) => Some(parent),
            Err(e) => {
                debug!(issue = issue_number, error = %e, "parent lookup degraded to none");
                None
            }
        }
    }
}
