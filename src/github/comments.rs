use octocrab::Octocrab;
use tracing::debug;

use super::errors::GitHubError;

/// Handler for GitHub comment operations.
#[derive(Debug, Clone)]
pub struct CommentHandler {
    octocrab: Octocrab,
    owner: String,
    repo: String,
}

impl CommentHandler {
    pub fn new(octocrab: Octocrab, owner: String, repo: String) -> Self {
        Self {
            octocrab,
            owner,
            repo,
        }
    }

    /// Create a comment on an issue.
    pub async fn create_issue_comment(
        &self,
        issue_number: u64,
        body: &str,
    ) -> Result<(), GitHubError> {
        self.octocrab
            .issues(&self.owner, &self.repo)
            .create_comment(issue_number, body)
            .await
            .map_err(GitHubError::Api)?;
        debug!(issue = issue_number, "created comment");
        Ok(())
    }
}
