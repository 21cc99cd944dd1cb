use octocrab::params::repos::Reference;
use octocrab::Octocrab;
use tracing::debug;

use super::errors::GitHubError;
use super::retry::RetryHandler;

/// Handler for GitHub branch (git ref) operations.
#[derive(Debug, Clone)]
pub struct BranchHandler {
    octocrab: Octocrab,
    owner: String,
    repo: String,
    retry: RetryHandler,
}

impl BranchHandler {
    pub fn new(octocrab: Octocrab, owner: String, repo: String) -> Self {
        Self {
            octocrab,
            owner,
            repo,
            retry: RetryHandler::default(),
        }
    }

    /// Repository default branch name.
    pub async fn default_branch(&self) -> Result<String, GitHubError> {
        let repository = self
            .retry
            .run("get_repo", || async move {
                self.octocrab.repos(&self.owner, &self.repo).get().await
            })
            .await?;
        Ok(repository
            .default_branch
            .unwrap_or_else(|| "main".to_string()))
    }

    /// Create a branch pointing at the current head of the default branch.
    pub async fn create_branch_from_default(
        &self,
        branch_name: &str,
    ) -> Result<(), GitHubError> {
        let base = self.default_branch().await?;
        let base_ref = self
            .retry
            .run("get_ref", || {
                let base = base.clone();
                async move {
                    self.octocrab
                        .repos(&self.owner, &self.repo)
                        .get_ref(&Reference::Branch(base))
                        .await
                }
            })
            .await?;

        let sha = match base_ref.object {
            octocrab::models::repos::Object::Commit { sha, .. } => sha,
            octocrab::models::repos::Object::Tag { sha, .. } => sha,
            _ => {
                return Err(GitHubError::Network(format!(
                    "unexpected ref object for branch {base}"
                )))
            }
        };

        self.octocrab
            .repos(&self.owner, &self.repo)
            .create_ref(&Reference::Branch(branch_name.to_string()), sha)
            .await
            .map_err(GitHubError::Api)?;
        debug!(branch = branch_name, from = %base, "created branch");
        Ok(())
    }

    /// Whether the current credential can push to this repository.
    pub async fn has_write_access(&self) -> Result<bool, GitHubError> {
        let repository = self
            .retry
            .run("get_repo_permissions", || async move {
                self.octocrab.repos(&self.owner, &self.repo).get().await
            })
            .await?;
        Ok(repository
            .permissions
            .map(|p| p.push)
            .unwrap_or(false))
    }
}
