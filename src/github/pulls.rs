use std::collections::HashSet;

use octocrab::Octocrab;
use serde::Serialize;
use tracing::debug;

use super::errors::GitHubError;
use super::retry::RetryHandler;
use super::types::{CheckRunList, CheckStatus, PrState, ReviewStatus};

/// Handler for GitHub pull request operations.
#[derive(Debug, Clone)]
pub struct PullRequestHandler {
    octocrab: Octocrab,
    owner: String,
    repo: String,
    retry: RetryHandler,
}

/// Aggregated PR status: state, CI checks, and reviews in one report.
#[derive(Debug, Clone, Serialize)]
pub struct PullRequestStatus {
    pub number: u64,
    pub state: PrState,
    pub checks: CheckStatus,
    pub reviews: ReviewStatus,
    pub reviewers: Vec<String>,
    pub head_sha: String,
    pub html_url: Option<String>,
}

impl PullRequestStatus {
    pub fn is_merged(&self) -> bool {
        self.state == PrState::Merged
    }
}

impl PullRequestHandler {
    pub fn new(octocrab: Octocrab, owner: String, repo: String) -> Self {
        Self {
            octocrab,
            owner,
            repo,
            retry: RetryHandler::default(),
        }
    }

    /// Open a pull request from `head` into `base`.
    pub async fn create_pull_request(
        &self,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<(u64, Option<String>), GitHubError> {
        let pr = self
            .octocrab
            .pulls(&self.owner, &self.repo)
            .create(title, head, base)
            .body(body)
            .send()
            .await
            .map_err(GitHubError::Api)?;
        debug!(pr = pr.number, head, "created pull request");
        Ok((pr.number, pr.html_url.map(|u| u.to_string())))
    }

    /// Aggregate state, check runs, and reviews for a PR.
    ///
    /// State mapping: `merged` iff GitHub reports the PR closed with the
    /// merged flag set; otherwise open/closed pass through.
    pub async fn get_status(&self, pr_number: u64) -> Result<PullRequestStatus, GitHubError> {
        let pr = self
            .retry
            .run("get_pull_request", || async move {
                self.octocrab
                    .pulls(&self.owner, &self.repo)
                    .get(pr_number)
                    .await
            })
            .await?;

        let merged = pr.merged_at.is_some();
        let open = matches!(pr.state, Some(octocrab::models::IssueState::Open));
        let state = if merged {
            PrState::Merged
        } else if open {
            PrState::Open
        } else {
            PrState::Closed
        };

        let head_sha = pr.head.sha.clone();
        let checks = self.aggregate_checks(&head_sha).await?;
        let (reviews, reviewers) = self.aggregate_reviews(pr_number).await?;

        Ok(PullRequestStatus {
            number: pr_number,
            state,
            checks,
            reviews,
            reviewers,
            head_sha,
            html_url: pr.html_url.map(|u| u.to_string()),
        })
    }

    /// `none` with no runs; `failing` if any run concluded
    /// failure/timed_out/cancelled; else `pending` if any run is still
    /// queued/in_progress; else `passing`.
    async fn aggregate_checks(&self, sha: &str) -> Result<CheckStatus, GitHubError> {
        let route = format!(
            "/repos/{}/{}/commits/{}/check-runs",
            self.owner, self.repo, sha
        );
        let list: CheckRunList = self
            .octocrab
            .get(route, None::<&()>)
            .await
            .map_err(GitHubError::Api)?;

        if list.check_runs.is_empty() {
            return Ok(CheckStatus::None);
        }
        let failing = list.check_runs.iter().any(|run| {
            matches!(
                run.conclusion.as_deref(),
                Some("failure") | Some("timed_out") | Some("cancelled")
            )
        });
        if failing {
            return Ok(CheckStatus::Failing);
        }
        let pending = list
            .check_runs
            .iter()
            .any(|run| run.status == "queued" || run.status == "in_progress");
        if pending {
            Ok(CheckStatus::Pending)
        } else {
            Ok(CheckStatus::Passing)
        }
    }

    /// `approved` iff any review is APPROVED; `changes_requested` iff any is
    /// CHANGES_REQUESTED (approval wins); reviewers deduplicated by login.
    async fn aggregate_reviews(
        &self,
        pr_number: u64,
    ) -> Result<(ReviewStatus, Vec<String>), GitHubError> {
        let page = self
            .retry
            .run("list_reviews", || async move {
                self.octocrab
                    .pulls(&self.owner, &self.repo)
                    .list_reviews(pr_number)
                    .send()
                    .await
            })
            .await?;

        let mut approved = false;
        let mut changes_requested = false;
        let mut commented = false;
        let mut seen = HashSet::new();
        let mut reviewers = Vec::new();

        for review in &page.items {
            if let Some(user) = &review.user {
                if seen.insert(user.login.clone()) {
                    reviewers.push(user.login.clone());
                }
            }
            match review.state {
                Some(octocrab::models::pulls::ReviewState::Approved) => approved = true,
                Some(octocrab::models::pulls::ReviewState::ChangesRequested) => {
                    changes_requested = true
                }
                Some(octocrab::models::pulls::ReviewState::Commented) => commented = true,
                _ => {}
            }
        }

        let status = if approved {
            ReviewStatus::Approved
        } else if changes_requested {
            ReviewStatus::ChangesRequested
        } else if commented {
            ReviewStatus::Commented
        } else {
            ReviewStatus::None
        };
        Ok((status, reviewers))
    }
}
