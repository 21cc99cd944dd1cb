use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Projection of a GitHub issue carrying only what the coordination engine
/// consumes. Keeping the projection small makes scoring inputs explicit and
/// lets tests build issues without octocrab model plumbing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueSummary {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub html_url: String,
}

impl IssueSummary {
    pub fn from_octocrab(issue: &octocrab::models::issues::Issue) -> Self {
        Self {
            number: issue.number,
            title: issue.title.clone(),
            body: issue.body.clone(),
            state: format!("{:?}", issue.state).to_lowercase(),
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
            assignees: issue.assignees.iter().map(|u| u.login.clone()).collect(),
            html_url: issue.html_url.to_string(),
        }
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l == name)
    }

    /// First label value under the given prefix, e.g. `type:` -> `bug`.
    pub fn label_value(&self, prefix: &str) -> Option<&str> {
        self.labels
            .iter()
            .find_map(|l| l.strip_prefix(prefix))
    }
}

/// Pull request state as the engine sees it: `merged` wins over `closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

/// Aggregate CI status across all check runs on a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    None,
    Pending,
    Passing,
    Failing,
}

/// Aggregate review status across a PR's reviews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    None,
    Approved,
    ChangesRequested,
    Commented,
}

/// Minimal issue shape for the sub-issue parent lookup. The endpoint is
/// advisory; callers must degrade to "no parent" on any error.
#[derive(Debug, Clone, Deserialize)]
pub struct ParentIssue {
    pub number: u64,
    pub state: String,
    #[serde(default)]
    pub title: String,
}

impl ParentIssue {
    pub fn is_open(&self) -> bool {
        self.state == "open"
    }
}

/// Wire shape of the check-runs listing used by the raw route.
#[derive(Debug, Deserialize)]
pub struct CheckRunList {
    #[serde(default)]
    pub check_runs: Vec<CheckRun>,
}

#[derive(Debug, Deserialize)]
pub struct CheckRun {
    pub status: String,
    pub conclusion: Option<String>,
}
