// PR status aggregation: one call returning state, checks, and reviews.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::RepoSpec;
use crate::engine::Engine;
use crate::github::client::GitHubOps;

use super::{parse_args, ToolResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrStatusParams {
    repo: Option<String>,
    pr_number: u64,
}

pub async fn get_pr_status(engine: &Engine, args: Value) -> ToolResult {
    let params: PrStatusParams = parse_args(args)?;
    let repo = RepoSpec::resolve(params.repo.as_deref())?;
    let client = engine.client_for(&repo);

    let status = client.get_pr_status(params.pr_number).await?;
    Ok(json!({
        "prNumber": status.number,
        "state": status.state,
        "merged": status.is_merged(),
        "checks": status.checks,
        "reviews": status.reviews,
        "reviewers": status.reviewers,
        "headSha": status.head_sha,
        "url": status.html_url,
    }))
}
