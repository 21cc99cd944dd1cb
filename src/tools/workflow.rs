// Workflow operations: advance_workflow and get_workflow_status. Phase
// legality lives in the workflow store; the side effects of the `branch`
// and `pr` transitions live here.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::audit::{AuditOutcome, AuditRecord};
use crate::config::RepoSpec;
use crate::coordination::{AdvanceRequest, Phase, WorkflowState};
use crate::engine::Engine;
use crate::github::client::GitHubOps;

use super::{parse_args, ErrorCode, ToolError, ToolResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvanceParams {
    repo: Option<String>,
    issue_number: u64,
    target_phase: String,
    tests_passed: Option<bool>,
    skip_justification: Option<String>,
    pr_title: Option<String>,
    pr_body: Option<String>,
}

fn parse_phase(value: &str) -> Result<Phase, ToolError> {
    serde_json::from_value(Value::String(value.to_string()))
        .map_err(|_| ToolError::invalid_input(format!("unknown phase `{value}`")))
}

/// Slug for branch names: lower-cased title, non-alphanumerics collapsed to
/// single dashes, truncated to 50 chars, trailing dash stripped.
fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= 50 {
            break;
        }
    }
    slug.truncate(50);
    slug.trim_end_matches('-').to_string()
}

pub(crate) fn branch_name_for(issue_number: u64, title: &str) -> String {
    format!("{issue_number}-{}", slugify(title))
}

/// Advance a claimed issue's workflow. Only the lock-holding session may
/// advance; the `branch` and `pr` transitions carry remote side effects.
pub async fn advance_workflow(engine: &Engine, args: Value) -> ToolResult {
    let params: AdvanceParams = parse_args(args)?;
    let target = parse_phase(&params.target_phase)?;
    let repo = RepoSpec::resolve(params.repo.as_deref())?;
    let number = params.issue_number;

    // Phase mutation is serialized per issue by the lock.
    match engine.locks.get(&repo, number)? {
        Some((record, _)) if record.session_id == engine.session_id => {}
        Some((record, _)) => {
            return Err(ToolError::new(
                ErrorCode::NotLocked,
                format!(
                    "issue #{number} is locked by session {}, not this one",
                    record.session_id
                ),
            ));
        }
        None => {
            return Err(ToolError::new(
                ErrorCode::NotLocked,
                format!("issue #{number} is not locked by this session"),
            ));
        }
    }

    // Holder touch: a long-running workflow must not drift toward the
    // staleness deadline between phases.
    engine.locks.refresh(&repo, number, &engine.session_id)?;

    let state = engine
        .workflows
        .load(&repo, number)?
        .ok_or_else(|| ToolError::from(crate::coordination::WorkflowError::NotFound(number)))?;

    // Validate the transition up front so remote side effects never run for
    // a move the store would refuse.
    let request = AdvanceRequest {
        target,
        tests_passed: params.tests_passed,
        skip_justification: params.skip_justification.clone(),
        trigger: "advance_workflow".to_string(),
        session_id: engine.session_id.clone(),
    };
    crate::coordination::workflow::validate_transition(state.phase, &request)?;

    let client = engine.client_for(&repo);
    let mut new_branch = None;
    let mut new_pr: Option<(u64, Option<String>)> = None;

    if target == Phase::Branch && state.branch_name.is_none() {
        let issue = client.fetch_issue(number).await?;
        let branch = branch_name_for(number, &issue.title);
        client.create_branch_from_default(&branch).await?;
        new_branch = Some(branch);
    }

    if target == Phase::Pr {
        let branch = state.branch_name.clone().ok_or_else(|| {
            ToolError::new(
                ErrorCode::InvalidPhaseTransition,
                "cannot open a PR before a branch exists for this issue",
            )
        })?;
        let title = params.pr_title.as_deref().ok_or_else(|| {
            ToolError::invalid_input("prTitle is required when advancing to pr")
        })?;
        let body = params.pr_body.as_deref().ok_or_else(|| {
            ToolError::invalid_input("prBody is required when advancing to pr")
        })?;
        let base = client.default_branch().await?;
        let (pr_number, pr_url) = client
            .create_pull_request(title, &branch, &base, body)
            .await?;
        client.remove_label(number, "status:in-progress").await?;
        client.add_label(number, "status:in-review").await?;
        new_pr = Some((pr_number, pr_url));
    }

    let (previous, mut state) = engine.workflows.advance(&repo, number, request)?;

    if let Some(branch) = &new_branch {
        state = engine.workflows.set_branch(&repo, number, branch)?;
    }
    if let Some((pr_number, _)) = &new_pr {
        state = engine.workflows.set_pr(&repo, number, *pr_number)?;
    }

    engine.audit.append_best_effort(
        AuditRecord::new("advance_workflow", &engine.session_id, AuditOutcome::Success)
            .repo(&repo.full_name())
            .issue(number)
            .phase(&state.phase.to_string())
            .meta("from", json!(previous.to_string())),
    );
    info!(issue = number, from = %previous, to = %state.phase, "workflow advanced");

    Ok(json!({
        "issueNumber": number,
        "previousPhase": previous,
        "currentPhase": state.phase,
        "branchName": state.branch_name,
        "prNumber": new_pr.as_ref().map(|(n, _)| n),
        "prUrl": new_pr.as_ref().and_then(|(_, url)| url.clone()),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusParams {
    repo: Option<String>,
    issue_number: Option<u64>,
}

fn workflow_payload(state: &WorkflowState) -> Value {
    json!({
        "issueNumber": state.issue_number,
        "repository": state.repo,
        "phase": state.phase,
        "branchName": state.branch_name,
        "testsPassed": state.tests_passed,
        "prNumber": state.pr_number,
        "phaseHistory": state.phase_history,
        "skipJustifications": state.skip_justifications,
    })
}

/// One issue's workflow record, or every workflow this session holds a
/// lock for.
pub async fn get_workflow_status(engine: &Engine, args: Value) -> ToolResult {
    let params: StatusParams = parse_args(args)?;

    if let Some(number) = params.issue_number {
        let repo = RepoSpec::resolve(params.repo.as_deref())?;
        let state = engine
            .workflows
            .load(&repo, number)?
            .ok_or_else(|| ToolError::from(crate::coordination::WorkflowError::NotFound(number)))?;
        return Ok(json!({ "workflow": workflow_payload(&state) }));
    }

    let mut workflows = Vec::new();
    for entry in engine.locks.list_for_session(&engine.session_id)? {
        let repo = RepoSpec {
            owner: entry.owner.clone(),
            repo: entry.repo_name.clone(),
        };
        let workflow = engine
            .workflows
            .load(&repo, entry.record.issue_number)?
            .map(|state| workflow_payload(&state));
        workflows.push(json!({
            "issueNumber": entry.record.issue_number,
            "repository": entry.record.repo,
            "acquiredAt": entry.record.acquired_at,
            "stale": entry.stale,
            "workflow": workflow,
        }));
    }

    Ok(json!({
        "sessionId": engine.session_id,
        "count": workflows.len(),
        "locks": workflows,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_collapses_runs_and_lowercases() {
        assert_eq!(slugify("Fix the  Thing!"), "fix-the-thing");
        assert_eq!(
            branch_name_for(42, "Add retry budget (v2)"),
            "42-add-retry-budget-v2"
        );
    }

    #[test]
    fn slug_truncates_to_fifty_and_strips_trailing_dash() {
        let long = "a".repeat(49) + " tail that goes on and on";
        let slug = slugify(&long);
        assert!(slug.len() <= 50);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn slug_of_symbols_is_empty() {
        assert_eq!(slugify("!!!"), "");
        assert_eq!(branch_name_for(7, "!!!"), "7-");
    }

    #[test]
    fn phase_names_parse() {
        assert_eq!(parse_phase("research").unwrap(), Phase::Research);
        assert_eq!(parse_phase("pr").unwrap(), Phase::Pr);
        assert!(parse_phase("bogus").is_err());
    }
}
