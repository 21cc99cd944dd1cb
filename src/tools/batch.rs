// Batch orchestration: implement_batch queues the top-priority issues for
// sequential delivery, and batch_continue drives the create-PR-then-wait
// loop until the queue drains, the deadline hits, or the caller resumes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::{RepoSpec, BATCH_POLL_DEADLINE, BATCH_POLL_INTERVAL};
use crate::coordination::BatchStatus;
use crate::engine::Engine;
use crate::github::client::GitHubOps;
use crate::priority::{PriorityClass, PriorityScore};
use uuid::Uuid;

use super::backlog::{filter_from, scored_backlog, ScoredIssue};
use super::{parse_args, ErrorCode, ToolError, ToolResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImplementBatchParams {
    repo: Option<String>,
    count: usize,
    max_priority: Option<String>,
    include_types: Option<Vec<String>>,
    exclude_types: Option<Vec<String>>,
}

const BATCH_MAX: usize = 10;

/// What the caller should do next.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum BatchAction {
    Implement,
    Empty,
    Complete,
    Timeout,
}

fn batch_issue_payload(number: u64, title: &str, url: &str, score: Option<&PriorityScore>) -> Value {
    json!({
        "number": number,
        "title": title,
        "url": url,
        "totalScore": score.map(|s| s.total),
    })
}

fn implement_instructions(number: u64) -> String {
    format!(
        "Implement issue #{number} on its own branch, open a pull request, \
         then call batch_continue with this batch id and the PR number."
    )
}

/// Queue the top `count` issues (optionally capped by a priority ceiling)
/// and hand out the first one.
pub async fn implement_batch(engine: &Engine, args: Value) -> ToolResult {
    let params: ImplementBatchParams = parse_args(args)?;
    if params.count == 0 || params.count > BATCH_MAX {
        return Err(ToolError::invalid_input(format!(
            "count must be between 1 and {BATCH_MAX}"
        )));
    }
    let ceiling = match &params.max_priority {
        Some(value) => Some(PriorityClass::parse(value).ok_or_else(|| {
            ToolError::invalid_input(format!("unknown priority `{value}`"))
        })?),
        None => None,
    };

    let repo = RepoSpec::resolve(params.repo.as_deref())?;
    let client = engine.client_for(&repo);
    let filter = filter_from(params.include_types, params.exclude_types);

    let scored = scored_backlog(&client, &filter).await?;
    let eligible: Vec<&ScoredIssue> = scored
        .iter()
        .filter(|candidate| match ceiling {
            // A ceiling of high (P1) keeps critical and high (P0, P1).
            Some(ceiling) => {
                PriorityClass::from_labels(&candidate.issue.labels) >= ceiling
            }
            None => true,
        })
        .take(params.count)
        .collect();

    if eligible.is_empty() {
        return Ok(json!({
            "action": BatchAction::Empty,
            "repository": repo.full_name(),
            "message": "no eligible issues for this batch",
        }));
    }

    let queue: Vec<u64> = eligible.iter().map(|c| c.issue.number).collect();
    let batch = engine.batches.create(&repo.full_name(), queue)?;
    let first = engine.batches.start_next(batch.id).await?.ok_or_else(|| {
        ToolError::new(ErrorCode::InternalError, "fresh batch had an empty queue")
    })?;
    let candidate = eligible
        .iter()
        .find(|c| c.issue.number == first)
        .ok_or_else(|| {
            ToolError::new(ErrorCode::InternalError, "batch head missing from candidates")
        })?;

    info!(batch = %batch.id, total = batch.total_count, first, "batch started");
    Ok(json!({
        "action": BatchAction::Implement,
        "batchId": batch.id,
        "issue": batch_issue_payload(
            candidate.issue.number,
            &candidate.issue.title,
            &candidate.issue.html_url,
            Some(&candidate.score),
        ),
        "progress": { "current": 1, "total": batch.total_count },
        "instructions": implement_instructions(first),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchContinueParams {
    batch_id: Uuid,
    pr_number: Option<u64>,
}

/// Poll the current PR until it merges, then advance the queue.
///
/// Each invocation gets a fresh deadline; a timed-out batch resumes when the
/// caller re-invokes. Transient remote errors are logged continues; only the
/// deadline ends the loop early. The batch file lock is only held inside
/// individual store mutations, never across ticks.
pub async fn batch_continue(engine: &Engine, args: Value) -> ToolResult {
    let params: BatchContinueParams = parse_args(args)?;
    let batch = engine.batches.load(params.batch_id)?;

    match batch.status {
        BatchStatus::InProgress => {}
        BatchStatus::Timeout => {
            engine.batches.resume(params.batch_id).await?;
        }
        BatchStatus::Completed => {
            return Ok(completed_payload(&engine.batches.load(params.batch_id)?));
        }
        BatchStatus::Abandoned => {
            return Err(ToolError::new(
                ErrorCode::InternalError,
                format!("batch {} was abandoned", params.batch_id),
            ));
        }
    }

    if let Some(pr) = params.pr_number {
        engine.batches.set_pr(params.batch_id, pr).await?;
    }

    let batch = engine.batches.load(params.batch_id)?;
    let current_issue = batch.current_issue.ok_or_else(|| {
        ToolError::new(
            ErrorCode::InternalError,
            "batch has no current issue; call implement_batch first",
        )
    })?;
    let current_pr = batch.current_pr.ok_or_else(|| {
        ToolError::new(
            ErrorCode::InternalError,
            "no PR recorded for the current issue; pass prNumber",
        )
    })?;

    let repo = RepoSpec::parse(&batch.repository)?;
    let client = engine.client_for(&repo);
    let deadline = tokio::time::Instant::now() + BATCH_POLL_DEADLINE;

    loop {
        match client.get_pr_status(current_pr).await {
            Ok(status) if status.is_merged() => {
                let after = engine.batches.complete_current(params.batch_id).await?;
                info!(batch = %after.id, issue = current_issue, pr = current_pr, "batch issue merged");

                if after.status == BatchStatus::Completed {
                    return Ok(completed_payload(&after));
                }
                let next = engine
                    .batches
                    .start_next(params.batch_id)
                    .await?
                    .ok_or_else(|| {
                        ToolError::new(
                            ErrorCode::InternalError,
                            "batch accounting says issues remain but the queue is empty",
                        )
                    })?;
                let issue = client.fetch_issue(next).await?;
                let after = engine.batches.load(params.batch_id)?;
                return Ok(json!({
                    "action": BatchAction::Implement,
                    "batchId": after.id,
                    "issue": batch_issue_payload(issue.number, &issue.title, &issue.html_url, None),
                    "progress": {
                        "current": after.completed_count + 1,
                        "total": after.total_count,
                    },
                    "instructions": implement_instructions(next),
                }));
            }
            Ok(_) => {}
            Err(e) => {
                // Transient remote trouble never ends the loop; the deadline
                // does.
                warn!(pr = current_pr, error = %e, "poll tick failed; continuing");
            }
        }

        if tokio::time::Instant::now() + BATCH_POLL_INTERVAL > deadline {
            engine.batches.timeout(params.batch_id).await?;
            warn!(batch = %params.batch_id, issue = current_issue, "batch poll deadline reached");
            return Ok(json!({
                "action": BatchAction::Timeout,
                "batchId": params.batch_id,
                "issue": current_issue,
                "prNumber": current_pr,
                "message": "PR did not merge within the polling deadline; call batch_continue again to resume",
            }));
        }
        tokio::time::sleep(BATCH_POLL_INTERVAL).await;
    }
}

fn completed_payload(batch: &crate::coordination::BatchState) -> Value {
    json!({
        "action": BatchAction::Complete,
        "batchId": batch.id,
        "totalCount": batch.total_count,
        "completed": batch.completed,
    })
}
