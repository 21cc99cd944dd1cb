// Backlog reading and issue selection: the central "pick next issue" path.

use std::collections::HashMap;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::audit::{AuditOutcome, AuditRecord};
use crate::config::RepoSpec;
use crate::coordination::LockError;
use crate::engine::Engine;
use crate::github::client::GitHubOps;
use crate::github::{GitHubError, IssueSummary};
use crate::priority::{apply_filters, calculate_score, rank, BacklogFilter, PriorityScore};

use super::{parse_args, ErrorCode, ToolError, ToolResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListBacklogParams {
    repo: Option<String>,
    limit: Option<usize>,
    include_types: Option<Vec<String>>,
    exclude_types: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectParams {
    repo: Option<String>,
    include_types: Option<Vec<String>>,
    exclude_types: Option<Vec<String>>,
}

/// A backlog candidate after filtering and scoring.
pub(crate) struct ScoredIssue {
    pub issue: IssueSummary,
    pub score: PriorityScore,
    pub blocked_by: Option<u64>,
}

/// Filter, score, and rank the open backlog. The parent lookup is advisory:
/// a failed lookup scores the issue as unblocked.
pub(crate) async fn scored_backlog(
    client: &dyn GitHubOps,
    filter: &BacklogFilter,
) -> Result<Vec<ScoredIssue>, GitHubError> {
    let open = client.fetch_open_issues().await?;
    let candidates = apply_filters(&open, filter);
    let now = Utc::now();

    let mut scored = Vec::with_capacity(candidates.len());
    let mut blocked_parents = HashMap::new();
    for issue in candidates {
        let parent = client.fetch_parent(issue.number).await;
        if let Some(parent) = parent.as_ref().filter(|p| p.is_open()) {
            blocked_parents.insert(issue.number, parent.number);
        }
        let score = calculate_score(&issue, blocked_parents.contains_key(&issue.number), now);
        scored.push((issue, score));
    }

    rank(&mut scored);
    Ok(scored
        .into_iter()
        .map(|(issue, score)| ScoredIssue {
            blocked_by: blocked_parents.get(&issue.number).copied(),
            issue,
            score,
        })
        .collect())
}

pub(crate) fn filter_from(
    include_types: Option<Vec<String>>,
    exclude_types: Option<Vec<String>>,
) -> BacklogFilter {
    BacklogFilter {
        include_types,
        exclude_types,
    }
}

fn issue_payload(candidate: &ScoredIssue) -> Value {
    json!({
        "number": candidate.issue.number,
        "title": candidate.issue.title,
        "url": candidate.issue.html_url,
        "labels": candidate.issue.labels,
        "createdAt": candidate.issue.created_at,
        "score": {
            "basePoints": candidate.score.base_points,
            "ageBonus": candidate.score.age_bonus,
            "blockingMultiplier": candidate.score.blocking_multiplier,
            "blockedPenalty": candidate.score.blocked_penalty,
            "totalScore": candidate.score.total,
        },
        "blockedBy": candidate.blocked_by,
    })
}

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

/// Read-only view of the scored backlog, annotated with local lock state.
pub async fn list_backlog(engine: &Engine, args: Value) -> ToolResult {
    let params: ListBacklogParams = parse_args(args)?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(ToolError::invalid_input(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        )));
    }
    let repo = RepoSpec::resolve(params.repo.as_deref())?;
    let client = engine.client_for(&repo);
    let filter = filter_from(params.include_types, params.exclude_types);

    let scored = scored_backlog(&client, &filter).await?;
    let mut items = Vec::new();
    for candidate in scored.iter().take(limit) {
        let lock = engine.locks.get(&repo, candidate.issue.number)?;
        let (is_locked, locked_by) = match lock {
            Some((record, stale)) if !stale => (true, Some(record.session_id)),
            _ => (false, None),
        };
        let mut payload = issue_payload(candidate);
        if let Value::Object(map) = &mut payload {
            map.insert("isLocked".to_string(), json!(is_locked));
            map.insert("lockedBy".to_string(), json!(locked_by));
        }
        items.push(payload);
    }

    Ok(json!({
        "repository": repo.full_name(),
        "count": items.len(),
        "issues": items,
    }))
}

/// Walk the ranked backlog and claim the first issue whose lock acquisition
/// succeeds, then flip the advisory label and open the workflow record.
pub async fn select_next_issue(engine: &Engine, args: Value) -> ToolResult {
    let params: SelectParams = parse_args(args)?;
    let repo = RepoSpec::resolve(params.repo.as_deref())?;
    let client = engine.client_for(&repo);
    let filter = filter_from(params.include_types, params.exclude_types);

    let scored = scored_backlog(&client, &filter).await?;
    if scored.is_empty() {
        return Err(ToolError::new(
            ErrorCode::NoIssuesAvailable,
            "no selectable issues after filtering",
        ));
    }

    for candidate in &scored {
        let number = candidate.issue.number;
        match engine.locks.acquire(&repo, number, &engine.session_id) {
            Ok(lock) => {
                // Flip the advisory label before reporting success; if the
                // remote store refuses, back the claim out so durable state
                // is untouched.
                if let Err(e) = flip_to_in_progress(&client, number).await {
                    warn!(issue = number, error = %e, "label flip failed; releasing claim");
                    let _ = engine.locks.release(&repo, number, &engine.session_id);
                    return Err(e.into());
                }
                engine.workflows.create(&repo, number)?;
                engine.audit.append_best_effort(
                    AuditRecord::new("select_next_issue", &engine.session_id, AuditOutcome::Success)
                        .repo(&repo.full_name())
                        .issue(number)
                        .lock_event("acquired"),
                );
                info!(issue = number, total = candidate.score.total, "issue selected");
                return Ok(json!({
                    "issue": issue_payload(candidate),
                    "lock": {
                        "sessionId": lock.session_id,
                        "acquiredAt": lock.acquired_at,
                        "pid": lock.pid,
                    },
                    "workflowPhase": "selection",
                }));
            }
            Err(LockError::Held { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(ToolError::new(
        ErrorCode::AllIssuesLocked,
        "every candidate issue is locked by another session",
    ))
}

async fn flip_to_in_progress(
    client: &dyn GitHubOps,
    issue_number: u64,
) -> Result<(), GitHubError> {
    client.remove_label(issue_number, "status:backlog").await?;
    client.add_label(issue_number, "status:in-progress").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::client::MockGitHubOps;
    use crate::github::types::ParentIssue;
    use chrono::Duration;

    fn issue(number: u64, labels: &[&str], age_days: i64) -> IssueSummary {
        let created = Utc::now() - Duration::days(age_days);
        IssueSummary {
            number,
            title: format!("issue {number}"),
            body: None,
            state: "open".to_string(),
            created_at: created,
            updated_at: created,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            assignees: vec![],
            html_url: format!("https://github.com/acme/widgets/issues/{number}"),
        }
    }

    #[tokio::test]
    async fn pipeline_filters_scores_and_ranks_deterministically() {
        let open = vec![
            issue(42, &["priority:high"], 5),
            issue(41, &["priority:high"], 7),
            issue(13, &["priority:critical", "status:in-progress"], 1),
        ];
        let mut mock = MockGitHubOps::new();
        mock.expect_fetch_open_issues()
            .returning(move || Ok(open.clone()));
        mock.expect_fetch_parent().returning(|_| None);

        let scored = scored_backlog(&mock, &BacklogFilter::default())
            .await
            .unwrap();
        let order: Vec<u64> = scored.iter().map(|c| c.issue.number).collect();
        // #13 is claimed and drops; the older high-priority issue wins.
        assert_eq!(order, vec![41, 42]);
        assert_eq!(scored[0].score.total, 107.0);
        assert_eq!(scored[1].score.total, 105.0);
    }

    #[tokio::test]
    async fn open_parent_shrinks_priority_below_a_lower_class() {
        let open = vec![
            issue(45, &["priority:high"], 0),
            issue(48, &["priority:medium"], 4),
        ];
        let mut mock = MockGitHubOps::new();
        mock.expect_fetch_open_issues()
            .returning(move || Ok(open.clone()));
        mock.expect_fetch_parent().returning(|number| {
            if number == 45 {
                Some(ParentIssue {
                    number: 42,
                    state: "open".to_string(),
                    title: String::new(),
                })
            } else {
                None
            }
        });

        let scored = scored_backlog(&mock, &BacklogFilter::default())
            .await
            .unwrap();
        let order: Vec<u64> = scored.iter().map(|c| c.issue.number).collect();
        assert_eq!(order, vec![48, 45]);
        assert_eq!(scored[1].score.total, 10.0);
        assert_eq!(scored[1].blocked_by, Some(42));
        assert_eq!(scored[0].score.total, 14.0);
    }

    #[tokio::test]
    async fn closed_parent_carries_no_penalty() {
        let open = vec![issue(45, &["priority:high"], 0)];
        let mut mock = MockGitHubOps::new();
        mock.expect_fetch_open_issues()
            .returning(move || Ok(open.clone()));
        mock.expect_fetch_parent().returning(|_| {
            Some(ParentIssue {
                number: 42,
                state: "closed".to_string(),
                title: String::new(),
            })
        });

        let scored = scored_backlog(&mock, &BacklogFilter::default())
            .await
            .unwrap();
        assert_eq!(scored[0].score.total, 100.0);
        assert_eq!(scored[0].blocked_by, None);
    }
}
