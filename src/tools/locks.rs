// Claim lifecycle operations: release_lock and force_claim.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::audit::{AuditLevel, AuditOutcome, AuditRecord};
use crate::config::RepoSpec;
use crate::engine::Engine;
use crate::github::client::GitHubOps;

use super::{parse_args, ErrorCode, ToolError, ToolResult};

/// The literal a caller must supply to take over someone else's claim.
pub const FORCE_CLAIM_CONFIRMATION: &str = "I understand this may cause conflicts";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseParams {
    repo: Option<String>,
    issue_number: u64,
    reason: String,
}

/// Release a claim, delete its workflow record, and reconcile the advisory
/// labels with the stated reason.
pub async fn release_lock(engine: &Engine, args: Value) -> ToolResult {
    let params: ReleaseParams = parse_args(args)?;
    if !matches!(params.reason.as_str(), "abandoned" | "completed" | "merged") {
        return Err(ToolError::invalid_input(format!(
            "unknown release reason `{}`",
            params.reason
        )));
    }
    let repo = RepoSpec::resolve(params.repo.as_deref())?;
    let number = params.issue_number;

    // The operation requires an existing lock; a silent no-op would hide a
    // double release.
    if engine.locks.get(&repo, number)?.is_none() {
        return Err(ToolError::new(
            ErrorCode::NotLocked,
            format!("no lock held for issue #{number}"),
        ));
    }
    let released = engine
        .locks
        .release(&repo, number, &engine.session_id)?
        .ok_or_else(|| {
            ToolError::new(
                ErrorCode::NotLocked,
                format!("lock for issue #{number} disappeared before release"),
            )
        })?;
    engine.workflows.delete(&repo, number)?;

    let client = engine.client_for(&repo);
    match params.reason.as_str() {
        "abandoned" => {
            client.remove_label(number, "status:in-progress").await?;
            client.remove_label(number, "status:in-review").await?;
            client.add_label(number, "status:backlog").await?;
        }
        "completed" | "merged" => {
            client.remove_label(number, "status:in-progress").await?;
            client.remove_label(number, "status:in-review").await?;
            if params.reason == "merged" {
                client.close_issue(number).await?;
            }
        }
        _ => unreachable!("validated above"),
    }

    let held_seconds = released.held_seconds(Utc::now());
    engine.audit.append_best_effort(
        AuditRecord::new("release_lock", &engine.session_id, AuditOutcome::Success)
            .repo(&repo.full_name())
            .issue(number)
            .meta("reason", json!(params.reason))
            .lock_event("released"),
    );
    info!(issue = number, reason = %params.reason, held_seconds, "lock released");

    Ok(json!({
        "issueNumber": number,
        "reason": params.reason,
        "lockDurationSeconds": held_seconds,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForceClaimParams {
    repo: Option<String>,
    issue_number: u64,
    confirmation: String,
}

/// Explicit, logged takeover of a claim. Not a silent race win: the caller
/// must supply the confirmation literal, the takeover is commented on the
/// issue, and the displaced session is recorded at warn level.
pub async fn force_claim(engine: &Engine, args: Value) -> ToolResult {
    let params: ForceClaimParams = parse_args(args)?;
    if params.confirmation != FORCE_CLAIM_CONFIRMATION {
        return Err(ToolError::new(
            ErrorCode::InvalidConfirmation,
            format!("confirmation must be exactly `{FORCE_CLAIM_CONFIRMATION}`"),
        ));
    }
    let repo = RepoSpec::resolve(params.repo.as_deref())?;
    let number = params.issue_number;

    let (lock, previous) = engine.locks.force_claim(&repo, number, &engine.session_id)?;
    let previous_session = previous.as_ref().map(|r| r.session_id.clone());

    engine.workflows.create(&repo, number)?;

    let client = engine.client_for(&repo);
    let comment = match &previous_session {
        Some(prior) => format!(
            "Session `{}` force-claimed this issue from session `{prior}`.",
            engine.session_id
        ),
        None => format!(
            "Session `{}` force-claimed this issue (no previous holder).",
            engine.session_id
        ),
    };
    if let Err(e) = client.add_comment(number, &comment).await {
        warn!(issue = number, error = %e, "takeover comment failed");
    }

    engine.audit.append_best_effort(
        AuditRecord::new("force_claim", &engine.session_id, AuditOutcome::Success)
            .level(AuditLevel::Warn)
            .repo(&repo.full_name())
            .issue(number)
            .meta("previous_session", json!(previous_session))
            .lock_event("forced"),
    );
    warn!(
        issue = number,
        previous = previous_session.as_deref().unwrap_or("none"),
        "claim forcibly taken over"
    );

    Ok(json!({
        "issueNumber": number,
        "lock": {
            "sessionId": lock.session_id,
            "acquiredAt": lock.acquired_at,
        },
        "previousHolder": previous_session,
    }))
}
