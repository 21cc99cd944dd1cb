// Issue authoring and maintenance operations: create_issue,
// sync_backlog_labels, bulk_update_issues.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::RepoSpec;
use crate::engine::Engine;
use crate::github::client::GitHubOps;
use crate::priority::PriorityClass;

use super::{parse_args, ErrorCode, ToolError, ToolResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIssueParams {
    repo: Option<String>,
    title: String,
    body: Option<String>,
    context: Option<String>,
    acceptance_criteria: Option<Vec<String>>,
    technical_notes: Option<String>,
    priority: Option<String>,
    #[serde(rename = "type")]
    issue_type: Option<String>,
}

const ISSUE_TYPES: [&str; 4] = ["bug", "feature", "chore", "docs"];

/// Render the canonical issue body. Sections without content are omitted.
fn format_issue_body(
    title: &str,
    context: Option<&str>,
    acceptance_criteria: &[String],
    technical_notes: Option<&str>,
) -> String {
    let mut body = format!("## Summary\n{title}\n");
    if let Some(context) = context {
        if !context.trim().is_empty() {
            body.push_str(&format!("\n## Context\n{context}\n"));
        }
    }
    if !acceptance_criteria.is_empty() {
        body.push_str("\n## Acceptance Criteria\n");
        for item in acceptance_criteria {
            body.push_str(&format!("- [ ] {item}\n"));
        }
    }
    if let Some(notes) = technical_notes {
        if !notes.trim().is_empty() {
            body.push_str(&format!("\n## Technical Notes\n{notes}\n"));
        }
    }
    body
}

/// Create a backlog issue carrying one label from each managed family.
pub async fn create_issue(engine: &Engine, args: Value) -> ToolResult {
    let params: CreateIssueParams = parse_args(args)?;
    if params.title.trim().is_empty() {
        return Err(ToolError::invalid_input("title must not be empty"));
    }
    let priority = match &params.priority {
        Some(value) => PriorityClass::parse(value).ok_or_else(|| {
            ToolError::invalid_input(format!("unknown priority `{value}`"))
        })?,
        None => PriorityClass::Medium,
    };
    let issue_type = params.issue_type.as_deref().unwrap_or("feature");
    if !ISSUE_TYPES.contains(&issue_type) {
        return Err(ToolError::invalid_input(format!(
            "unknown type `{issue_type}`"
        )));
    }

    let repo = RepoSpec::resolve(params.repo.as_deref())?;
    let client = engine.client_for(&repo);

    if !client.has_write_access().await? {
        return Err(ToolError::new(
            ErrorCode::NoWriteAccess,
            format!("credential cannot write to {}", repo.full_name()),
        ));
    }
    client.ensure_labels_exist().await?;

    // A raw body overrides the template.
    let body = match &params.body {
        Some(raw) => raw.clone(),
        None => format_issue_body(
            &params.title,
            params.context.as_deref(),
            params.acceptance_criteria.as_deref().unwrap_or(&[]),
            params.technical_notes.as_deref(),
        ),
    };

    let labels = vec![
        priority
            .label()
            .expect("explicit priorities always carry a label")
            .to_string(),
        format!("type:{issue_type}"),
        "status:backlog".to_string(),
    ];
    let issue = client.create_issue(&params.title, &body, labels).await?;
    info!(issue = issue.number, repo = %repo.full_name(), "issue created");

    Ok(json!({
        "issue": {
            "number": issue.number,
            "title": issue.title,
            "url": issue.html_url,
            "labels": issue.labels,
        },
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncParams {
    repo: Option<String>,
    mode: Option<String>,
    default_priority: Option<String>,
    default_type: Option<String>,
}

/// Report or repair open issues missing labels from the managed families.
pub async fn sync_backlog_labels(engine: &Engine, args: Value) -> ToolResult {
    let params: SyncParams = parse_args(args)?;
    let mode = params.mode.as_deref().unwrap_or("report");
    if mode != "report" && mode != "update" {
        return Err(ToolError::invalid_input(format!("unknown mode `{mode}`")));
    }
    let default_priority = match &params.default_priority {
        Some(value) => PriorityClass::parse(value).ok_or_else(|| {
            ToolError::invalid_input(format!("unknown priority `{value}`"))
        })?,
        None => PriorityClass::Medium,
    };
    let default_type = params.default_type.as_deref().unwrap_or("feature");
    if !ISSUE_TYPES.contains(&default_type) {
        return Err(ToolError::invalid_input(format!(
            "unknown type `{default_type}`"
        )));
    }

    let repo = RepoSpec::resolve(params.repo.as_deref())?;
    let client = engine.client_for(&repo);

    let label_failures = client.ensure_labels_exist().await?;
    let open = client.fetch_open_issues().await?;

    let mut missing = Vec::new();
    let mut updated = Vec::new();
    let mut failed = Vec::new();

    for issue in &open {
        let needs_priority = issue.label_value("priority:").is_none();
        let needs_type = issue.label_value("type:").is_none();
        let needs_status = issue.label_value("status:").is_none();
        if !(needs_priority || needs_type || needs_status) {
            continue;
        }
        let mut families = Vec::new();
        if needs_priority {
            families.push("priority");
        }
        if needs_type {
            families.push("type");
        }
        if needs_status {
            families.push("status");
        }
        missing.push(json!({
            "number": issue.number,
            "title": issue.title,
            "missing": families,
        }));

        if mode == "update" {
            let mut to_add = Vec::new();
            if needs_priority {
                to_add.push(
                    default_priority
                        .label()
                        .expect("default priority carries a label")
                        .to_string(),
                );
            }
            if needs_type {
                to_add.push(format!("type:{default_type}"));
            }
            if needs_status {
                to_add.push("status:backlog".to_string());
            }
            let mut item_error = None;
            for label in &to_add {
                if let Err(e) = client.add_label(issue.number, label).await {
                    item_error = Some(e.to_string());
                    break;
                }
            }
            match item_error {
                None => updated.push(json!({ "number": issue.number, "added": to_add })),
                Some(error) => failed.push(json!({ "number": issue.number, "error": error })),
            }
        }
    }

    Ok(json!({
        "repository": repo.full_name(),
        "mode": mode,
        "scanned": open.len(),
        "missing": missing,
        "updated": updated,
        "failed": failed,
        "labelFailures": label_failures
            .iter()
            .map(|(name, error)| json!({ "label": name, "error": error }))
            .collect::<Vec<_>>(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkUpdateParams {
    repo: Option<String>,
    issue_numbers: Vec<u64>,
    add_labels: Option<Vec<String>>,
    remove_labels: Option<Vec<String>>,
    state: Option<String>,
}

const BULK_MAX: usize = 50;

/// Apply label and state changes across up to 50 issues, sequentially,
/// collecting per-item failures instead of aborting.
pub async fn bulk_update_issues(engine: &Engine, args: Value) -> ToolResult {
    let params: BulkUpdateParams = parse_args(args)?;
    if params.issue_numbers.is_empty() || params.issue_numbers.len() > BULK_MAX {
        return Err(ToolError::invalid_input(format!(
            "issueNumbers must contain between 1 and {BULK_MAX} entries"
        )));
    }
    if let Some(state) = &params.state {
        if state != "open" && state != "closed" {
            return Err(ToolError::invalid_input(format!("unknown state `{state}`")));
        }
    }

    let repo = RepoSpec::resolve(params.repo.as_deref())?;
    let client = engine.client_for(&repo);

    let mut updated = Vec::new();
    let mut failed = Vec::new();

    for &number in &params.issue_numbers {
        match update_one(
            &client,
            number,
            params.add_labels.as_deref().unwrap_or(&[]),
            params.remove_labels.as_deref().unwrap_or(&[]),
            params.state.as_deref(),
        )
        .await
        {
            Ok(()) => updated.push(number),
            Err(e) => failed.push(json!({ "issue": number, "error": e.to_string() })),
        }
    }

    let summary = json!({
        "total": params.issue_numbers.len(),
        "succeeded": updated.len(),
        "failed": failed.len(),
    });

    if failed.is_empty() {
        Ok(json!({ "updated": updated, "failed": failed, "summary": summary }))
    } else {
        Err(ToolError::new(
            ErrorCode::GithubApiError,
            format!(
                "{} of {} issue updates failed",
                failed.len(),
                params.issue_numbers.len()
            ),
        )
        .details(json!({ "updated": updated, "failed": failed, "summary": summary })))
    }
}

async fn update_one(
    client: &dyn GitHubOps,
    number: u64,
    add_labels: &[String],
    remove_labels: &[String],
    state: Option<&str>,
) -> Result<(), crate::github::GitHubError> {
    for label in add_labels {
        client.add_label(number, label).await?;
    }
    for label in remove_labels {
        client.remove_label(number, label).await?;
    }
    match state {
        Some("closed") => client.close_issue(number).await?,
        Some("open") => client.reopen_issue(number).await?,
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_template_includes_all_sections() {
        let body = format_issue_body(
            "Add retry budget",
            Some("Calls fail under load"),
            &["Retries stop after three attempts".to_string()],
            Some("See the retry handler"),
        );
        assert!(body.starts_with("## Summary\nAdd retry budget\n"));
        assert!(body.contains("## Context\nCalls fail under load"));
        assert!(body.contains("- [ ] Retries stop after three attempts"));
        assert!(body.contains("## Technical Notes\nSee the retry handler"));
    }

    #[test]
    fn body_template_omits_absent_sections() {
        let body = format_issue_body("Just a title", None, &[], None);
        assert!(body.contains("## Summary"));
        assert!(!body.contains("## Context"));
        assert!(!body.contains("## Acceptance Criteria"));
        assert!(!body.contains("## Technical Notes"));
    }
}
