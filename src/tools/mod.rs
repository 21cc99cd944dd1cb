// The twelve externally addressable tool operations. Each validates its
// input before any side effect and returns a JSON envelope: either
// `success: true` with the payload or `success: false` with a stable error
// code a non-interactive caller can branch on.

pub mod backlog;
pub mod batch;
pub mod issues;
pub mod locks;
pub mod pulls;
pub mod workflow;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::audit::{AuditOutcome, AuditRecord};
use crate::config::ConfigError;
use crate::coordination::{BatchError, LockError, WorkflowError};
use crate::engine::Engine;
use crate::github::GitHubError;

/// Stable error codes of the operation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RepoRequired,
    NoWriteAccess,
    NoIssuesAvailable,
    AllIssuesLocked,
    LockHeld,
    LockCreationFailed,
    NotLocked,
    WorkflowNotFound,
    InvalidPhaseTransition,
    TestsRequired,
    SkipJustificationRequired,
    InvalidConfirmation,
    GithubApiError,
    InternalError,
}

/// A typed operation failure. Nothing else crosses the operation boundary.
#[derive(Debug)]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
    pub reason: Option<String>,
    pub details: Option<Value>,
}

impl ToolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            reason: None,
            details: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message).reason("invalid input")
    }
}

impl From<ConfigError> for ToolError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::RepoRequired | ConfigError::MalformedRepo(_) => {
                ToolError::new(ErrorCode::RepoRequired, err.to_string())
            }
            ConfigError::NoHome => ToolError::new(ErrorCode::InternalError, err.to_string()),
        }
    }
}

impl From<GitHubError> for ToolError {
    fn from(err: GitHubError) -> Self {
        ToolError::new(ErrorCode::GithubApiError, err.to_string())
    }
}

impl From<LockError> for ToolError {
    fn from(err: LockError) -> Self {
        let code = match &err {
            LockError::Held { .. } => ErrorCode::LockHeld,
            LockError::CreationFailed(_) => ErrorCode::LockCreationFailed,
            LockError::NotLocked(_) | LockError::NotOwner { .. } => ErrorCode::NotLocked,
            LockError::Io(_) | LockError::Corrupt { .. } => ErrorCode::InternalError,
        };
        ToolError::new(code, err.to_string())
    }
}

impl From<WorkflowError> for ToolError {
    fn from(err: WorkflowError) -> Self {
        let code = match &err {
            WorkflowError::NotFound(_) => ErrorCode::WorkflowNotFound,
            WorkflowError::InvalidTransition { .. } => ErrorCode::InvalidPhaseTransition,
            WorkflowError::TestsRequired(_) => ErrorCode::TestsRequired,
            WorkflowError::SkipJustificationRequired(_) => ErrorCode::SkipJustificationRequired,
            WorkflowError::Io(_) | WorkflowError::Corrupt { .. } => ErrorCode::InternalError,
        };
        ToolError::new(code, err.to_string())
    }
}

impl From<BatchError> for ToolError {
    fn from(err: BatchError) -> Self {
        ToolError::new(ErrorCode::InternalError, err.to_string())
    }
}

pub type ToolResult = Result<Value, ToolError>;

/// Render the response envelope. The boolean is the transport-level error
/// flag.
pub fn render_envelope(result: &ToolResult) -> (Value, bool) {
    match result {
        Ok(payload) => {
            let mut envelope = json!({ "success": true });
            if let (Value::Object(out), Value::Object(payload)) =
                (&mut envelope, payload)
            {
                for (key, value) in payload {
                    out.insert(key.clone(), value.clone());
                }
            }
            (envelope, false)
        }
        Err(err) => {
            let mut envelope = json!({
                "success": false,
                "error": err.message,
                "code": err.code,
            });
            if let Value::Object(out) = &mut envelope {
                if let Some(reason) = &err.reason {
                    out.insert("reason".to_string(), Value::String(reason.clone()));
                }
                if let Some(details) = &err.details {
                    out.insert("details".to_string(), details.clone());
                }
            }
            (envelope, true)
        }
    }
}

/// Descriptor returned by the registry listing so agent harnesses can
/// discover the surface.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

fn repo_property() -> Value {
    json!({
        "type": "string",
        "description": "Repository as owner/repo; falls back to GITHUB_REPOSITORY or GITHUB_OWNER/GITHUB_REPO"
    })
}

/// The registry: every addressable operation with its input schema.
pub fn registry() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "create_issue",
            description: "Create a backlog issue with managed priority/type/status labels",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo": repo_property(),
                    "title": { "type": "string" },
                    "body": { "type": "string", "description": "Raw body; overrides the template" },
                    "context": { "type": "string" },
                    "acceptanceCriteria": { "type": "array", "items": { "type": "string" } },
                    "technicalNotes": { "type": "string" },
                    "priority": { "type": "string", "description": "critical|high|medium|low or P0..P3" },
                    "type": { "type": "string", "enum": ["bug", "feature", "chore", "docs"] }
                },
                "required": ["title"]
            }),
        },
        ToolDescriptor {
            name: "list_backlog",
            description: "List open, unclaimed issues in deterministic priority order",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo": repo_property(),
                    "limit": { "type": "integer", "minimum": 1, "maximum": 100, "default": 20 },
                    "includeTypes": { "type": "array", "items": { "type": "string" } },
                    "excludeTypes": { "type": "array", "items": { "type": "string" } }
                }
            }),
        },
        ToolDescriptor {
            name: "select_next_issue",
            description: "Claim the highest-priority available issue and start its workflow",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo": repo_property(),
                    "includeTypes": { "type": "array", "items": { "type": "string" } },
                    "excludeTypes": { "type": "array", "items": { "type": "string" } }
                }
            }),
        },
        ToolDescriptor {
            name: "advance_workflow",
            description: "Advance a claimed issue to the next workflow phase",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo": repo_property(),
                    "issueNumber": { "type": "integer" },
                    "targetPhase": { "type": "string" },
                    "testsPassed": { "type": "boolean" },
                    "skipJustification": { "type": "string" },
                    "prTitle": { "type": "string" },
                    "prBody": { "type": "string" }
                },
                "required": ["issueNumber", "targetPhase"]
            }),
        },
        ToolDescriptor {
            name: "release_lock",
            description: "Release a claim, clean up workflow state, and update labels",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo": repo_property(),
                    "issueNumber": { "type": "integer" },
                    "reason": { "type": "string", "enum": ["abandoned", "completed", "merged"] }
                },
                "required": ["issueNumber", "reason"]
            }),
        },
        ToolDescriptor {
            name: "force_claim",
            description: "Take over another session's claim (requires explicit confirmation)",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo": repo_property(),
                    "issueNumber": { "type": "integer" },
                    "confirmation": { "type": "string", "const": locks::FORCE_CLAIM_CONFIRMATION }
                },
                "required": ["issueNumber", "confirmation"]
            }),
        },
        ToolDescriptor {
            name: "get_workflow_status",
            description: "Workflow state for one issue, or all issues claimed by this session",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo": repo_property(),
                    "issueNumber": { "type": "integer" }
                }
            }),
        },
        ToolDescriptor {
            name: "sync_backlog_labels",
            description: "Ensure label families exist and report or repair unlabeled issues",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo": repo_property(),
                    "mode": { "type": "string", "enum": ["report", "update"], "default": "report" }
                }
            }),
        },
        ToolDescriptor {
            name: "get_pr_status",
            description: "Aggregate pull request state, check runs, and reviews",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo": repo_property(),
                    "prNumber": { "type": "integer" }
                },
                "required": ["prNumber"]
            }),
        },
        ToolDescriptor {
            name: "bulk_update_issues",
            description: "Apply label/state changes to up to 50 issues, collecting per-item failures",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo": repo_property(),
                    "issueNumbers": { "type": "array", "items": { "type": "integer" }, "minItems": 1, "maxItems": 50 },
                    "addLabels": { "type": "array", "items": { "type": "string" } },
                    "removeLabels": { "type": "array", "items": { "type": "string" } },
                    "state": { "type": "string", "enum": ["open", "closed"] }
                },
                "required": ["issueNumbers"]
            }),
        },
        ToolDescriptor {
            name: "implement_batch",
            description: "Queue the top N backlog issues for sequential delivery",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo": repo_property(),
                    "count": { "type": "integer", "minimum": 1, "maximum": 10 },
                    "maxPriority": { "type": "string", "description": "Priority ceiling, e.g. P1 keeps P0 and P1" },
                    "includeTypes": { "type": "array", "items": { "type": "string" } },
                    "excludeTypes": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["count"]
            }),
        },
        ToolDescriptor {
            name: "batch_continue",
            description: "Poll the current batch PR until merge, then hand out the next issue",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "batchId": { "type": "string", "format": "uuid" },
                    "prNumber": { "type": "integer" }
                },
                "required": ["batchId"]
            }),
        },
    ]
}

/// Dispatch one invocation by name, timing it and emitting the per-call
/// audit record.
pub async fn dispatch(engine: &Engine, name: &str, args: Value) -> ToolResult {
    let started = std::time::Instant::now();
    let result = match name {
        "create_issue" => issues::create_issue(engine, args).await,
        "list_backlog" => backlog::list_backlog(engine, args).await,
        "select_next_issue" => backlog::select_next_issue(engine, args).await,
        "advance_workflow" => workflow::advance_workflow(engine, args).await,
        "release_lock" => locks::release_lock(engine, args).await,
        "force_claim" => locks::force_claim(engine, args).await,
        "get_workflow_status" => workflow::get_workflow_status(engine, args).await,
        "sync_backlog_labels" => issues::sync_backlog_labels(engine, args).await,
        "get_pr_status" => pulls::get_pr_status(engine, args).await,
        "bulk_update_issues" => issues::bulk_update_issues(engine, args).await,
        "implement_batch" => batch::implement_batch(engine, args).await,
        "batch_continue" => batch::batch_continue(engine, args).await,
        other => Err(ToolError::new(
            ErrorCode::InternalError,
            format!("unknown tool `{other}`"),
        )),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(_) => info!(tool = name, elapsed_ms, "tool succeeded"),
        Err(e) => error!(tool = name, elapsed_ms, code = ?e.code, error = %e.message, "tool failed"),
    }

    let outcome = if result.is_ok() {
        AuditOutcome::Success
    } else {
        AuditOutcome::Failure
    };
    let mut record =
        AuditRecord::new(name, &engine.session_id, outcome).duration_ms(elapsed_ms);
    if let Err(e) = &result {
        record = record.error_text(&e.message);
    }
    engine.audit.append_best_effort(record);

    result
}

/// Deserialize tool arguments, mapping malformed input to a typed error
/// before any side effect happens.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::invalid_input(e.to_string()))
}
