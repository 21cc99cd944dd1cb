// Tool surface contract tests that stay off the network: input validation
// happens before side effects, error envelopes carry stable codes, and
// local-state-only paths answer without touching GitHub.

use corral::config::StoragePaths;
use corral::engine::Engine;
use corral::tools::{self, ErrorCode};
use serde_json::json;
use tempfile::TempDir;

fn engine_in(dir: &TempDir) -> Engine {
    let paths = StoragePaths::resolve(Some(dir.path())).unwrap();
    Engine::new("test-token", "session-test".to_string(), paths).unwrap()
}

#[tokio::test]
async fn force_claim_rejects_wrong_confirmation() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let err = tools::dispatch(
        &engine,
        "force_claim",
        json!({
            "repo": "acme/widgets",
            "issueNumber": 42,
            "confirmation": "yes please"
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidConfirmation);
}

#[tokio::test]
async fn advance_workflow_requires_the_callers_lock() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let err = tools::dispatch(
        &engine,
        "advance_workflow",
        json!({
            "repo": "acme/widgets",
            "issueNumber": 7,
            "targetPhase": "research"
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotLocked);
}

#[tokio::test]
async fn release_lock_requires_an_existing_lock() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let err = tools::dispatch(
        &engine,
        "release_lock",
        json!({
            "repo": "acme/widgets",
            "issueNumber": 7,
            "reason": "completed"
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotLocked);
}

#[tokio::test]
async fn bulk_update_rejects_out_of_range_inputs() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);

    let err = tools::dispatch(
        &engine,
        "bulk_update_issues",
        json!({ "repo": "acme/widgets", "issueNumbers": [] }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InternalError);

    let too_many: Vec<u64> = (1..=51).collect();
    let err = tools::dispatch(
        &engine,
        "bulk_update_issues",
        json!({ "repo": "acme/widgets", "issueNumbers": too_many }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InternalError);
}

#[tokio::test]
async fn implement_batch_rejects_out_of_range_counts() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    for count in [0, 11] {
        let err = tools::dispatch(
            &engine,
            "implement_batch",
            json!({ "repo": "acme/widgets", "count": count }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
    }
}

#[tokio::test]
async fn batch_continue_requires_a_known_batch() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let err = tools::dispatch(
        &engine,
        "batch_continue",
        json!({ "batchId": "00000000-0000-0000-0000-000000000000" }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InternalError);
    assert!(err.message.contains("unknown batch"));
}

#[tokio::test]
async fn workflow_status_with_no_claims_is_empty() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let payload = tools::dispatch(&engine, "get_workflow_status", json!({}))
        .await
        .unwrap();
    assert_eq!(payload["count"], json!(0));
    assert_eq!(payload["sessionId"], json!("session-test"));
}

#[tokio::test]
async fn unknown_tool_is_a_typed_error() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let err = tools::dispatch(&engine, "no_such_tool", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InternalError);
}

#[tokio::test]
async fn every_dispatch_leaves_an_audit_record() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let _ = tools::dispatch(&engine, "get_workflow_status", json!({})).await;
    let _ = tools::dispatch(
        &engine,
        "force_claim",
        json!({ "repo": "acme/widgets", "issueNumber": 1, "confirmation": "nope" }),
    )
    .await;

    let today = chrono::Utc::now().date_naive();
    let records = engine.audit.read_day(today).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r.tool == "get_workflow_status"));
    assert!(records
        .iter()
        .any(|r| r.tool == "force_claim" && r.error.is_some()));
}
