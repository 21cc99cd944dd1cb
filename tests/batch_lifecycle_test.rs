// Batch orchestration happy path and accounting at the store level,
// mirroring the implement-then-continue protocol.

use corral::coordination::batch::{BatchStore, BatchStatus};
use tempfile::TempDir;

#[tokio::test]
async fn three_issue_batch_runs_to_completion() {
    let dir = TempDir::new().unwrap();
    let batches = BatchStore::new(dir.path().to_path_buf());

    // implement_batch: queue [42, 41, 40], hand out #42.
    let batch = batches.create("acme/widgets", vec![42, 41, 40]).unwrap();
    assert_eq!(batches.start_next(batch.id).await.unwrap(), Some(42));
    let state = batches.load(batch.id).unwrap();
    assert_eq!(state.current_issue, Some(42));
    assert_eq!(state.queue, vec![41, 40]);

    // batch_continue {prNumber:101}: merged, so #41 comes next.
    batches.set_pr(batch.id, 101).await.unwrap();
    let state = batches.complete_current(batch.id).await.unwrap();
    assert_eq!(state.completed_count, 1);
    assert_eq!(state.status, BatchStatus::InProgress);
    assert_eq!(batches.start_next(batch.id).await.unwrap(), Some(41));
    let state = batches.load(batch.id).unwrap();
    assert_eq!(state.completed_count + state.queue.len() + 1, state.total_count);

    // #41 and #40 merge analogously.
    batches.set_pr(batch.id, 102).await.unwrap();
    batches.complete_current(batch.id).await.unwrap();
    assert_eq!(batches.start_next(batch.id).await.unwrap(), Some(40));
    batches.set_pr(batch.id, 103).await.unwrap();
    let done = batches.complete_current(batch.id).await.unwrap();

    assert_eq!(done.status, BatchStatus::Completed);
    assert_eq!(done.total_count, 3);
    let issues: Vec<u64> = done.completed.iter().map(|c| c.issue).collect();
    assert_eq!(issues, vec![42, 41, 40]);
    let prs: Vec<u64> = done.completed.iter().map(|c| c.pr).collect();
    assert_eq!(prs, vec![101, 102, 103]);
    for completed in &done.completed {
        assert!(completed.merged_at >= completed.started_at);
    }
}

#[tokio::test]
async fn timeout_marks_the_batch_and_resume_reopens_it() {
    let dir = TempDir::new().unwrap();
    let batches = BatchStore::new(dir.path().to_path_buf());
    let batch = batches.create("acme/widgets", vec![5]).unwrap();
    batches.start_next(batch.id).await.unwrap();
    batches.set_pr(batch.id, 900).await.unwrap();

    batches.timeout(batch.id).await.unwrap();
    let state = batches.load(batch.id).unwrap();
    assert_eq!(state.status, BatchStatus::Timeout);
    // The current issue and PR survive the timeout so the caller can resume.
    assert_eq!(state.current_issue, Some(5));
    assert_eq!(state.current_pr, Some(900));

    batches.resume(batch.id).await.unwrap();
    assert_eq!(
        batches.load(batch.id).unwrap().status,
        BatchStatus::InProgress
    );
}

#[tokio::test]
async fn batch_state_survives_process_restart() {
    let dir = TempDir::new().unwrap();
    let id = {
        let batches = BatchStore::new(dir.path().to_path_buf());
        let batch = batches.create("acme/widgets", vec![1, 2]).unwrap();
        batches.start_next(batch.id).await.unwrap();
        batch.id
    };

    // A fresh store over the same directory sees the same state.
    let batches = BatchStore::new(dir.path().to_path_buf());
    let state = batches.load(id).unwrap();
    assert_eq!(state.current_issue, Some(1));
    assert_eq!(state.queue, vec![2]);
    state.check_invariant().unwrap();

    // Completing from the fresh store falls back to the batch start time
    // for started_at, since per-issue starts are process-local.
    batches.set_pr(id, 11).await.unwrap();
    let after = batches.complete_current(id).await.unwrap();
    assert_eq!(after.completed[0].started_at, state.started_at);
}
