// Per-batch queue state. Mutations are read-modify-write sequences, so each
// one runs under a cooperative fd-lock on a sidecar file; the state file
// itself is replaced atomically. The lock coordinates this engine's
// processes on one host only, and is never held across poll ticks.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::workflow::write_atomic;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("unknown batch {0}")]
    NotFound(Uuid),

    #[error("batch {0} has no current issue to complete")]
    NoCurrentIssue(Uuid),

    #[error("batch {0} has no PR recorded for the current issue")]
    NoCurrentPr(Uuid),

    #[error("could not acquire batch lock for {0} after retries")]
    LockContended(Uuid),

    #[error("batch store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt batch record at {path}: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },

    #[error("batch {id} accounting broken: completed {completed} + queued {queued} + current {current} != total {total}")]
    InvariantViolation {
        id: Uuid,
        completed: usize,
        queued: usize,
        current: usize,
        total: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    InProgress,
    Completed,
    Timeout,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedIssue {
    pub issue: u64,
    pub pr: u64,
    pub started_at: DateTime<Utc>,
    pub merged_at: DateTime<Utc>,
}

/// One batch: an ordered queue of issues being delivered sequentially.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchState {
    pub id: Uuid,
    pub repository: String,
    pub total_count: usize,
    pub completed_count: usize,
    pub current_issue: Option<u64>,
    pub current_pr: Option<u64>,
    pub queue: Vec<u64>,
    pub completed: Vec<CompletedIssue>,
    pub started_at: DateTime<Utc>,
    pub status: BatchStatus,
}

impl BatchState {
    /// `completed + queued + (current ? 1 : 0) == total`, at every rest
    /// state.
    pub fn check_invariant(&self) -> Result<(), BatchError> {
        let current = usize::from(self.current_issue.is_some());
        if self.completed_count + self.queue.len() + current != self.total_count {
            return Err(BatchError::InvariantViolation {
                id: self.id,
                completed: self.completed_count,
                queued: self.queue.len(),
                current,
                total: self.total_count,
            });
        }
        Ok(())
    }
}

const LOCK_RETRY_ATTEMPTS: u32 = 5;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Store of batch records under `<base>/batches/`.
///
/// Per-issue start times live in an in-process map rather than the persisted
/// schema; a session resuming someone else's batch falls back to the batch
/// start time.
pub struct BatchStore {
    dir: PathBuf,
    start_times: Mutex<HashMap<(Uuid, u64), DateTime<Utc>>>,
}

impl BatchStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            start_times: Mutex::new(HashMap::new()),
        }
    }

    fn state_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn lock_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.lock"))
    }

    pub fn create(&self, repository: &str, queue: Vec<u64>) -> Result<BatchState, BatchError> {
        let state = BatchState {
            id: Uuid::new_v4(),
            repository: repository.to_string(),
            total_count: queue.len(),
            completed_count: 0,
            current_issue: None,
            current_pr: None,
            queue,
            completed: Vec::new(),
            started_at: Utc::now(),
            status: BatchStatus::InProgress,
        };
        self.save(&state)?;
        debug!(batch = %state.id, total = state.total_count, "batch created");
        Ok(state)
    }

    pub fn load(&self, id: Uuid) -> Result<BatchState, BatchError> {
        let path = self.state_path(id);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|source| BatchError::Corrupt {
                    path: path.display().to_string(),
                    source,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BatchError::NotFound(id)),
            Err(e) => Err(BatchError::Io(e)),
        }
    }

    /// Pop the queue head into `current_issue`. Returns the issue number,
    /// or `None` when the queue is empty.
    pub async fn start_next(&self, id: Uuid) -> Result<Option<u64>, BatchError> {
        let popped = self
            .with_lock(id, |state| {
                if let Some(&next) = state.queue.first() {
                    state.queue.remove(0);
                    state.current_issue = Some(next);
                    state.current_pr = None;
                    Ok(Some(next))
                } else {
                    Ok(None)
                }
            })
            .await?;
        if let Some(issue) = popped {
            self.start_times
                .lock()
                .expect("start-time map poisoned")
                .insert((id, issue), Utc::now());
            debug!(batch = %id, issue, "batch issue started");
        }
        Ok(popped)
    }

    /// Record the PR opened for the current issue.
    pub async fn set_pr(&self, id: Uuid, pr_number: u64) -> Result<(), BatchError> {
        self.with_lock(id, |state| {
            state.current_pr = Some(pr_number);
            Ok(())
        })
        .await
    }

    /// Move the current issue into the completed list. Completing the final
    /// issue flips the batch to `completed`.
    pub async fn complete_current(&self, id: Uuid) -> Result<BatchState, BatchError> {
        let started_fallback = {
            let map = self.start_times.lock().expect("start-time map poisoned");
            map.clone()
        };
        self.with_lock(id, move |state| {
            let issue = state.current_issue.ok_or(BatchError::NoCurrentIssue(id))?;
            let pr = state.current_pr.ok_or(BatchError::NoCurrentPr(id))?;
            let started_at = started_fallback
                .get(&(id, issue))
                .copied()
                .unwrap_or(state.started_at);
            state.completed.push(CompletedIssue {
                issue,
                pr,
                started_at,
                merged_at: Utc::now(),
            });
            state.completed_count += 1;
            state.current_issue = None;
            state.current_pr = None;
            if state.queue.is_empty() {
                state.status = BatchStatus::Completed;
            }
            Ok(state.clone())
        })
        .await
    }

    pub async fn abandon(&self, id: Uuid) -> Result<(), BatchError> {
        self.set_status(id, BatchStatus::Abandoned).await
    }

    pub async fn timeout(&self, id: Uuid) -> Result<(), BatchError> {
        self.set_status(id, BatchStatus::Timeout).await
    }

    /// A timed-out batch re-enters `in_progress` when continuation resumes.
    pub async fn resume(&self, id: Uuid) -> Result<(), BatchError> {
        self.set_status(id, BatchStatus::InProgress).await
    }

    async fn set_status(&self, id: Uuid, status: BatchStatus) -> Result<(), BatchError> {
        self.with_lock(id, move |state| {
            state.status = status;
            Ok(())
        })
        .await
    }

    /// Run one read-modify-write under the cooperative file lock, re-checking
    /// the accounting invariant before the replace hits disk.
    async fn with_lock<T>(
        &self,
        id: Uuid,
        mutate: impl FnOnce(&mut BatchState) -> Result<T, BatchError>,
    ) -> Result<T, BatchError> {
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path(id))?;
        let mut lock = RwLock::new(lock_file);

        let guard = 'acquire: {
            for attempt in 0..LOCK_RETRY_ATTEMPTS {
                match lock.try_write() {
                    Ok(g) => break 'acquire Some(g),
                    Err(_) if attempt + 1 < LOCK_RETRY_ATTEMPTS => {
                        tokio::time::sleep(LOCK_RETRY_DELAY).await;
                    }
                    Err(_) => {}
                }
            }
            None
        };
        let _guard = guard.ok_or(BatchError::LockContended(id))?;

        let mut state = self.load(id)?;
        let result = mutate(&mut state)?;
        state.check_invariant()?;
        self.save(&state)?;
        Ok(result)
    }

    fn save(&self, state: &BatchState) -> Result<(), BatchError> {
        state.check_invariant()?;
        let json = serde_json::to_string_pretty(state)
            .expect("batch state serialization is infallible");
        write_atomic(&self.state_path(state.id), json.as_bytes())?;
        Ok(())
    }
}
