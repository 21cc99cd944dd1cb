// Per-issue claim files. Exclusive-create is the atomicity primitive: two
// acquirers racing on one path cannot both observe success. The on-disk
// presence of a valid record IS the claim; there is no separate registry.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{RepoSpec, LOCK_STALE_TIMEOUT};

use super::process::ProcessProbe;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("issue #{issue} is locked by session {holder}")]
    Held { issue: u64, holder: String },

    #[error("lock file could not be created: {0}")]
    CreationFailed(std::io::Error),

    #[error("no lock held for issue #{0}")]
    NotLocked(u64),

    #[error("lock for issue #{issue} is held by another session ({holder})")]
    NotOwner { issue: u64, holder: String },

    #[error("lock store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt lock record at {path}: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },
}

/// One claim: a session working an issue. Mutated only by its holder (the
/// optional `updated_at` refresh) or a force-claimer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub issue_number: u64,
    pub repo: String,
    pub pid: u32,
    pub session_id: String,
    pub acquired_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LockRecord {
    fn new(repo: &RepoSpec, issue_number: u64, session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            issue_number,
            repo: repo.full_name(),
            pid: std::process::id(),
            session_id: session_id.to_string(),
            acquired_at: now,
            updated_at: now,
        }
    }

    pub fn held_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.acquired_at).num_seconds().max(0)
    }
}

/// A directory-scan result: the record plus its computed staleness.
#[derive(Debug, Clone, Serialize)]
pub struct LockEntry {
    pub record: LockRecord,
    pub stale: bool,
    pub owner: String,
    pub repo_name: String,
}

/// Store of claim files under `<base>/locks/`.
pub struct LockStore {
    dir: PathBuf,
    probe: Arc<dyn ProcessProbe>,
}

impl LockStore {
    pub fn new(dir: PathBuf, probe: Arc<dyn ProcessProbe>) -> Self {
        Self { dir, probe }
    }

    fn path_for(&self, repo: &RepoSpec, issue_number: u64) -> PathBuf {
        self.dir
            .join(format!("{}.lockdata", repo.file_stem(issue_number)))
    }

    /// A lock is stale when its holder process is gone from this host or it
    /// has outlived the staleness deadline.
    pub fn is_stale(&self, record: &LockRecord) -> bool {
        let age = Utc::now() - record.acquired_at;
        if age.num_seconds() > LOCK_STALE_TIMEOUT.as_secs() as i64 {
            return true;
        }
        !self.probe.is_alive(record.pid)
    }

    /// Acquire a claim on the issue.
    ///
    /// 1. An existing non-stale record fails with `Held`.
    /// 2. A stale record is deleted first.
    /// 3. The new record is written with exclusive create; losing that race
    ///    also fails with `Held`.
    pub fn acquire(
        &self,
        repo: &RepoSpec,
        issue_number: u64,
        session_id: &str,
    ) -> Result<LockRecord, LockError> {
        let path = self.path_for(repo, issue_number);

        if let Some(existing) = self.read_record(&path)? {
            if !self.is_stale(&existing) {
                return Err(LockError::Held {
                    issue: issue_number,
                    holder: existing.session_id,
                });
            }
            warn!(
                issue = issue_number,
                holder = %existing.session_id,
                "removing stale lock"
            );
            fs::remove_file(&path)?;
        }

        let record = LockRecord::new(repo, issue_number, session_id);
        match self.write_exclusive(&path, &record) {
            Ok(()) => {
                debug!(issue = issue_number, session = session_id, "lock acquired");
                Ok(record)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // Another acquirer won the exclusive-create race.
                let holder = self
                    .read_record(&path)
                    .ok()
                    .flatten()
                    .map(|r| r.session_id)
                    .unwrap_or_else(|| "unknown".to_string());
                Err(LockError::Held {
                    issue: issue_number,
                    holder,
                })
            }
            Err(e) => Err(LockError::CreationFailed(e)),
        }
    }

    /// Release a claim. Requires the caller's session to match; releasing an
    /// absent lock is a no-op success and returns `None`.
    pub fn release(
        &self,
        repo: &RepoSpec,
        issue_number: u64,
        session_id: &str,
    ) -> Result<Option<LockRecord>, LockError> {
        let path = self.path_for(repo, issue_number);
        match self.read_record(&path)? {
            None => Ok(None),
            Some(record) if record.session_id == session_id => {
                fs::remove_file(&path)?;
                debug!(issue = issue_number, session = session_id, "lock released");
                Ok(Some(record))
            }
            Some(record) => Err(LockError::NotOwner {
                issue: issue_number,
                holder: record.session_id,
            }),
        }
    }

    /// Overwrite any existing claim. Returns the new record and whatever was
    /// displaced so the caller can audit the takeover.
    pub fn force_claim(
        &self,
        repo: &RepoSpec,
        issue_number: u64,
        session_id: &str,
    ) -> Result<(LockRecord, Option<LockRecord>), LockError> {
        let path = self.path_for(repo, issue_number);
        let previous = self.read_record(&path)?;
        if previous.is_some() {
            fs::remove_file(&path)?;
        }
        let record = LockRecord::new(repo, issue_number, session_id);
        let json = serde_json::to_string_pretty(&record)
            .expect("lock record serialization is infallible");
        fs::write(&path, json)?;
        Ok((record, previous))
    }

    /// Touch `updated_at`. Holder only.
    pub fn refresh(
        &self,
        repo: &RepoSpec,
        issue_number: u64,
        session_id: &str,
    ) -> Result<LockRecord, LockError> {
        let path = self.path_for(repo, issue_number);
        let mut record = self
            .read_record(&path)?
            .ok_or(LockError::NotLocked(issue_number))?;
        if record.session_id != session_id {
            return Err(LockError::NotOwner {
                issue: issue_number,
                holder: record.session_id,
            });
        }
        record.updated_at = Utc::now();
        let json = serde_json::to_string_pretty(&record)
            .expect("lock record serialization is infallible");
        fs::write(&path, json)?;
        Ok(record)
    }

    /// Current claim on an issue, with its staleness flag.
    pub fn get(
        &self,
        repo: &RepoSpec,
        issue_number: u64,
    ) -> Result<Option<(LockRecord, bool)>, LockError> {
        let path = self.path_for(repo, issue_number);
        Ok(self
            .read_record(&path)?
            .map(|record| {
                let stale = self.is_stale(&record);
                (record, stale)
            }))
    }

    /// Scan the lock directory. File names carry the issue triple; records
    /// that fail to parse are skipped with a warning rather than failing the
    /// listing.
    pub fn list(&self) -> Result<Vec<LockEntry>, LockError> {
        let mut entries = Vec::new();
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(LockError::Io(e)),
        };
        for entry in read_dir {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((owner, repo_name, _issue)) = parse_lock_file_name(&name) else {
                continue;
            };
            match self.read_record(&entry.path()) {
                Ok(Some(record)) => {
                    let stale = self.is_stale(&record);
                    entries.push(LockEntry {
                        stale,
                        owner,
                        repo_name,
                        record,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(file = %name, error = %e, "skipping unreadable lock"),
            }
        }
        Ok(entries)
    }

    /// All claims held by one session.
    pub fn list_for_session(&self, session_id: &str) -> Result<Vec<LockEntry>, LockError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|entry| entry.record.session_id == session_id)
            .collect())
    }

    fn read_record(&self, path: &Path) -> Result<Option<LockRecord>, LockError> {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|source| LockError::Corrupt {
                    path: path.display().to_string(),
                    source,
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LockError::Io(e)),
        }
    }

    fn write_exclusive(&self, path: &Path, record: &LockRecord) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(record)
            .expect("lock record serialization is infallible");
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

/// Parse `<owner>_<repo>_<n>.lockdata`. Owners and repos containing
/// underscores are handled by splitting the issue number off the tail first.
fn parse_lock_file_name(name: &str) -> Option<(String, String, u64)> {
    let stem = name.strip_suffix(".lockdata")?;
    let (rest, issue) = stem.rsplit_once('_')?;
    let issue: u64 = issue.parse().ok()?;
    let (owner, repo) = rest.split_once('_')?;
    Some((owner.to_string(), repo.to_string(), issue))
}
