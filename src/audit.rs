// Append-only structured audit trail: one JSON object per line in a daily
// file. This is a separate sink from the tracing subscriber; tools log here
// for cross-session forensics, not for operator console output.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{AUDIT_RETENTION_DAYS, LOCK_EVENT_RETENTION_DAYS};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    Skipped,
}

/// One audit line. Optional fields serialize only when present so the daily
/// files stay greppable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub level: AuditLevel,
    pub tool: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl AuditRecord {
    pub fn new(tool: &str, session_id: &str, outcome: AuditOutcome) -> Self {
        Self {
            ts: Utc::now(),
            level: AuditLevel::Info,
            tool: tool.to_string(),
            session_id: session_id.to_string(),
            repo: None,
            issue: None,
            phase: None,
            duration_ms: None,
            outcome,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }

    pub fn repo(mut self, repo: &str) -> Self {
        self.repo = Some(repo.to_string());
        self
    }

    pub fn issue(mut self, issue: u64) -> Self {
        self.issue = Some(issue);
        self
    }

    pub fn phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn error_text(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Mark as a lock event; these lines hold the daily file to the longer
    /// retention window.
    pub fn lock_event(self, kind: &str) -> Self {
        self.meta("lock_event", Value::String(kind.to_string()))
    }
}

/// Writer for the daily audit files under `<base>/logs/`.
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("audit-{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Append one record. Failures are reported but callers generally treat
    /// audit append as best-effort alongside the primary operation.
    pub fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let path = self.file_for(record.ts.date_naive());
        let line = serde_json::to_string(record)
            .expect("audit record serialization is infallible");
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn append_best_effort(&self, record: AuditRecord) {
        if let Err(e) = self.append(&record) {
            warn!(error = %e, tool = %record.tool, "audit append failed");
        }
    }

    /// Read one day's records, skipping malformed lines (a crash mid-append
    /// can leave a partial last line).
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<AuditRecord>, AuditError> {
        let path = self.file_for(date);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AuditError::Io(e)),
        };
        Ok(contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// Retention sweep. Files past the lock-event window are deleted
    /// unconditionally; files past the general floor are kept only while
    /// they still contain lock events.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize, AuditError> {
        let today = now.date_naive();
        let mut deleted = 0;
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AuditError::Io(e)),
        };
        for entry in read_dir {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(date) = parse_audit_file_name(&name) else {
                continue;
            };
            let age_days = (today - date).num_days();
            let delete = if age_days > LOCK_EVENT_RETENTION_DAYS {
                true
            } else if age_days > AUDIT_RETENTION_DAYS {
                !file_has_lock_events(&entry.path())
            } else {
                false
            };
            if delete {
                fs::remove_file(entry.path())?;
                debug!(file = %name, age_days, "audit file swept");
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

fn parse_audit_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_prefix("audit-")?.strip_suffix(".jsonl")?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

fn file_has_lock_events(path: &std::path::Path) -> bool {
    fs::read_to_string(path)
        .map(|contents| contents.contains("\"lock_event\""))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn record(tool: &str) -> AuditRecord {
        AuditRecord::new(tool, "session-a", AuditOutcome::Success)
    }

    #[test]
    fn append_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().to_path_buf());
        log.append(&record("select_next_issue").issue(42).repo("acme/widgets"))
            .unwrap();
        log.append(&record("release_lock")).unwrap();

        let today = Utc::now().date_naive();
        let records = log.read_day(today).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tool, "select_next_issue");
        assert_eq!(records[0].issue, Some(42));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().to_path_buf());
        log.append(&record("list_backlog")).unwrap();

        let today = Utc::now().date_naive();
        let path = dir
            .path()
            .join(format!("audit-{}.jsonl", today.format("%Y-%m-%d")));
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{truncated").unwrap();

        let records = log.read_day(today).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn sweep_deletes_old_files_but_keeps_lock_events_longer() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().to_path_buf());
        let now = Utc::now();

        // 40 days old, plain records: past the floor, deleted.
        let old_plain = now - Duration::days(40);
        let mut rec = record("list_backlog");
        rec.ts = old_plain;
        log.append(&rec).unwrap();

        // 40 days old with a lock event: kept.
        let mut lock_rec = record("select_next_issue").lock_event("acquired");
        lock_rec.ts = old_plain - Duration::days(1);
        log.append(&lock_rec).unwrap();

        // 100 days old with a lock event: past the long window, deleted.
        let mut ancient = record("force_claim").lock_event("forced");
        ancient.ts = now - Duration::days(100);
        log.append(&ancient).unwrap();

        // Fresh file: kept.
        log.append(&record("get_pr_status")).unwrap();

        let deleted = log.sweep(now).unwrap();
        assert_eq!(deleted, 2);
        assert!(log
            .read_day((now - Duration::days(41)).date_naive())
            .map(|r| !r.is_empty())
            .unwrap());
        assert!(!log.read_day(now.date_naive()).unwrap().is_empty());
    }

    #[test]
    fn audit_file_name_parsing() {
        assert_eq!(
            parse_audit_file_name("audit-2026-08-02.jsonl"),
            NaiveDate::from_ymd_opt(2026, 8, 2)
        );
        assert_eq!(parse_audit_file_name("audit-garbage.jsonl"), None);
        assert_eq!(parse_audit_file_name("other.jsonl"), None);
    }
}
