// Engine configuration: repository resolution, credential resolution, and
// the on-disk storage layout shared by every session on the host.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How long a lock may exist before any other session may displace it.
pub const LOCK_STALE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Interval between PR-status polls inside batch continuation.
pub const BATCH_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Hard deadline for a single batch continuation call.
pub const BATCH_POLL_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// General audit retention floor in days.
pub const AUDIT_RETENTION_DAYS: i64 = 30;

/// Retention target for daily files containing lock events.
pub const LOCK_EVENT_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("repository not specified; pass `repo`, or set GITHUB_REPOSITORY or GITHUB_OWNER/GITHUB_REPO")]
    RepoRequired,

    #[error("malformed repository `{0}`; expected owner/repo")]
    MalformedRepo(String),

    #[error("home directory could not be resolved; set CORRAL_HOME")]
    NoHome,
}

/// An `(owner, repo)` pair, resolved once per tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSpec {
    pub owner: String,
    pub repo: String,
}

impl RepoSpec {
    pub fn parse(full: &str) -> Result<Self, ConfigError> {
        match full.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() => Ok(Self {
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(ConfigError::MalformedRepo(full.to_string())),
        }
    }

    /// Resolution order: explicit argument, `GITHUB_REPOSITORY`, then the
    /// `GITHUB_OWNER`/`GITHUB_REPO` pair.
    pub fn resolve(explicit: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(arg) = explicit {
            return Self::parse(arg);
        }
        if let Ok(full) = std::env::var("GITHUB_REPOSITORY") {
            if !full.is_empty() {
                return Self::parse(&full);
            }
        }
        let owner = std::env::var("GITHUB_OWNER").unwrap_or_default();
        let repo = std::env::var("GITHUB_REPO").unwrap_or_default();
        if !owner.is_empty() && !repo.is_empty() {
            return Ok(Self { owner, repo });
        }
        Err(ConfigError::RepoRequired)
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Filesystem-safe stem used by per-issue store files.
    pub fn file_stem(&self, issue_number: u64) -> String {
        format!("{}_{}_{}", self.owner, self.repo, issue_number)
    }
}

/// The `<base>/` directory tree. Lifetime is the user's account on the host;
/// every engine process on the machine shares it.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub base: PathBuf,
}

impl StoragePaths {
    /// `CORRAL_HOME` overrides; otherwise `$HOME/.corral`.
    pub fn resolve(override_base: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(base) = override_base {
            return Ok(Self {
                base: base.to_path_buf(),
            });
        }
        if let Ok(custom) = std::env::var("CORRAL_HOME") {
            if !custom.trim().is_empty() {
                return Ok(Self {
                    base: PathBuf::from(custom.trim()),
                });
            }
        }
        resolve_home_dir()
            .map(|home| Self {
                base: home.join(".corral"),
            })
            .ok_or(ConfigError::NoHome)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.base.join("locks")
    }

    pub fn workflow_dir(&self) -> PathBuf {
        self.base.join("workflow")
    }

    pub fn batches_dir(&self) -> PathBuf {
        self.base.join("batches")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    /// Create the base directory and the four subdirectories.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        for dir in [
            self.base.clone(),
            self.locks_dir(),
            self.workflow_dir(),
            self.batches_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn resolve_home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("USERPROFILE")
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
}

/// Credential resolution: explicit token, `GITHUB_TOKEN`, then the GitHub
/// CLI helper. Fails fast with guidance when nothing is available.
pub fn resolve_token(explicit: Option<&str>) -> Result<String, crate::github::GitHubError> {
    if let Some(token) = explicit {
        if !token.trim().is_empty() {
            return Ok(token.trim().to_string());
        }
    }
    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        if !token.trim().is_empty() {
            return Ok(token.trim().to_string());
        }
    }
    if let Ok(token) = try_github_cli_token() {
        return Ok(token);
    }
    Err(crate::github::GitHubError::TokenNotFound(
        "set GITHUB_TOKEN, pass --token, or run `gh auth login`".to_string(),
    ))
}

fn try_github_cli_token() -> Result<String, crate::github::GitHubError> {
    use std::process::Command;

    let output = Command::new("gh")
        .args(["auth", "token"])
        .output()
        .map_err(|e| {
            crate::github::GitHubError::TokenNotFound(format!("GitHub CLI unavailable: {e}"))
        })?;
    if !output.status.success() {
        return Err(crate::github::GitHubError::TokenNotFound(
            "GitHub CLI not authenticated; run `gh auth login`".to_string(),
        ));
    }
    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(crate::github::GitHubError::TokenNotFound(
            "GitHub CLI returned an empty token".to_string(),
        ));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_owner_repo() {
        let spec = RepoSpec::parse("acme/widgets").unwrap();
        assert_eq!(spec.owner, "acme");
        assert_eq!(spec.repo, "widgets");
        assert_eq!(spec.full_name(), "acme/widgets");
    }

    #[test]
    fn parse_rejects_missing_slash() {
        assert!(RepoSpec::parse("acme").is_err());
        assert!(RepoSpec::parse("/widgets").is_err());
        assert!(RepoSpec::parse("acme/").is_err());
    }

    #[test]
    fn file_stem_encodes_issue_triple() {
        let spec = RepoSpec::parse("acme/widgets").unwrap();
        assert_eq!(spec.file_stem(42), "acme_widgets_42");
    }

    #[test]
    fn storage_paths_from_override() {
        let paths = StoragePaths::resolve(Some(Path::new("/tmp/corral-test"))).unwrap();
        assert_eq!(paths.locks_dir(), PathBuf::from("/tmp/corral-test/locks"));
        assert_eq!(paths.logs_dir(), PathBuf::from("/tmp/corral-test/logs"));
    }
}
