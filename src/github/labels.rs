// Label families the engine manages. Three families with fixed colors and
// descriptions, created on demand and never deleted.

use octocrab::Octocrab;
use tracing::debug;

use super::errors::GitHubError;

/// A label the engine expects to exist in the repository.
#[derive(Debug, Clone)]
pub struct LabelSpec {
    pub name: &'static str,
    pub color: &'static str,
    pub description: &'static str,
}

/// The complete set of managed labels across the priority, type, and status
/// families.
pub fn label_families() -> Vec<LabelSpec> {
    vec![
        // Priority family
        LabelSpec {
            name: "priority:critical",
            color: "b60205",
            description: "Critical priority work",
        },
        LabelSpec {
            name: "priority:high",
            color: "d93f0b",
            description: "High priority work",
        },
        LabelSpec {
            name: "priority:medium",
            color: "fbca04",
            description: "Medium priority work",
        },
        LabelSpec {
            name: "priority:low",
            color: "c2e0c6",
            description: "Low priority work",
        },
        // Type family
        LabelSpec {
            name: "type:bug",
            color: "d73a4a",
            description: "Something is broken",
        },
        LabelSpec {
            name: "type:feature",
            color: "a2eeef",
            description: "New functionality",
        },
        LabelSpec {
            name: "type:chore",
            color: "ededed",
            description: "Maintenance work",
        },
        LabelSpec {
            name: "type:docs",
            color: "0075ca",
            description: "Documentation work",
        },
        // Status family
        LabelSpec {
            name: "status:backlog",
            color: "ffffff",
            description: "Awaiting selection",
        },
        LabelSpec {
            name: "status:in-progress",
            color: "0e8a16",
            description: "Claimed by an agent",
        },
        LabelSpec {
            name: "status:in-review",
            color: "5319e7",
            description: "Pull request under review",
        },
        LabelSpec {
            name: "status:blocked",
            color: "000000",
            description: "Blocked on other work",
        },
    ]
}

/// Handler that creates any missing managed labels. Idempotent: a label that
/// already exists is a success.
#[derive(Debug, Clone)]
pub struct LabelHandler {
    octocrab: Octocrab,
    owner: String,
    repo: String,
}

impl LabelHandler {
    pub fn new(octocrab: Octocrab, owner: String, repo: String) -> Self {
        Self {
            octocrab,
            owner,
            repo,
        }
    }

    /// Ensure every managed label exists, collecting per-label failures
    /// instead of aborting on the first.
    pub async fn ensure_labels_exist(&self) -> Result<Vec<(String, String)>, GitHubError> {
        let mut failures = Vec::new();
        for spec in label_families() {
            match self
                .octocrab
                .issues(&self.owner, &self.repo)
                .create_label(spec.name, spec.color, spec.description)
                .await
            {
                Ok(_) => debug!(label = spec.name, "created label"),
                Err(octocrab::Error::GitHub { source, .. })
                    if source.message.contains("already_exists")
                        || source.status_code.as_u16() == 422 =>
                {
                    // Validation failure on create means the label exists.
                }
                Err(e) => failures.push((spec.name.to_string(), e.to_string())),
            }
        }
        Ok(failures)
    }
}
