// The engine value constructed once at bootstrap and threaded into every
// tool operation. No global singletons: the transport closes over this.

use std::sync::Arc;

use octocrab::Octocrab;

use crate::audit::AuditLog;
use crate::config::{RepoSpec, StoragePaths};
use crate::coordination::{BatchStore, LockStore, ProcessProbe, SystemProcessProbe, WorkflowStore};
use crate::github::{GitHubClient, GitHubError};

pub struct Engine {
    octocrab: Octocrab,
    pub session_id: String,
    pub paths: StoragePaths,
    pub locks: LockStore,
    pub workflows: WorkflowStore,
    pub batches: BatchStore,
    pub audit: AuditLog,
}

impl Engine {
    /// Build the engine: credential-keyed remote client, fresh session id,
    /// directory layout, and the filesystem stores.
    pub fn new(token: &str, session_id: String, paths: StoragePaths) -> Result<Self, GitHubError> {
        paths.ensure_layout()?;
        let octocrab = Octocrab::builder()
            .personal_token(token.to_string())
            .build()?;
        let probe: Arc<dyn ProcessProbe> = Arc::new(SystemProcessProbe);
        Ok(Self {
            locks: LockStore::new(paths.locks_dir(), probe),
            workflows: WorkflowStore::new(paths.workflow_dir()),
            batches: BatchStore::new(paths.batches_dir()),
            audit: AuditLog::new(paths.logs_dir()),
            octocrab,
            session_id,
            paths,
        })
    }

    /// A remote client bound to the repository this operation resolved.
    /// `Octocrab` clones share the underlying connection pool, so this is
    /// cheap enough to do per invocation.
    pub fn client_for(&self, repo: &RepoSpec) -> GitHubClient {
        GitHubClient::new(self.octocrab.clone(), repo.owner.clone(), repo.repo.clone())
    }
}
