// Per-issue workflow records: the phase machine, its transition relation,
// and whole-file-replace persistence. Side effects on specific transitions
// (branch creation, PR opening) belong to the tool layer; this store only
// enforces the relation, the gate, and the skip-justification contract.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::RepoSpec;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("no workflow record for issue #{0}")]
    NotFound(u64),

    #[error("transition {from} -> {to} is not permitted")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("transition into {0} requires passing tests or a skip justification")]
    TestsRequired(Phase),

    #[error("forward skip to {0} requires a justification")]
    SkipJustificationRequired(Phase),

    #[error("workflow store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt workflow record at {path}: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },
}

/// Phases of the guided implementation workflow. `Merged` and `Abandoned`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Selection,
    Research,
    Branch,
    Implementation,
    Testing,
    Commit,
    Pr,
    Review,
    Merged,
    Abandoned,
}

/// The linear order selection -> ... -> merged. `Abandoned` sits outside it.
const LINEAR_ORDER: [Phase; 9] = [
    Phase::Selection,
    Phase::Research,
    Phase::Branch,
    Phase::Implementation,
    Phase::Testing,
    Phase::Commit,
    Phase::Pr,
    Phase::Review,
    Phase::Merged,
];

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Merged | Phase::Abandoned)
    }

    /// Position in the linear order; `Abandoned` has none.
    fn linear_index(self) -> Option<usize> {
        LINEAR_ORDER.iter().position(|p| *p == self)
    }

    /// The single permitted direct successor along the linear order.
    fn successor(self) -> Option<Phase> {
        let idx = self.linear_index()?;
        LINEAR_ORDER.get(idx + 1).copied()
    }

    /// Whether entering this phase is gated on tests.
    fn requires_tests(self) -> bool {
        matches!(self, Phase::Commit | Phase::Pr)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Selection => "selection",
            Phase::Research => "research",
            Phase::Branch => "branch",
            Phase::Implementation => "implementation",
            Phase::Testing => "testing",
            Phase::Commit => "commit",
            Phase::Pr => "pr",
            Phase::Review => "review",
            Phase::Merged => "merged",
            Phase::Abandoned => "abandoned",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
    pub trigger: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipJustification {
    pub skipped_phase: Phase,
    pub text: String,
    pub at: DateTime<Utc>,
    pub session_id: String,
}

/// One record per claimed issue. History is append-only; the record itself
/// is replaced whole-file on every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub issue_number: u64,
    pub repo: String,
    pub phase: Phase,
    pub phase_history: Vec<PhaseTransition>,
    pub skip_justifications: Vec<SkipJustification>,
    pub branch_name: Option<String>,
    pub tests_passed: Option<bool>,
    pub pr_number: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    fn new(repo: &RepoSpec, issue_number: u64) -> Self {
        let now = Utc::now();
        Self {
            issue_number,
            repo: repo.full_name(),
            phase: Phase::Selection,
            phase_history: Vec::new(),
            skip_justifications: Vec::new(),
            branch_name: None,
            tests_passed: None,
            pr_number: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Inputs to a phase advance.
#[derive(Debug, Clone)]
pub struct AdvanceRequest {
    pub target: Phase,
    pub tests_passed: Option<bool>,
    pub skip_justification: Option<String>,
    pub trigger: String,
    pub session_id: String,
}

/// Store of workflow records under `<base>/workflow/`.
pub struct WorkflowStore {
    dir: PathBuf,
}

impl WorkflowStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, repo: &RepoSpec, issue_number: u64) -> PathBuf {
        self.dir
            .join(format!("{}.json", repo.file_stem(issue_number)))
    }

    /// Create a fresh record at `selection`, or return the existing one.
    pub fn create(
        &self,
        repo: &RepoSpec,
        issue_number: u64,
    ) -> Result<WorkflowState, WorkflowError> {
        if let Some(existing) = self.load(repo, issue_number)? {
            return Ok(existing);
        }
        let state = WorkflowState::new(repo, issue_number);
        self.save(repo, &state)?;
        debug!(issue = issue_number, "workflow created at selection");
        Ok(state)
    }

    pub fn load(
        &self,
        repo: &RepoSpec,
        issue_number: u64,
    ) -> Result<Option<WorkflowState>, WorkflowError> {
        let path = self.path_for(repo, issue_number);
        match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map(Some).map_err(|source| {
                WorkflowError::Corrupt {
                    path: path.display().to_string(),
                    source,
                }
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WorkflowError::Io(e)),
        }
    }

    pub fn delete(&self, repo: &RepoSpec, issue_number: u64) -> Result<(), WorkflowError> {
        let path = self.path_for(repo, issue_number);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkflowError::Io(e)),
        }
    }

    /// Apply an advance to the stored record, enforcing the relation, the
    /// tests gate, and skip-justification synthesis, then persist.
    pub fn advance(
        &self,
        repo: &RepoSpec,
        issue_number: u64,
        request: AdvanceRequest,
    ) -> Result<(Phase, WorkflowState), WorkflowError> {
        let mut state = self
            .load(repo, issue_number)?
            .ok_or(WorkflowError::NotFound(issue_number))?;

        let previous = state.phase;
        let skipped = plan_transition(previous, &request)?;

        let now = Utc::now();
        for phase in skipped {
            // Safe: plan_transition only returns skips with a justification.
            let text = request
                .skip_justification
                .clone()
                .unwrap_or_default();
            state.skip_justifications.push(SkipJustification {
                skipped_phase: phase,
                text,
                at: now,
                session_id: request.session_id.clone(),
            });
        }

        if let Some(tests_passed) = request.tests_passed {
            state.tests_passed = Some(tests_passed);
        }
        state.phase_history.push(PhaseTransition {
            from: previous,
            to: request.target,
            at: now,
            trigger: request.trigger.clone(),
        });
        state.phase = request.target;
        state.updated_at = now;
        self.save(repo, &state)?;
        debug!(issue = issue_number, from = %previous, to = %state.phase, "phase advanced");
        Ok((previous, state))
    }

    /// Record the branch created for this issue.
    pub fn set_branch(
        &self,
        repo: &RepoSpec,
        issue_number: u64,
        branch_name: &str,
    ) -> Result<WorkflowState, WorkflowError> {
        let mut state = self
            .load(repo, issue_number)?
            .ok_or(WorkflowError::NotFound(issue_number))?;
        state.branch_name = Some(branch_name.to_string());
        state.updated_at = Utc::now();
        self.save(repo, &state)?;
        Ok(state)
    }

    /// Record the PR opened for this issue.
    pub fn set_pr(
        &self,
        repo: &RepoSpec,
        issue_number: u64,
        pr_number: u64,
    ) -> Result<WorkflowState, WorkflowError> {
        let mut state = self
            .load(repo, issue_number)?
            .ok_or(WorkflowError::NotFound(issue_number))?;
        state.pr_number = Some(pr_number);
        state.updated_at = Utc::now();
        self.save(repo, &state)?;
        Ok(state)
    }

    // Whole-file replace via temp-then-rename so a crash mid-write never
    // leaves a truncated record behind.
    fn save(&self, repo: &RepoSpec, state: &WorkflowState) -> Result<(), WorkflowError> {
        let path = self.path_for(repo, state.issue_number);
        let json = serde_json::to_string_pretty(state)
            .expect("workflow state serialization is infallible");
        write_atomic(&path, json.as_bytes())?;
        Ok(())
    }
}

pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

/// Check a transition without applying it. Lets callers refuse a move
/// before running its remote side effects.
pub fn validate_transition(current: Phase, request: &AdvanceRequest) -> Result<(), WorkflowError> {
    plan_transition(current, request).map(|_| ())
}

/// Validate a transition and return the intermediate phases skipped, if any.
///
/// - the direct successor and `abandoned` are always structurally permitted
///   from a non-terminal phase;
/// - a later phase along the linear order is a forward skip and needs a
///   justification;
/// - entering `commit` or `pr` additionally requires passing tests or a
///   justification;
/// - everything else is invalid.
fn plan_transition(
    current: Phase,
    request: &AdvanceRequest,
) -> Result<Vec<Phase>, WorkflowError> {
    let target = request.target;
    let has_justification = request
        .skip_justification
        .as_deref()
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false);

    if current.is_terminal() {
        return Err(WorkflowError::InvalidTransition {
            from: current,
            to: target,
        });
    }
    if target == Phase::Abandoned {
        return Ok(Vec::new());
    }

    let current_idx = current
        .linear_index()
        .expect("non-terminal phases are on the linear order");
    let Some(target_idx) = target.linear_index() else {
        return Err(WorkflowError::InvalidTransition {
            from: current,
            to: target,
        });
    };

    let skipped: Vec<Phase> = if Some(target) == current.successor() {
        Vec::new()
    } else if target_idx > current_idx + 1 {
        LINEAR_ORDER[current_idx + 1..target_idx].to_vec()
    } else {
        return Err(WorkflowError::InvalidTransition {
            from: current,
            to: target,
        });
    };

    // The tests gate outranks skip bookkeeping: reaching commit/pr with
    // neither passing tests nor a justification reports TESTS_REQUIRED even
    // when the move is also a forward skip.
    if target.requires_tests() {
        let tests_ok = request.tests_passed == Some(true);
        if !tests_ok && !has_justification {
            return Err(WorkflowError::TestsRequired(target));
        }
    }

    if !skipped.is_empty() && !has_justification {
        return Err(WorkflowError::SkipJustificationRequired(target));
    }

    Ok(skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo() -> RepoSpec {
        RepoSpec::parse("acme/widgets").unwrap()
    }

    fn request(target: Phase) -> AdvanceRequest {
        AdvanceRequest {
            target,
            tests_passed: None,
            skip_justification: None,
            trigger: "test".to_string(),
            session_id: "session-a".to_string(),
        }
    }

    #[test]
    fn direct_transitions_walk_the_linear_order() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::new(dir.path().to_path_buf());
        store.create(&repo(), 42).unwrap();

        for target in [Phase::Research, Phase::Branch, Phase::Implementation, Phase::Testing] {
            let (_, state) = store.advance(&repo(), 42, request(target)).unwrap();
            assert_eq!(state.phase, target);
        }
        let state = store.load(&repo(), 42).unwrap().unwrap();
        assert_eq!(state.phase_history.len(), 4);
    }

    #[test]
    fn commit_gate_requires_tests_or_justification() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::new(dir.path().to_path_buf());
        store.create(&repo(), 42).unwrap();
        for target in [Phase::Research, Phase::Branch, Phase::Implementation, Phase::Testing] {
            store.advance(&repo(), 42, request(target)).unwrap();
        }

        // No tests, no justification: refused, state unchanged.
        let err = store.advance(&repo(), 42, request(Phase::Commit)).unwrap_err();
        assert!(matches!(err, WorkflowError::TestsRequired(Phase::Commit)));
        let state = store.load(&repo(), 42).unwrap().unwrap();
        assert_eq!(state.phase, Phase::Testing);

        // Tests passed: admitted.
        let mut req = request(Phase::Commit);
        req.tests_passed = Some(true);
        let (previous, state) = store.advance(&repo(), 42, req).unwrap();
        assert_eq!(previous, Phase::Testing);
        assert_eq!(state.phase, Phase::Commit);
        assert_eq!(state.tests_passed, Some(true));
    }

    #[test]
    fn pr_gate_accepts_justification_instead_of_tests() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::new(dir.path().to_path_buf());
        store.create(&repo(), 8).unwrap();
        let mut req = request(Phase::Pr);
        req.skip_justification = Some("hotfix, verified manually".to_string());
        let (_, state) = store.advance(&repo(), 8, req).unwrap();
        assert_eq!(state.phase, Phase::Pr);
        // selection -> pr skips research..commit: five intermediates.
        assert_eq!(state.skip_justifications.len(), 5);
        assert!(state
            .skip_justifications
            .iter()
            .any(|s| s.skipped_phase == Phase::Testing));
    }

    #[test]
    fn gated_forward_skip_without_tests_reports_tests_required() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::new(dir.path().to_path_buf());
        store.create(&repo(), 16).unwrap();
        for target in [Phase::Research, Phase::Branch, Phase::Implementation, Phase::Testing] {
            store.advance(&repo(), 16, request(target)).unwrap();
        }

        // testing -> pr skips commit; with neither tests nor justification
        // the gate answers first.
        let err = store.advance(&repo(), 16, request(Phase::Pr)).unwrap_err();
        assert!(matches!(err, WorkflowError::TestsRequired(Phase::Pr)));

        // With tests passing, the same move still needs a skip
        // justification for the jumped-over commit phase.
        let mut req = request(Phase::Pr);
        req.tests_passed = Some(true);
        let err = store.advance(&repo(), 16, req).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::SkipJustificationRequired(Phase::Pr)
        ));
        assert_eq!(store.load(&repo(), 16).unwrap().unwrap().phase, Phase::Testing);
    }

    #[test]
    fn forward_skip_without_justification_is_refused() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::new(dir.path().to_path_buf());
        store.create(&repo(), 9).unwrap();
        let err = store
            .advance(&repo(), 9, request(Phase::Testing))
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::SkipJustificationRequired(Phase::Testing)
        ));
    }

    #[test]
    fn backward_transitions_are_invalid() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::new(dir.path().to_path_buf());
        store.create(&repo(), 10).unwrap();
        store.advance(&repo(), 10, request(Phase::Research)).unwrap();
        let err = store
            .advance(&repo(), 10, request(Phase::Selection))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn abandoned_is_reachable_from_any_active_phase() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::new(dir.path().to_path_buf());
        store.create(&repo(), 11).unwrap();
        store.advance(&repo(), 11, request(Phase::Research)).unwrap();
        let (_, state) = store.advance(&repo(), 11, request(Phase::Abandoned)).unwrap();
        assert_eq!(state.phase, Phase::Abandoned);
    }

    #[test]
    fn terminal_phases_admit_nothing() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::new(dir.path().to_path_buf());
        store.create(&repo(), 12).unwrap();
        store.advance(&repo(), 12, request(Phase::Abandoned)).unwrap();
        let err = store
            .advance(&repo(), 12, request(Phase::Research))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn record_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::new(dir.path().to_path_buf());
        store.create(&repo(), 13).unwrap();
        store.set_branch(&repo(), 13, "13-fix-the-thing").unwrap();
        store.set_pr(&repo(), 13, 77).unwrap();
        let state = store.load(&repo(), 13).unwrap().unwrap();
        assert_eq!(state.branch_name.as_deref(), Some("13-fix-the-thing"));
        assert_eq!(state.pr_number, Some(77));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::new(dir.path().to_path_buf());
        store.create(&repo(), 14).unwrap();
        store.delete(&repo(), 14).unwrap();
        store.delete(&repo(), 14).unwrap();
        assert!(store.load(&repo(), 14).unwrap().is_none());
    }

    #[test]
    fn create_returns_existing_record() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::new(dir.path().to_path_buf());
        store.create(&repo(), 15).unwrap();
        store.advance(&repo(), 15, request(Phase::Research)).unwrap();
        let again = store.create(&repo(), 15).unwrap();
        assert_eq!(again.phase, Phase::Research);
    }
}
