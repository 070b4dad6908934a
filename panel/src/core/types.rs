//! Shared deterministic types for the save workflow and status polling.
//!
//! These types define stable contracts between the workflow, the host
//! coordinator and the tests. They do not depend on external state or I/O.

use thiserror::Error;

/// Branch the working tree is on, as observed by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchState {
    pub name: String,
    pub is_target_branch: bool,
}

impl BranchState {
    pub fn observe(name: impl Into<String>, target_branch: &str) -> Self {
        let name = name.into();
        let is_target_branch = name == target_branch;
        Self {
            name,
            is_target_branch,
        }
    }
}

/// A user request to publish the pending changes. Lives for one save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveIntent {
    pub commit_message: String,
}

impl SaveIntent {
    pub fn new(commit_message: impl Into<String>) -> Self {
        Self {
            commit_message: commit_message.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.commit_message.trim().is_empty()
    }
}

/// Read-only snapshot returned by a status poll.
///
/// `branch == None` means the branch could not be read; callers keep whatever
/// they displayed before.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoStatus {
    pub branch: Option<BranchState>,
    pub review_link: Option<String>,
}

/// Result of `stage_and_commit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

/// Step at which a save stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaveFailure {
    #[error("commit message is empty")]
    EmptyMessage,
    #[error("could not switch to branch '{branch}': {reason}")]
    Branch { branch: String, reason: String },
    #[error("nothing to commit")]
    NothingToCommit,
    #[error("commit failed: {0}")]
    Commit(String),
    #[error("push of '{branch}' failed: {reason}")]
    Push { branch: String, reason: String },
}

/// How a save ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    Failed(SaveFailure),
}

impl SaveOutcome {
    /// Boolean reported to the UI.
    pub fn ok(&self) -> bool {
        matches!(self, SaveOutcome::Saved)
    }

    pub fn failure(&self) -> Option<&SaveFailure> {
        match self {
            SaveOutcome::Saved => None,
            SaveOutcome::Failed(failure) => Some(failure),
        }
    }
}

impl From<Result<(), SaveFailure>> for SaveOutcome {
    fn from(result: Result<(), SaveFailure>) -> Self {
        match result {
            Ok(()) => SaveOutcome::Saved,
            Err(failure) => SaveOutcome::Failed(failure),
        }
    }
}
