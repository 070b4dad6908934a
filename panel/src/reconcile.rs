//! Save workflow: turn a commit message into branch → commit → push.
//!
//! Every save lands on one fixed target branch so repeated saves accumulate
//! onto a single pending review. The working tree is a shared resource: a
//! single-flight lock serializes saves (later calls queue in FIFO order) and
//! status polls take the same lock, so a poll never sees a half-done save.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{
    BranchState, CommitOutcome, RepoStatus, SaveFailure, SaveIntent, SaveOutcome,
};
use crate::io::git::VersionControl;
use crate::io::review::ReviewLookup;

pub struct Reconciler {
    vcs: Arc<dyn VersionControl>,
    reviews: Arc<dyn ReviewLookup>,
    target_branch: String,
    working_tree: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        reviews: Arc<dyn ReviewLookup>,
        target_branch: impl Into<String>,
    ) -> Self {
        Self {
            vcs,
            reviews,
            target_branch: target_branch.into(),
            working_tree: Mutex::new(()),
        }
    }

    /// Publish all pending changes with `commit_message`.
    ///
    /// Steps run strictly in order and the first failure ends the save. Nothing
    /// is rolled back: a failed push keeps the local commit.
    #[instrument(skip_all, fields(target = %self.target_branch))]
    pub async fn save(&self, commit_message: &str) -> SaveOutcome {
        let intent = SaveIntent::new(commit_message);
        if intent.is_blank() {
            warn!("rejecting save with empty commit message");
            return SaveOutcome::Failed(SaveFailure::EmptyMessage);
        }

        let _tree = self.working_tree.lock().await;
        let outcome = SaveOutcome::from(self.run_save(&intent).await);
        match outcome.failure() {
            None => info!("save published"),
            Some(failure) => warn!(failure = %failure, "save failed"),
        }
        outcome
    }

    /// Current branch and, on the target branch, the open review link.
    ///
    /// Read failures degrade to "unknown"/"absent"; this never errors.
    pub async fn current_status(&self) -> RepoStatus {
        let branch = {
            let _tree = self.working_tree.lock().await;
            match self.vcs.current_branch().await {
                Ok(name) => BranchState::observe(name, &self.target_branch),
                Err(err) => {
                    debug!(err = %format!("{err:#}"), "branch unreadable, status unknown");
                    return RepoStatus::default();
                }
            }
        };

        let review_link = if branch.is_target_branch {
            match self.reviews.find_open_review(&branch.name).await {
                Ok(link) => link,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "review lookup failed");
                    None
                }
            }
        } else {
            None
        };

        RepoStatus {
            branch: Some(branch),
            review_link,
        }
    }

    async fn run_save(&self, intent: &SaveIntent) -> Result<(), SaveFailure> {
        self.ensure_target_branch().await?;
        self.commit(intent).await?;
        self.push().await
    }

    async fn ensure_target_branch(&self) -> Result<(), SaveFailure> {
        let target = self.target_branch.as_str();
        let failure = |reason: String| SaveFailure::Branch {
            branch: target.to_string(),
            reason,
        };

        match self.vcs.current_branch().await {
            Ok(current) if current == target => {
                debug!("already on target branch");
                return Ok(());
            }
            Ok(current) => debug!(current = %current, "switching to target branch"),
            Err(err) => debug!(err = %format!("{err:#}"), "current branch unknown, switching anyway"),
        }

        let branches = self
            .vcs
            .branches()
            .await
            .map_err(|err| failure(format!("{err:#}")))?;
        let switched = if branches.iter().any(|name| name == target) {
            self.vcs.checkout(target).await
        } else {
            info!(branch = target, "creating target branch");
            self.vcs.checkout_new(target).await
        };
        switched.map_err(|err| failure(format!("{err:#}")))?;

        let now = self
            .vcs
            .current_branch()
            .await
            .map_err(|err| failure(format!("{err:#}")))?;
        if now != target {
            return Err(failure(format!("still on '{now}' after checkout")));
        }
        Ok(())
    }

    async fn commit(&self, intent: &SaveIntent) -> Result<(), SaveFailure> {
        match self.vcs.stage_and_commit(&intent.commit_message).await {
            Ok(CommitOutcome::Committed) => Ok(()),
            Ok(CommitOutcome::NothingToCommit) => Err(SaveFailure::NothingToCommit),
            Err(err) => Err(SaveFailure::Commit(format!("{err:#}"))),
        }
    }

    async fn push(&self) -> Result<(), SaveFailure> {
        self.vcs
            .push(&self.target_branch, true)
            .await
            .map_err(|err| SaveFailure::Push {
                branch: self.target_branch.clone(),
                reason: format!("{err:#}"),
            })
    }
}
