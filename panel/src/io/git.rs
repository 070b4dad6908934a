//! Git adapter for the save workflow.
//!
//! The workflow only needs a handful of operations, so we keep a small,
//! explicit wrapper around `git` subprocess calls behind the
//! [`VersionControl`] capability. Tests substitute a scripted fake.

use std::path::PathBuf;
use std::process::{Output, Stdio};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::core::types::CommitOutcome;

/// Version-control operations the save workflow and status poll rely on.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Name of the checked-out branch (errors on detached HEAD).
    async fn current_branch(&self) -> Result<String>;

    /// Names of all local branches.
    async fn branches(&self) -> Result<Vec<String>>;

    /// Switch to an existing local branch.
    async fn checkout(&self, branch: &str) -> Result<()>;

    /// Create a branch at HEAD and switch to it.
    async fn checkout_new(&self, branch: &str) -> Result<()>;

    /// Stage everything and commit it with `message`.
    async fn stage_and_commit(&self, message: &str) -> Result<CommitOutcome>;

    /// Push `branch` to the remote, optionally recording it as upstream.
    async fn push(&self, branch: &str, set_upstream: bool) -> Result<()>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    remote: String,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            remote: "origin".to_string(),
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// True if there is anything staged for commit.
    pub async fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run_capture(&["diff", "--cached", "--name-only"]).await?;
        Ok(!out.trim().is_empty())
    }

    async fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

#[async_trait]
impl VersionControl for Git {
    #[instrument(skip_all)]
    async fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    async fn branches(&self) -> Result<Vec<String>> {
        let out = self
            .run_capture(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])
            .await?;
        Ok(parse_branch_list(&out))
    }

    #[instrument(skip_all, fields(branch))]
    async fn checkout(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch]).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch))]
    async fn checkout_new(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch]).await?;
        Ok(())
    }

    /// If nothing is staged after `add -A`, returns `NothingToCommit` and does nothing.
    #[instrument(skip_all)]
    async fn stage_and_commit(&self, message: &str) -> Result<CommitOutcome> {
        self.run_checked(&["add", "-A"]).await?;
        if !self.has_staged_changes().await? {
            debug!("no staged changes, skipping commit");
            return Ok(CommitOutcome::NothingToCommit);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message]).await?;
        Ok(CommitOutcome::Committed)
    }

    #[instrument(skip_all, fields(branch, remote = %self.remote))]
    async fn push(&self, branch: &str, set_upstream: bool) -> Result<()> {
        let mut args = vec!["push"];
        if set_upstream {
            args.push("--set-upstream");
        }
        args.push(&self.remote);
        args.push(branch);
        debug!(branch, set_upstream, "pushing branch");
        self.run_checked(&args).await?;
        Ok(())
    }
}

fn parse_branch_list(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn parses_branch_list() {
        let branches = parse_branch_list("master\n  updates \n\nfeature/x\n");
        assert_eq!(branches, vec!["master", "updates", "feature/x"]);
    }

    #[tokio::test]
    async fn reports_current_branch_and_branches() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        assert_eq!(git.current_branch().await.expect("branch"), "master");

        git.checkout_new("updates").await.expect("checkout -b");
        assert_eq!(git.current_branch().await.expect("branch"), "updates");

        let branches = git.branches().await.expect("branches");
        assert_eq!(branches, vec!["master", "updates"]);

        git.checkout("master").await.expect("checkout");
        assert_eq!(git.current_branch().await.expect("branch"), "master");
    }

    #[tokio::test]
    async fn commit_reports_nothing_to_commit_on_clean_tree() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        assert_eq!(
            git.stage_and_commit("noop").await.expect("commit"),
            CommitOutcome::NothingToCommit
        );

        repo.write_file("page.md", "# hello\n").expect("write");
        assert_eq!(
            git.stage_and_commit("add page").await.expect("commit"),
            CommitOutcome::Committed
        );
        assert!(!git.has_staged_changes().await.expect("staged"));
    }

    #[tokio::test]
    async fn checkout_of_missing_branch_fails() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        let err = git.checkout("nope").await.expect_err("missing branch");
        assert!(format!("{err:#}").contains("git checkout nope failed"));
    }

    #[tokio::test]
    async fn push_sets_upstream_on_remote() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        git.checkout_new("updates").await.expect("checkout -b");
        git.push("updates", true).await.expect("push");
        assert!(repo.remote_has_branch("updates").expect("remote"));
        assert_eq!(
            repo.upstream_of("updates").expect("upstream").as_deref(),
            Some("origin/updates")
        );
    }

    #[tokio::test]
    async fn push_to_unknown_remote_fails() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path()).with_remote("nowhere");
        assert!(git.push("master", true).await.is_err());
    }
}
