//! Test-only helpers: throwaway git repositories and scripted collaborators.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use crate::core::types::CommitOutcome;
use crate::io::git::VersionControl;
use crate::io::review::ReviewLookup;

/// A working repository on `master` with one commit and a bare `origin`.
pub struct TestRepo {
    dir: TempDir,
    remote: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().context("create repo dir")?;
        let remote = TempDir::new().context("create remote dir")?;

        run_git(remote.path(), &["init", "--bare", "--quiet"])?;
        run_git(dir.path(), &["init", "--quiet"])?;
        run_git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/master"])?;
        run_git(dir.path(), &["config", "user.name", "Panel Test"])?;
        run_git(dir.path(), &["config", "user.email", "panel@example.test"])?;
        run_git(dir.path(), &["config", "commit.gpgsign", "false"])?;

        let repo = Self { dir, remote };
        repo.write_file("config.toml", "title = \"test site\"\n")?;
        repo.git(&["add", "-A"])?;
        repo.git(&["commit", "--quiet", "-m", "initial"])?;
        let remote_path = repo.remote_path().to_string_lossy().to_string();
        repo.git(&["remote", "add", "origin", &remote_path])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn remote_path(&self) -> &Path {
        self.remote.path()
    }

    /// Write `contents` at `rel`, creating parent directories.
    pub fn write_file(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Run git in the working repository and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        run_git(self.path(), args)
    }

    pub fn current_branch(&self) -> Result<String> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn remote_has_branch(&self, branch: &str) -> Result<bool> {
        let refname = format!("refs/heads/{branch}");
        let out = run_git(self.remote_path(), &["for-each-ref", &refname])?;
        Ok(!out.is_empty())
    }

    /// Upstream tracking ref of a local branch, e.g. `origin/updates`.
    pub fn upstream_of(&self, branch: &str) -> Result<Option<String>> {
        let spec = format!("{branch}@{{upstream}}");
        let output = Command::new("git")
            .args(["rev-parse", "--abbrev-ref", &spec])
            .current_dir(self.path())
            .output()
            .context("spawn git rev-parse")?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    }

    /// Commit subjects on the remote's copy of `branch`, newest first.
    pub fn remote_subjects(&self, branch: &str) -> Result<Vec<String>> {
        let out = run_git(self.remote_path(), &["log", "--format=%s", branch])?;
        Ok(out.lines().map(str::to_string).collect())
    }
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Observable state of a [`FakeVcs`].
#[derive(Debug, Clone, Default)]
pub struct FakeRepoState {
    /// `None` means the branch cannot be read.
    pub current: Option<String>,
    pub branches: Vec<String>,
    pub dirty: bool,
    /// `(branch, message)` per commit, oldest first.
    pub commits: Vec<(String, String)>,
    /// `"<branch>"` or `"<branch> --set-upstream"` per successful push.
    pub pushed: Vec<String>,
    /// Mutating calls in order, e.g. `"checkout updates"`.
    pub calls: Vec<String>,
    pub fail_checkout: bool,
    pub fail_commit: bool,
    pub fail_push: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PushGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl PushGate {
    /// Wait until a push is parked at the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let the parked push continue.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// In-memory [`VersionControl`] with scriptable failures.
#[derive(Debug, Default)]
pub struct FakeVcs {
    state: Mutex<FakeRepoState>,
    push_gate: Mutex<Option<PushGate>>,
}

impl FakeVcs {
    pub fn on_branch(name: &str) -> Self {
        Self {
            state: Mutex::new(FakeRepoState {
                current: Some(name.to_string()),
                branches: vec![name.to_string()],
                ..FakeRepoState::default()
            }),
            push_gate: Mutex::new(None),
        }
    }

    pub fn with_branches(self, branches: &[&str]) -> Self {
        self.update(|state| state.branches = branches.iter().map(|b| b.to_string()).collect());
        self
    }

    /// Mark the tree as having uncommitted changes.
    pub fn dirty(self) -> Self {
        self.update(|state| state.dirty = true);
        self
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeRepoState)) {
        f(&mut self.lock());
    }

    pub fn snapshot(&self) -> FakeRepoState {
        self.lock().clone()
    }

    /// Park every subsequent push until the returned gate is released.
    pub fn hold_pushes(&self) -> PushGate {
        let gate = PushGate::default();
        *self
            .push_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(gate.clone());
        gate
    }

    fn lock(&self) -> MutexGuard<'_, FakeRepoState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn current_branch(&self) -> Result<String> {
        self.lock()
            .current
            .clone()
            .ok_or_else(|| anyhow!("detached HEAD"))
    }

    async fn branches(&self) -> Result<Vec<String>> {
        Ok(self.lock().branches.clone())
    }

    async fn checkout(&self, branch: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("checkout {branch}"));
        if state.fail_checkout {
            bail!("checkout refused");
        }
        if !state.branches.iter().any(|b| b == branch) {
            bail!("pathspec '{branch}' did not match");
        }
        state.current = Some(branch.to_string());
        Ok(())
    }

    async fn checkout_new(&self, branch: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("checkout_new {branch}"));
        if state.fail_checkout {
            bail!("checkout refused");
        }
        if state.branches.iter().any(|b| b == branch) {
            bail!("a branch named '{branch}' already exists");
        }
        state.branches.push(branch.to_string());
        state.current = Some(branch.to_string());
        Ok(())
    }

    async fn stage_and_commit(&self, message: &str) -> Result<CommitOutcome> {
        let mut state = self.lock();
        state.calls.push("commit".to_string());
        if state.fail_commit {
            bail!("pre-commit hook failed");
        }
        if !state.dirty {
            return Ok(CommitOutcome::NothingToCommit);
        }
        state.dirty = false;
        let branch = state.current.clone().unwrap_or_default();
        state.commits.push((branch, message.to_string()));
        Ok(CommitOutcome::Committed)
    }

    async fn push(&self, branch: &str, set_upstream: bool) -> Result<()> {
        let gate = self
            .push_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let mut state = self.lock();
        state.calls.push(format!("push {branch}"));
        if state.fail_push {
            bail!("could not resolve host");
        }
        state.pushed.push(if set_upstream {
            format!("{branch} --set-upstream")
        } else {
            branch.to_string()
        });
        Ok(())
    }
}

/// [`ReviewLookup`] returning a fixed answer and counting calls.
#[derive(Debug, Default)]
pub struct StaticReviewLookup {
    link: Option<String>,
    fail: bool,
    calls: AtomicUsize,
}

impl StaticReviewLookup {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn link(url: &str) -> Self {
        Self {
            link: Some(url.to_string()),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReviewLookup for StaticReviewLookup {
    async fn find_open_review(&self, _branch: &str) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("gh: not logged in");
        }
        Ok(self.link.clone())
    }
}
