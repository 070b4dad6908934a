//! Review-service lookup: "given a branch, is there an open review for it?"

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Resolves the link of an open review (pull request) for a branch.
#[async_trait]
pub trait ReviewLookup: Send + Sync {
    async fn find_open_review(&self, branch: &str) -> Result<Option<String>>;
}

/// Used when no review service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReviewLookup;

#[async_trait]
impl ReviewLookup for NoReviewLookup {
    async fn find_open_review(&self, _branch: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// GitHub pull requests via `gh pr list`.
#[derive(Debug, Clone)]
pub struct GhReviewLookup {
    workdir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct GhPullRequest {
    url: String,
}

impl GhReviewLookup {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl ReviewLookup for GhReviewLookup {
    #[instrument(skip_all, fields(branch))]
    async fn find_open_review(&self, branch: &str) -> Result<Option<String>> {
        let output = Command::new("gh")
            .args([
                "pr", "list", "--head", branch, "--state", "open", "--json", "url", "--limit",
                "1",
            ])
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .output()
            .await
            .context("spawn gh pr list")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("gh pr list failed: {}", first_line(&stderr)));
        }
        let link = parse_pr_list(&String::from_utf8_lossy(&output.stdout))?;
        debug!(branch, found = link.is_some(), "review lookup finished");
        Ok(link)
    }
}

fn parse_pr_list(stdout: &str) -> Result<Option<String>> {
    let prs: Vec<GhPullRequest> =
        serde_json::from_str(stdout.trim()).context("parse gh pr list output")?;
    Ok(prs
        .into_iter()
        .map(|pr| pr.url)
        .find(|url| !url.trim().is_empty()))
}

fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no output")
}
