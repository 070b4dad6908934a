//! Panel configuration stored in `panel.toml` at the workspace root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// File name of the panel configuration, relative to the workspace root.
pub const CONFIG_FILE_NAME: &str = "panel.toml";

/// Panel configuration (TOML).
///
/// Edited by humans; every field has a default so a missing or partial file
/// still yields a usable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PanelConfig {
    pub worker: WorkerConfig,
    pub vcs: VcsConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker argv (e.g. `["reSsg","serve"]`).
    pub command: Vec<String>,
    /// File name that marks the site directory the worker runs in.
    pub site_config: String,
    /// How deep discovery descends below the workspace root.
    pub discovery_max_depth: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: vec!["reSsg".to_string(), "serve".to_string()],
            site_config: "config.toml".to_string(),
            discovery_max_depth: 4,
        }
    }
}

/// Which review service backs the review link.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewProvider {
    #[default]
    None,
    /// GitHub pull requests through the `gh` CLI.
    Gh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VcsConfig {
    /// The single branch every save accumulates onto.
    pub target_branch: String,
    pub remote: String,
    pub review: ReviewProvider,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            target_branch: "updates".to_string(),
            remote: "origin".to_string(),
            review: ReviewProvider::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UiConfig {
    /// How often the view asks for a status snapshot.
    pub poll_interval_ms: u64,
    /// How long a save indicator stays visible before it clears itself.
    pub indicator_clear_ms: u64,
    pub min_commit_message_len: usize,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            indicator_clear_ms: 1000,
            min_commit_message_len: 10,
        }
    }
}

impl UiConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn indicator_clear(&self) -> Duration {
        Duration::from_millis(self.indicator_clear_ms)
    }
}

impl PanelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker.command.is_empty() || self.worker.command[0].trim().is_empty() {
            return Err(anyhow!("worker.command must be a non-empty array"));
        }
        if self.worker.site_config.trim().is_empty() {
            return Err(anyhow!("worker.site_config must not be empty"));
        }
        if self.vcs.target_branch.trim().is_empty() {
            return Err(anyhow!("vcs.target_branch must not be empty"));
        }
        if self.vcs.remote.trim().is_empty() {
            return Err(anyhow!("vcs.remote must not be empty"));
        }
        if self.ui.poll_interval_ms == 0 {
            return Err(anyhow!("ui.poll_interval_ms must be > 0"));
        }
        if self.ui.indicator_clear_ms == 0 {
            return Err(anyhow!("ui.indicator_clear_ms must be > 0"));
        }
        Ok(())
    }
}

/// Path of the panel configuration inside `workspace`.
pub fn config_path(workspace: &Path) -> PathBuf {
    workspace.join(CONFIG_FILE_NAME)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PanelConfig::default()`.
pub fn load_config(path: &Path) -> Result<PanelConfig> {
    if !path.exists() {
        let cfg = PanelConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PanelConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PanelConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
