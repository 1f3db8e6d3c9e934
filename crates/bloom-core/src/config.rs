//! Layered YAML configuration (A1): a global `$BLOOM_HOME/config.yaml`
//! plus a per-workspace `bloom.config.yaml`.
//!
//! Grounded on `at-core/config.rs`'s `#[serde(default)]`-sectioned struct
//! pattern, re-based on `serde_yaml` per SPEC_FULL.md §6.1.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::CliType;

// ---------------------------------------------------------------------------
// Global config — $BLOOM_HOME/config.yaml
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitProtocol {
    Ssh,
    Https,
}

impl Default for GitProtocol {
    fn default() -> Self {
        GitProtocol::Ssh
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaults {
    #[serde(default = "default_true")]
    pub default_interactive: bool,
    #[serde(default)]
    pub default_non_interactive: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            default_interactive: default_true(),
            default_non_interactive: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentProfileConfig {
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub denied_tools: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxDefaults {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_deny_read_paths")]
    pub deny_read_paths: Vec<String>,
}

fn default_deny_read_paths() -> Vec<String> {
    vec!["~/.ssh".into(), "~/.aws".into(), "~/.gnupg".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub git_protocol: GitProtocol,
    #[serde(default)]
    pub agents: AgentDefaults,
    /// Per-known-agent overrides, keyed by provider name (see `CliType`).
    #[serde(default)]
    pub agent_profiles: HashMap<String, AgentProfileConfig>,
    #[serde(default)]
    pub sandbox: SandboxDefaults,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            git_protocol: GitProtocol::default(),
            agents: AgentDefaults::default(),
            agent_profiles: HashMap::new(),
            sandbox: SandboxDefaults::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

impl GlobalConfig {
    /// Canonical path: `$BLOOM_HOME/config.yaml`, `$BLOOM_HOME` defaulting
    /// to `~/.bloom`.
    pub fn default_path() -> PathBuf {
        let home = std::env::var("BLOOM_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".bloom")
            });
        home.join("config.yaml")
    }

    /// Load from the canonical path, falling back to defaults if absent.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: GlobalConfig =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(opencode) = self.agent_profiles.get(CliType::OpenCode.as_str()) {
            if opencode.default_model.is_none() {
                return Err(ConfigError::MissingOpenCodeDefaultModel);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Workspace config — <workspace>/bloom.config.yaml
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub remote: String,
    #[serde(default = "default_branch_name")]
    pub default_branch: String,
    #[serde(default)]
    pub push_to_remote: bool,
    #[serde(default)]
    pub auto_cleanup_merged: bool,
}

fn default_branch_name() -> String {
    "main".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
    #[serde(default)]
    pub repos_dir: Option<String>,
    #[serde(default)]
    pub auto_detect: bool,
    /// Agent names this workspace schedules, each with its own work loop.
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    15
}

impl WorkspaceConfig {
    pub fn path_for(workspace_dir: impl AsRef<Path>) -> PathBuf {
        workspace_dir.as_ref().join("bloom.config.yaml")
    }

    pub fn load(workspace_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = Self::path_for(&workspace_dir);
        if !path.exists() {
            return Err(ConfigError::WorkspaceConfigMissing(path));
        }
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Like [`load`](Self::load), but a missing `bloom.config.yaml` is only
    /// an error if `auto_detect` is `false`. `auto_detect` has to be a
    /// parameter here (passed through from the CLI's `--auto-detect` flag)
    /// rather than a field read out of the file: a file that doesn't exist
    /// has no fields to read (see DESIGN.md's Open Question decisions).
    /// When set and the file is missing, repos are discovered by scanning
    /// `<workspace>/repos/*/*.git` bare repos.
    pub fn load_or_discover(
        workspace_dir: impl AsRef<Path>,
        auto_detect: bool,
    ) -> Result<Self, ConfigError> {
        let workspace_dir = workspace_dir.as_ref();
        let path = Self::path_for(workspace_dir);
        if path.exists() {
            return Self::load(workspace_dir);
        }
        if !auto_detect {
            return Err(ConfigError::WorkspaceConfigMissing(path));
        }
        Ok(WorkspaceConfig {
            repos: discover_repos(workspace_dir)?,
            repos_dir: None,
            auto_detect: true,
            agents: Vec::new(),
            poll_interval_secs: default_poll_interval_secs(),
        })
    }

    /// Directory holding `repos/<name>/...`, defaulting to
    /// `<workspace>/repos`.
    pub fn repos_dir(&self, workspace_dir: impl AsRef<Path>) -> PathBuf {
        match &self.repos_dir {
            Some(dir) => PathBuf::from(dir),
            None => workspace_dir.as_ref().join("repos"),
        }
    }
}

/// Scan `<workspace>/repos/<name>/<name>.git` bare repos and synthesize a
/// [`RepoConfig`] per directory found, reading the remote URL straight out
/// of the bare repo's `config` file (no shelling out to `git` — this crate
/// has no subprocess dependency; `bloom-git` owns that).
fn discover_repos(workspace_dir: &Path) -> Result<Vec<RepoConfig>, ConfigError> {
    let repos_dir = workspace_dir.join("repos");
    if !repos_dir.exists() {
        return Ok(Vec::new());
    }

    let mut repos = Vec::new();
    let entries = std::fs::read_dir(&repos_dir).map_err(|source| ConfigError::Io {
        path: repos_dir.clone(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::Io {
            path: repos_dir.clone(),
            source,
        })?;
        let dir_name = entry.file_name();
        let Some(name) = dir_name.to_str() else { continue };
        let bare = entry.path().join(format!("{name}.git"));
        if !bare.is_dir() {
            continue;
        }
        let remote = read_origin_url(&bare).unwrap_or_default();
        repos.push(RepoConfig {
            name: name.to_string(),
            remote,
            default_branch: default_branch_name(),
            push_to_remote: false,
            auto_cleanup_merged: false,
        });
    }
    repos.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(repos)
}

/// Pull `url = ...` out of the `[remote "origin"]` section of a bare
/// repo's `config` file. Deliberately line-oriented rather than a full INI
/// parser — git's config format is simple enough that this is reliable for
/// the one value we need, and keeps this crate free of a git-config crate.
fn read_origin_url(bare_repo: &Path) -> Option<String> {
    let text = std::fs::read_to_string(bare_repo.join("config")).ok()?;
    let mut in_origin = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            in_origin = trimmed == "[remote \"origin\"]";
            continue;
        }
        if in_origin {
            if let Some(url) = trimmed.strip_prefix("url = ").or_else(|| trimmed.strip_prefix("url=")) {
                return Some(url.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_config_defaults_without_file() {
        let cfg = GlobalConfig::default();
        assert_eq!(cfg.git_protocol, GitProtocol::Ssh);
        assert_eq!(cfg.agents.timeout_secs, 600);
    }

    #[test]
    fn opencode_requires_default_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "agentProfiles:\n  opencode:\n    models: [\"gpt\"]\n",
        )
        .unwrap();
        let err = GlobalConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingOpenCodeDefaultModel));
    }

    #[test]
    fn workspace_config_missing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = WorkspaceConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::WorkspaceConfigMissing(_)));
    }

    #[test]
    fn workspace_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = WorkspaceConfig::path_for(dir.path());
        std::fs::write(
            &path,
            "repos:\n  - name: r\n    remote: git@example.com:r.git\n\
             agents: [frontend, backend]\n",
        )
        .unwrap();
        let cfg = WorkspaceConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.repos.len(), 1);
        assert_eq!(cfg.agents, vec!["frontend", "backend"]);
        assert_eq!(cfg.repos_dir(dir.path()), dir.path().join("repos"));
    }

    #[test]
    fn load_or_discover_without_auto_detect_still_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = WorkspaceConfig::load_or_discover(dir.path(), false).unwrap_err();
        assert!(matches!(err, ConfigError::WorkspaceConfigMissing(_)));
    }

    #[test]
    fn load_or_discover_finds_bare_repos_when_auto_detect_set() {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("repos").join("widgets").join("widgets.git");
        std::fs::create_dir_all(&bare).unwrap();
        std::fs::write(
            bare.join("config"),
            "[core]\n\tbare = true\n[remote \"origin\"]\n\turl = git@example.com:acme/widgets.git\n",
        )
        .unwrap();

        let cfg = WorkspaceConfig::load_or_discover(dir.path(), true).unwrap();
        assert!(cfg.auto_detect);
        assert_eq!(cfg.repos.len(), 1);
        assert_eq!(cfg.repos[0].name, "widgets");
        assert_eq!(cfg.repos[0].remote, "git@example.com:acme/widgets.git");
    }

    #[test]
    fn load_or_discover_prefers_existing_file_over_scanning() {
        let dir = tempfile::tempdir().unwrap();
        let path = WorkspaceConfig::path_for(dir.path());
        std::fs::write(&path, "repos: []\nagents: [frontend]\n").unwrap();

        let cfg = WorkspaceConfig::load_or_discover(dir.path(), true).unwrap();
        assert_eq!(cfg.agents, vec!["frontend"]);
    }
}
