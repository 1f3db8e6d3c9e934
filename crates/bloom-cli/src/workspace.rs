//! Workspace root resolution for every `bloom` subcommand.
//!
//! Every command below is a local file mutation against the workspace's
//! `tasks.yaml`/`.queue`/`.interjections` state (see SPEC_FULL.md §4.12) —
//! there is no daemon to ask, so the CLI has to find the workspace root
//! itself the same way `git` finds a repo root: walk up from the current
//! directory looking for the marker file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

/// Resolve the workspace root: the explicit `--workspace` flag if given,
/// otherwise the nearest ancestor of the current directory that contains
/// `tasks.yaml`.
pub fn resolve(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }

    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let mut dir: &Path = &cwd;
    loop {
        if dir.join("tasks.yaml").is_file() {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => bail!(
                "no tasks.yaml found in {} or any parent directory (pass --workspace)",
                cwd.display()
            ),
        }
    }
}

pub fn tasks_path(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join("tasks.yaml")
}
