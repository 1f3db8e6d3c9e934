//! Worktree creation against a shared bare repo.
//!
//! Layout (see §6.1 of the workspace layout contract):
//! `<workspace>/repos/<repo>/<repo>.git` is the bare repo; worktrees live as
//! siblings at `<workspace>/repos/<repo>/<branch-sanitized>`. The git branch
//! itself always keeps its slashes — only the directory component is
//! sanitized.
//!
//! Grounded on `at-core/worktree_manager.rs::WorktreeManager::create_for_task`,
//! generalized from the teacher's single `task/<slug>` branch scheme to
//! Bloom's arbitrary `task.branch` + `task.base_branch` pair and lazy,
//! idempotent creation (a worktree already on disk is reused, not recreated).

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::GitPipelineError;
use crate::git_runner::GitRunner;

#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub repo: String,
    pub branch: String,
    pub base_branch: String,
    pub path: PathBuf,
}

/// Replace every `/` in `branch` with `-` for use as a directory component.
/// The branch name passed to git itself is never sanitized.
pub fn sanitize_branch_for_dir(branch: &str) -> String {
    branch.replace('/', "-")
}

pub fn bare_repo_path(repos_dir: &Path, repo: &str) -> PathBuf {
    repos_dir.join(repo).join(format!("{repo}.git"))
}

pub fn worktree_path(repos_dir: &Path, repo: &str, branch: &str) -> PathBuf {
    repos_dir.join(repo).join(sanitize_branch_for_dir(branch))
}

/// Ensure a worktree for `branch` exists under the repo's bare repo,
/// creating it off `base_branch` if necessary. Idempotent: if the worktree
/// directory already exists, it is reused as-is.
///
/// Returns `(info, created)` so the caller (the work loop) can decide
/// whether to emit `worktree:creating`/`worktree:created`.
pub fn ensure_worktree(
    git: &dyn GitRunner,
    repos_dir: &Path,
    repo: &str,
    branch: &str,
    base_branch: &str,
) -> Result<(WorktreeInfo, bool), GitPipelineError> {
    let bare = bare_repo_path(repos_dir, repo);
    let wt_path = worktree_path(repos_dir, repo, branch);

    let info = WorktreeInfo {
        repo: repo.to_string(),
        branch: branch.to_string(),
        base_branch: base_branch.to_string(),
        path: wt_path.clone(),
    };

    if wt_path.exists() {
        return Ok((info, false));
    }

    if let Some(parent) = wt_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let bare_str = bare.to_str().unwrap_or(".");
    let wt_path_str = wt_path.to_str().unwrap_or(".");

    info!(repo, branch, base_branch, path = %wt_path.display(), "creating worktree");

    // Branch may already exist on a prior run whose worktree was cleaned
    // up; try `-b` first, fall back to plain `add` if git rejects a
    // duplicate branch name.
    let result = git.run_git(
        bare_str,
        &["worktree", "add", "-b", branch, wt_path_str, base_branch],
    );

    match result {
        Ok(output) if output.success => Ok((info, true)),
        Ok(output) if output.stderr.contains("already exists") => {
            let retry = git.run_git(bare_str, &["worktree", "add", wt_path_str, branch]);
            match retry {
                Ok(o) if o.success => Ok((info, true)),
                Ok(o) => Err(GitPipelineError::GitCommand(o.stderr)),
                Err(e) => Err(GitPipelineError::GitCommand(e)),
            }
        }
        Ok(output) => Err(GitPipelineError::GitCommand(output.stderr)),
        Err(e) => Err(GitPipelineError::GitCommand(e)),
    }
}

/// Remove a worktree and, optionally, delete its branch. Used by the
/// cleanup step (§4.5.5) after a successful merge.
pub fn remove_worktree(
    git: &dyn GitRunner,
    repos_dir: &Path,
    info: &WorktreeInfo,
    delete_branch: bool,
) -> Result<(), GitPipelineError> {
    let bare = bare_repo_path(repos_dir, &info.repo);
    let bare_str = bare.to_str().unwrap_or(".");
    let path_str = info.path.to_str().unwrap_or(".");

    let result = git.run_git(bare_str, &["worktree", "remove", "--force", path_str]);
    match result {
        Ok(output) if !output.success => {
            return Err(GitPipelineError::GitCommand(output.stderr))
        }
        Err(e) => return Err(GitPipelineError::GitCommand(e)),
        _ => {}
    }

    if delete_branch {
        let result = git.run_git(bare_str, &["branch", "-D", &info.branch]);
        if let Ok(output) = result {
            if !output.success {
                return Err(GitPipelineError::GitCommand(output.stderr));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_slashes_for_directory_only() {
        assert_eq!(sanitize_branch_for_dir("feature/p/fe"), "feature-p-fe");
    }

    #[test]
    fn worktree_path_uses_sanitized_component() {
        let repos_dir = Path::new("/ws/repos");
        let p = worktree_path(repos_dir, "r", "feature/p/fe");
        assert_eq!(p, Path::new("/ws/repos/r/feature-p-fe"));
    }

    struct MockGit {
        calls: std::sync::Mutex<Vec<Vec<String>>>,
    }

    impl GitRunner for MockGit {
        fn run_git(
            &self,
            _dir: &str,
            args: &[&str],
        ) -> Result<crate::git_runner::GitOutput, String> {
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(|s| s.to_string()).collect());
            Ok(crate::git_runner::GitOutput {
                success: true,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn ensure_worktree_creates_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let git = MockGit {
            calls: std::sync::Mutex::new(vec![]),
        };
        let (info, created) =
            ensure_worktree(&git, tmp.path(), "r", "feature/x", "main").unwrap();
        assert!(created);
        assert_eq!(info.path, tmp.path().join("r").join("feature-x"));
        assert_eq!(git.calls.lock().unwrap().len(), 1);
    }
}
