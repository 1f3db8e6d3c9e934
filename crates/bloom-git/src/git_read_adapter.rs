//! Read-only git operations used by the pipeline's status/diff/conflict
//! checks. Intentionally narrow — write paths stay on [`crate::git_runner::GitRunner`].
//!
//! The teacher's `at-core/git_read_adapter.rs` also ships a `libgit2`
//! feature-gated `Git2ReadAdapter`; this workspace carries no `git2`
//! dependency, so only the shell-based variant is grounded here (see
//! DESIGN.md).

use crate::error::GitReadError;

pub trait GitReadAdapter: Send + Sync {
    fn current_branch(&self, repo_dir: &str) -> Result<String, GitReadError>;
    fn status_porcelain(&self, repo_dir: &str) -> Result<Vec<String>, GitReadError>;
    fn diff_stat(&self, repo_dir: &str, base: &str, head: &str) -> Result<String, GitReadError>;
    fn conflict_files(&self, repo_dir: &str) -> Result<Vec<String>, GitReadError>;
}

pub struct ShellGitReadAdapter;

impl ShellGitReadAdapter {
    fn run_git(repo_dir: &str, args: &[&str]) -> Result<String, GitReadError> {
        let output = std::process::Command::new("git")
            .current_dir(repo_dir)
            .args(args)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8(output.stderr)
                .unwrap_or_else(|_| "git returned non-utf8 stderr".to_string());
            return Err(GitReadError::Command(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8(output.stdout)?;
        Ok(stdout.trim().to_string())
    }
}

impl GitReadAdapter for ShellGitReadAdapter {
    fn current_branch(&self, repo_dir: &str) -> Result<String, GitReadError> {
        Self::run_git(repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn status_porcelain(&self, repo_dir: &str) -> Result<Vec<String>, GitReadError> {
        let out = Self::run_git(repo_dir, &["status", "--porcelain"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToOwned::to_owned)
            .collect())
    }

    fn diff_stat(&self, repo_dir: &str, base: &str, head: &str) -> Result<String, GitReadError> {
        Self::run_git(repo_dir, &["diff", "--stat", base, head])
    }

    fn conflict_files(&self, repo_dir: &str) -> Result<Vec<String>, GitReadError> {
        let out = Self::run_git(repo_dir, &["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToOwned::to_owned)
            .collect())
    }
}

pub fn default_read_adapter() -> Box<dyn GitReadAdapter> {
    Box::new(ShellGitReadAdapter)
}
