use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GitPipelineError {
    #[error("git command failed: {0}")]
    GitCommand(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worktree already exists at {0}")]
    WorktreeAlreadyExists(PathBuf),
    #[error(transparent)]
    MergeLock(#[from] MergeLockError),
    #[error(transparent)]
    PrClient(#[from] PrClientError),
    #[error("uncommitted changes remain after {attempts} commit retries")]
    StillDirty { attempts: u32 },
    #[error("merge conflict unresolved after {attempts} attempts")]
    UnresolvedConflict { attempts: u32 },
    #[error(transparent)]
    TaskStore(#[from] bloom_core::TaskStoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum MergeLockError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse lock file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("timed out waiting for merge lock on {repo}/{target_branch} after {waited_ms}ms")]
    Timeout { repo: String, target_branch: String, waited_ms: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum PrClientError {
    #[error("GitHub API error: {0}")]
    GitHub(#[from] octocrab::Error),
    #[error("missing GITHUB_TOKEN environment variable")]
    MissingGitHubToken,
    #[error("Forgejo request failed: {0}")]
    Forgejo(#[from] reqwest::Error),
    #[error("Forgejo API returned {status}: {body}")]
    ForgejoApi { status: u16, body: String },
    #[error("could not determine owner/repo from remote url {0}")]
    UnparsableRemote(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GitReadError {
    #[error("git command failed: {0}")]
    Command(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("utf8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
