//! The Git Pipeline (C5), Merge Lock (C6), and hosted PR client (A4).
//!
//! This crate owns every filesystem/subprocess interaction with `git` and
//! with hosted code-review platforms. It never reads or writes agent
//! subprocess state directly — the bridge to the Session Manager (C3) is
//! the narrow [`pipeline::AgentRunner`] trait so bloom-git never depends on
//! bloom-session.

pub mod error;
pub mod git_read_adapter;
pub mod git_runner;
pub mod merge_lock;
pub mod pipeline;
pub mod pr_client;
pub mod worktree;

pub use error::{GitPipelineError, GitReadError, MergeLockError, PrClientError};
pub use git_read_adapter::{default_read_adapter, GitReadAdapter, ShellGitReadAdapter};
pub use git_runner::{GitOutput, GitRunner, RealGitRunner};
pub use merge_lock::{acquire, release, wait_for_lock, AcquireOutcome, MergeLock};
pub use pipeline::{AgentRunner, GitPipeline};
pub use pr_client::{detect_host, CreatePrRequest, CreatePrResponse, HostedPlatform, PrClient};
pub use worktree::{ensure_worktree, remove_worktree, sanitize_branch_for_dir, WorktreeInfo};
