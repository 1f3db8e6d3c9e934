//! The post-task Git Pipeline (C5): uncommitted-change handling, push, PR,
//! merge (behind the Merge Lock), and cleanup — §4.5 of the design.
//!
//! `GitPipeline` is deliberately side-effect-generic over two seams:
//! [`AgentRunner`] (so commit-retry and conflict-resolution prompts go
//! through whatever session manager the caller wires up, without bloom-git
//! depending on bloom-session) and [`PrClient`] (GitHub vs. Forgejo,
//! dispatched by [`detect_host`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bloom_bus::{Event, EventBus};
use bloom_core::{save_tasks, update_status, Task, TaskGraph, TaskStatus};
use tracing::{info, warn};

use crate::error::GitPipelineError;
use crate::git_read_adapter::GitReadAdapter;
use crate::git_runner::GitRunner;
use crate::merge_lock::{self, AcquireOutcome};
use crate::pr_client::{detect_host, CreatePrRequest, HostedPlatform, PrClient};
use crate::worktree;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const MERGE_LOCK_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MERGE_LOCK_MAX_WAIT: Duration = Duration::from_secs(5 * 60);

/// The subset of the Session Manager (C3) the pipeline needs to resume an
/// agent mid-pipeline: once to ask it to commit, once to ask it to resolve
/// a merge conflict.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Resume `task`'s session with a prompt asking it to commit its
    /// outstanding changes. Returns once the agent's turn has ended;
    /// whether the tree is now clean is re-checked by the caller.
    async fn resume_for_commit(&self, task: &Task, attempt: u32) -> Result<(), String>;

    /// Resume `task`'s session with a conflict-resolution prompt pointing
    /// at `conflicted_files`. Returns once the agent's turn has ended; the
    /// caller re-attempts the merge to see whether it resolved cleanly.
    async fn resume_for_conflict(
        &self,
        task: &Task,
        conflicted_files: &[String],
        attempt: u32,
    ) -> Result<(), String>;
}

pub struct GitPipeline<'a> {
    pub git: &'a dyn GitRunner,
    pub git_read: &'a dyn GitReadAdapter,
    pub bus: &'a EventBus,
    pub agent_runner: &'a dyn AgentRunner,
    pub repos_dir: PathBuf,
    pub merge_locks_dir: PathBuf,
    pub remote_url: String,
    pub push_to_remote: bool,
    pub auto_cleanup_merged: bool,
    pub max_attempts: u32,
}

impl<'a> GitPipeline<'a> {
    /// Run the full post-task sequence (§4.5) for `task`, mutating and
    /// saving `graph` (via `tasks_path`) at each durable checkpoint.
    pub async fn run(
        &self,
        graph: &mut TaskGraph,
        tasks_path: &Path,
        task_id: &str,
        worktree_path: &Path,
    ) -> Result<(), GitPipelineError> {
        let max_attempts = if self.max_attempts == 0 {
            DEFAULT_MAX_ATTEMPTS
        } else {
            self.max_attempts
        };

        self.ensure_committed(graph, tasks_path, task_id, worktree_path, max_attempts)
            .await?;

        let (repo, branch) = {
            let task = find(graph, task_id)?;
            (task.repo.clone(), task.branch.clone())
        };

        if self.push_to_remote {
            self.push(&repo, &branch, worktree_path)?;
        }

        let open_pr = find(graph, task_id)?.open_pr;
        if open_pr {
            self.open_pr(graph, task_id).await?;
        }

        let merge_into = find(graph, task_id)?.merge_into.clone();
        if let Some(target_branch) = merge_into {
            self.merge(graph, tasks_path, task_id, &repo, &branch, &target_branch, max_attempts)
                .await?;
        }

        update_status(graph, task_id, TaskStatus::Done)?;
        save_tasks(tasks_path, graph)?;
        Ok(())
    }

    async fn ensure_committed(
        &self,
        graph: &mut TaskGraph,
        tasks_path: &Path,
        task_id: &str,
        worktree_path: &Path,
        max_attempts: u32,
    ) -> Result<(), GitPipelineError> {
        let dir = worktree_path.to_str().unwrap_or(".");
        for attempt in 1..=max_attempts {
            let dirty = self
                .git_read
                .status_porcelain(dir)
                .map(|lines| !lines.is_empty())
                .unwrap_or(false);
            if !dirty {
                return Ok(());
            }

            let (agent_name, repo) = {
                let task = find(graph, task_id)?;
                (task.agent_name.clone().unwrap_or_default(), task.repo.clone())
            };
            self.bus.publish(Event::GitUncommittedChanges { repo, task_id: task_id.to_string() });
            self.bus.publish(Event::CommitRetry { agent_name, task_id: task_id.to_string(), attempt });

            let task = find(graph, task_id)?.clone();
            self.agent_runner
                .resume_for_commit(&task, attempt)
                .await
                .map_err(GitPipelineError::GitCommand)?;
        }

        let still_dirty = self
            .git_read
            .status_porcelain(dir)
            .map(|lines| !lines.is_empty())
            .unwrap_or(true);
        if still_dirty {
            update_status(graph, task_id, TaskStatus::Blocked)?;
            save_tasks(tasks_path, graph)?;
            return Err(GitPipelineError::StillDirty { attempts: max_attempts });
        }
        Ok(())
    }

    fn push(&self, repo: &str, branch: &str, worktree_path: &Path) -> Result<(), GitPipelineError> {
        let dir = worktree_path.to_str().unwrap_or(".");
        self.bus.publish(Event::GitPushing { repo: repo.to_string(), branch: branch.to_string() });

        let result = self.git.run_git(dir, &["push", "--set-upstream", "origin", branch]);
        let needs_retry = matches!(&result, Ok(o) if !o.success && o.stderr.contains("non-fast-forward"));

        let result = if needs_retry {
            warn!(repo, branch, "push rejected as non-fast-forward, fetching and retrying once");
            let _ = self.git.run_git(dir, &["fetch", "origin", branch]);
            self.git.run_git(dir, &["push", "--set-upstream", "origin", branch])
        } else {
            result
        };

        match result {
            Ok(output) if output.success => {
                self.bus.publish(Event::GitPushed { repo: repo.to_string(), branch: branch.to_string() });
                Ok(())
            }
            Ok(output) => Err(GitPipelineError::GitCommand(output.stderr)),
            Err(e) => Err(GitPipelineError::GitCommand(e)),
        }
    }

    async fn open_pr(&self, graph: &mut TaskGraph, task_id: &str) -> Result<(), GitPipelineError> {
        let task = find(graph, task_id)?.clone();
        self.bus.publish(Event::GitPrCreating { repo: task.repo.clone(), task_id: task_id.to_string() });

        let (owner, repo_name) = crate::pr_client::parse_owner_repo(&self.remote_url)?;
        let base_branch = task.merge_into.clone().unwrap_or_else(|| "main".to_string());
        let body = derive_pr_body(&task);

        let request = CreatePrRequest {
            title: task.title.clone(),
            body,
            base_branch,
            head_branch: task.branch.clone(),
        };

        let response = match detect_host(&self.remote_url) {
            HostedPlatform::GitHub => {
                crate::pr_client::GitHubPrClient::new(owner, repo_name)?
                    .create_pull_request(&request)
                    .await?
            }
            HostedPlatform::Forgejo => {
                let base_url = forgejo_base_url(&self.remote_url);
                crate::pr_client::ForgejoPrClient::new(base_url, owner, repo_name)?
                    .create_pull_request(&request)
                    .await?
            }
        };

        self.bus.publish(Event::GitPrCreated {
            repo: task.repo.clone(),
            task_id: task_id.to_string(),
            url: response.url.unwrap_or_default(),
            already_existed: response.already_existed,
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn merge(
        &self,
        graph: &mut TaskGraph,
        tasks_path: &Path,
        task_id: &str,
        repo: &str,
        source_branch: &str,
        target_branch: &str,
        max_attempts: u32,
    ) -> Result<(), GitPipelineError> {
        update_status(graph, task_id, TaskStatus::DonePendingMerge)?;
        save_tasks(tasks_path, graph)?;

        let agent_name = find(graph, task_id)?.agent_name.clone().unwrap_or_default();

        self.bus.publish(Event::MergeLockWaiting {
            repo: repo.to_string(),
            target_branch: target_branch.to_string(),
            holder_agent: None,
        });

        let bus = self.bus;
        let repo_owned = repo.to_string();
        let target_owned = target_branch.to_string();
        merge_lock::wait_for_lock(
            &self.merge_locks_dir,
            repo,
            target_branch,
            &agent_name,
            source_branch,
            MERGE_LOCK_POLL_INTERVAL,
            MERGE_LOCK_MAX_WAIT,
            |holder, elapsed| {
                bus.publish(Event::MergeLockWaiting {
                    repo: repo_owned.clone(),
                    target_branch: target_owned.clone(),
                    holder_agent: Some(holder.agent_name.clone()),
                });
                let _ = elapsed;
            },
        )
        .map_err(|e| match e {
            crate::error::MergeLockError::Timeout { repo, target_branch, .. } => {
                self.bus.publish(Event::MergeLockTimeout { repo: repo.clone(), target_branch: target_branch.clone() });
                GitPipelineError::MergeLock(crate::error::MergeLockError::Timeout {
                    repo,
                    target_branch,
                    waited_ms: MERGE_LOCK_MAX_WAIT.as_millis() as u64,
                })
            }
            other => GitPipelineError::MergeLock(other),
        })?;
        self.bus.publish(Event::MergeLockAcquired {
            repo: repo.to_string(),
            target_branch: target_branch.to_string(),
            agent_name: agent_name.clone(),
        });

        // Release the lock on every exit path from this point on.
        let result = self
            .merge_locked(graph, tasks_path, task_id, repo, source_branch, target_branch, max_attempts)
            .await;
        let _ = merge_lock::release(&self.merge_locks_dir, repo, target_branch);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn merge_locked(
        &self,
        graph: &mut TaskGraph,
        tasks_path: &Path,
        task_id: &str,
        repo: &str,
        source_branch: &str,
        target_branch: &str,
        max_attempts: u32,
    ) -> Result<(), GitPipelineError> {
        let (_info, created) =
            worktree::ensure_worktree(self.git, &self.repos_dir, repo, target_branch, target_branch)?;
        if created {
            self.bus.publish(Event::WorktreeCreated {
                repo: repo.to_string(),
                branch: target_branch.to_string(),
                path: worktree::worktree_path(&self.repos_dir, repo, target_branch)
                    .display()
                    .to_string(),
            });
        }
        let target_path = worktree::worktree_path(&self.repos_dir, repo, target_branch);
        let target_dir = target_path.to_str().unwrap_or(".");

        self.bus.publish(Event::GitMerging {
            repo: repo.to_string(),
            source: source_branch.to_string(),
            target: target_branch.to_string(),
        });

        for attempt in 1..=max_attempts {
            let commit_msg = {
                let task = find(graph, task_id)?;
                format!("Merge {source_branch}: {}", task.title)
            };
            let result = self
                .git
                .run_git(target_dir, &["merge", "--no-ff", "-m", &commit_msg, source_branch]);

            match result {
                Ok(output) if output.success => {
                    if attempt > 1 {
                        self.bus.publish(Event::MergeConflictResolved {
                            repo: repo.to_string(),
                            task_id: task_id.to_string(),
                            success: true,
                        });
                    }
                    self.bus.publish(Event::GitMerged {
                        repo: repo.to_string(),
                        source: source_branch.to_string(),
                        target: target_branch.to_string(),
                    });
                    if self.push_to_remote {
                        self.push(repo, target_branch, &target_path)?;
                    }
                    self.cleanup(repo, source_branch, task_id, graph)?;
                    return Ok(());
                }
                _ => {
                    let conflicts = self.git_read.conflict_files(target_dir).unwrap_or_default();
                    let _ = self.git.run_git(target_dir, &["merge", "--abort"]);
                    self.bus.publish(Event::GitMergeConflict {
                        repo: repo.to_string(),
                        task_id: task_id.to_string(),
                        files: conflicts.clone(),
                    });
                    self.bus.publish(Event::MergeConflictResolving {
                        repo: repo.to_string(),
                        task_id: task_id.to_string(),
                        attempt,
                    });

                    let task = find(graph, task_id)?.clone();
                    self.agent_runner
                        .resume_for_conflict(&task, &conflicts, attempt)
                        .await
                        .map_err(GitPipelineError::GitCommand)?;
                }
            }
        }

        self.bus.publish(Event::MergeConflictResolved {
            repo: repo.to_string(),
            task_id: task_id.to_string(),
            success: false,
        });
        update_status(graph, task_id, TaskStatus::Blocked)?;
        save_tasks(tasks_path, graph)?;
        Err(GitPipelineError::UnresolvedConflict { attempts: max_attempts })
    }

    fn cleanup(
        &self,
        repo: &str,
        source_branch: &str,
        task_id: &str,
        graph: &mut TaskGraph,
    ) -> Result<(), GitPipelineError> {
        if !self.auto_cleanup_merged {
            return Ok(());
        }
        let info = worktree::WorktreeInfo {
            repo: repo.to_string(),
            branch: source_branch.to_string(),
            base_branch: String::new(),
            path: worktree::worktree_path(&self.repos_dir, repo, source_branch),
        };

        let local_ok = worktree::remove_worktree(self.git, &self.repos_dir, &info, true).is_ok();
        let remote_ok = if self.push_to_remote {
            let bare = worktree::bare_repo_path(&self.repos_dir, repo);
            let bare_str = bare.to_str().unwrap_or(".");
            self.git
                .run_git(bare_str, &["push", "origin", "--delete", source_branch])
                .map(|o| o.success)
                .unwrap_or(false)
        } else {
            true
        };

        self.bus.publish(Event::GitCleanup {
            repo: repo.to_string(),
            task_id: task_id.to_string(),
            worktree_removed: local_ok,
            branch_deleted: remote_ok,
        });
        let _ = graph;
        Ok(())
    }
}

fn find<'g>(graph: &'g TaskGraph, task_id: &str) -> Result<&'g Task, GitPipelineError> {
    graph
        .tasks
        .iter()
        .flat_map(|t| t.flatten())
        .find(|t| t.id == task_id)
        .ok_or_else(|| GitPipelineError::GitCommand(format!("task `{task_id}` not found")))
}

fn derive_pr_body(task: &Task) -> String {
    let mut body = String::new();
    if let Some(instructions) = &task.instructions {
        body.push_str("## Summary\n\n");
        body.push_str(instructions);
        body.push('\n');
    }
    if !task.acceptance_criteria.is_empty() {
        body.push_str("\n## Acceptance Criteria\n\n");
        for criterion in &task.acceptance_criteria {
            body.push_str(&format!("- {criterion}\n"));
        }
    }
    body
}

fn forgejo_base_url(remote_url: &str) -> String {
    if let Some(rest) = remote_url.strip_prefix("git@") {
        if let Some((host, _)) = rest.split_once(':') {
            return format!("https://{host}");
        }
    }
    if let Some((scheme_host, _)) = remote_url.split_once("://").and_then(|(scheme, rest)| {
        rest.split_once('/').map(|(host, path)| (format!("{scheme}://{host}"), path))
    }) {
        return scheme_host;
    }
    remote_url.to_string()
}
