//! The Scheduler / Work Loop (C2): one long-lived polling activity per
//! agent name, tying the Task Store (C1), Session Manager (C3), Sandbox
//! Manager (C4, via C3), Git Pipeline (C5/C6), Question/Interjection Queue
//! (C7), and Event Bus (C8) together per §4.2.
//!
//! Grounded on `at-daemon/scheduler.rs`'s pick-then-assign shape
//! (reauthored against a YAML `tasks.yaml` instead of a Dolt-backed bead
//! board — this crate never touches a database) and on the suspension
//! points required by §5: the poll sleep and the blocking session call
//! both race the shutdown signal so cancellation is observed within ≤ 1 s.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bloom_bus::{Event, EventBus};
use bloom_core::config::RepoConfig;
use bloom_core::{
    load_tasks, next_task_for, save_tasks, update_status, CliType, Task, TaskGraph, TaskStatus,
};
use bloom_git::{default_read_adapter, ensure_worktree, GitPipeline, GitRunner, RealGitRunner};
use bloom_queue::interjections;
use bloom_session::{SessionError, SessionManager, StreamEvent};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::agent_runner::SchedulerAgentRunner;
use crate::error::SchedulerError;

const PULL_RATE_LIMIT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct WorkLoopConfig {
    pub agent_name: String,
    pub workspace_dir: PathBuf,
    pub repos_dir: PathBuf,
    pub repo_configs: Vec<RepoConfig>,
    pub poll_interval: Duration,
    pub cli_type: CliType,
    pub max_attempts: u32,
    pub push_to_remote: bool,
    pub auto_cleanup_merged: bool,
}

impl WorkLoopConfig {
    pub fn tasks_path(&self) -> PathBuf {
        self.workspace_dir.join("tasks.yaml")
    }

    pub fn merge_locks_dir(&self) -> PathBuf {
        self.workspace_dir.join(".merge-locks")
    }

    pub fn interjections_dir(&self) -> PathBuf {
        interjections::interjections_dir(&self.workspace_dir)
    }

    fn repo_config(&self, repo: &str) -> Option<&RepoConfig> {
        self.repo_configs.iter().find(|r| r.name == repo)
    }

    fn default_branch_for(&self, repo: &str) -> String {
        self.repo_config(repo)
            .map(|r| r.default_branch.clone())
            .unwrap_or_else(|| "main".to_string())
    }

    fn remote_for(&self, repo: &str) -> String {
        self.repo_config(repo).map(|r| r.remote.clone()).unwrap_or_default()
    }
}

/// Run the per-agent work loop until `shutdown` reports true. Returns `Ok`
/// on a clean shutdown; a per-task error is logged and published as an
/// `Event::Error`, never propagated out of the loop (§7 propagation
/// policy — only config/platform errors abort the process).
pub async fn run_work_loop(
    config: WorkLoopConfig,
    bus: EventBus,
    session: Arc<SessionManager>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SchedulerError> {
    let mut first_iteration = true;
    let mut last_pulled: HashMap<String, Instant> = HashMap::new();

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let graph = match load_tasks(config.tasks_path()) {
            Ok(graph) => graph,
            Err(e) => {
                error!(agent = %config.agent_name, error = %e, "failed to load tasks.yaml, retrying next poll");
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }
        };

        if first_iteration {
            bus.publish(Event::AgentStarted { agent_name: config.agent_name.clone() });
            first_iteration = false;
        }

        pull_default_branches(&config, &graph, &bus, &mut last_pulled);

        let task_id = resume_in_progress(&graph, &config.agent_name)
            .or_else(|| next_task_for(&graph, &config.agent_name).map(|t| t.id.clone()));

        let Some(task_id) = task_id else {
            bus.publish(Event::AgentIdle { agent_name: config.agent_name.clone() });
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
            continue;
        };

        if let Err(e) = run_task(&config, &bus, &session, &task_id, &mut shutdown).await {
            error!(agent = %config.agent_name, task_id = %task_id, error = %e, "task iteration failed");
            bus.publish(Event::Error {
                agent_name: Some(config.agent_name.clone()),
                task_id: Some(task_id),
                message: e.to_string(),
            });
        }
    }
}

/// A task already `in_progress` for this agent from an earlier, interrupted
/// iteration (interjection, idle timeout, or process restart) takes
/// priority over picking new work — the work loop finishes what it started
/// before starting something else.
fn resume_in_progress(graph: &TaskGraph, agent_name: &str) -> Option<String> {
    graph
        .tasks
        .iter()
        .flat_map(|t| t.flatten())
        .find(|t| t.status == TaskStatus::InProgress && t.agent_name.as_deref() == Some(agent_name))
        .map(|t| t.id.clone())
}

async fn run_task(
    config: &WorkLoopConfig,
    bus: &EventBus,
    session: &Arc<SessionManager>,
    task_id: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), SchedulerError> {
    let tasks_path = config.tasks_path();

    {
        let mut graph = load_tasks(&tasks_path)?;
        let status = find(&graph, task_id)?.status;
        if status == TaskStatus::Todo || status == TaskStatus::ReadyForAgent {
            update_status(&mut graph, task_id, TaskStatus::Assigned)?;
            save_tasks(&tasks_path, &graph)?;
            bus.publish(Event::TaskFound { agent_name: config.agent_name.clone(), task_id: task_id.to_string() });

            update_status(&mut graph, task_id, TaskStatus::InProgress)?;
            save_tasks(&tasks_path, &graph)?;
            bus.publish(Event::TaskStarted { agent_name: config.agent_name.clone(), task_id: task_id.to_string() });
        }
    }

    let (repo, branch, base_branch) = {
        let graph = load_tasks(&tasks_path)?;
        let task = find(&graph, task_id)?;
        (task.repo.clone(), task.branch.clone(), task.base_branch.clone())
    };
    let base = base_branch.unwrap_or_else(|| config.default_branch_for(&repo));

    let git = RealGitRunner;
    let (wt_info, created) = ensure_worktree(&git, &config.repos_dir, &repo, &branch, &base)?;
    if created {
        bus.publish(Event::WorktreeCreating {
            repo: repo.clone(),
            branch: branch.clone(),
            path: wt_info.path.display().to_string(),
        });
        bus.publish(Event::WorktreeCreated {
            repo: repo.clone(),
            branch: branch.clone(),
            path: wt_info.path.display().to_string(),
        });
    }

    let mut failure_count = 0u32;
    let max_attempts = if config.max_attempts == 0 { 3 } else { config.max_attempts };

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let mut graph = load_tasks(&tasks_path)?;
        let task = find(&graph, task_id)?.clone();

        if task.status == TaskStatus::Blocked || task.status == TaskStatus::Done {
            return Ok(());
        }

        let is_implicit = task.steps.is_empty();
        let pending_step_id = task.next_pending_step().map(|s| s.id.clone());
        if !is_implicit && pending_step_id.is_none() {
            // All declared steps are done; the loop itself is responsible
            // for advancing the task status (no further CLI call does).
            if task.status != TaskStatus::Done {
                update_status(&mut graph, task_id, TaskStatus::Done)?;
                save_tasks(&tasks_path, &graph)?;
            }
            break;
        }

        let display_step_id = pending_step_id.clone().unwrap_or_else(|| format!("{task_id}.0"));
        bus.publish(Event::StepStarted {
            agent_name: config.agent_name.clone(),
            task_id: task_id.to_string(),
            step_id: display_step_id.clone(),
        });

        let interjections_dir = config.interjections_dir();
        let pending_interjection =
            interjections::next_unresumed(&interjections_dir, &config.agent_name, Some(task_id))?;
        let prompt = build_step_prompt(&task, pending_step_id.as_deref(), pending_interjection.as_ref().map(|i| i.message.as_str()));
        let resume_id = task.session_id.clone();

        let mut saw_session_error = false;
        let run_result = {
            let mut on_event = |event: StreamEvent| {
                if let StreamEvent::Error(msg) = event {
                    if resume_id.is_some() && msg.to_lowercase().contains("session") {
                        saw_session_error = true;
                    }
                }
            };
            tokio::select! {
                res = session.run(
                    &config.agent_name,
                    task_id,
                    &wt_info.path,
                    config.cli_type,
                    "",
                    &prompt,
                    resume_id.clone(),
                    on_event,
                ) => res,
                _ = shutdown.changed() => {
                    let _ = session.interject(&config.agent_name, "orchestrator shutting down");
                    return Ok(());
                }
            }
        };

        if let Some(interjection) = &pending_interjection {
            let _ = interjections::mark_resumed(&interjections_dir, &interjection.id);
        }

        let outcome = match run_result {
            Ok(outcome) => outcome,
            Err(SessionError::AgentBusy(name)) => {
                return Err(SchedulerError::AgentBusy(name));
            }
            Err(e) => {
                failure_count += 1;
                warn!(agent = %config.agent_name, task_id, attempt = failure_count, error = %e, "step failed");
                bus.publish(Event::StepFailed {
                    agent_name: config.agent_name.clone(),
                    task_id: task_id.to_string(),
                    step_id: display_step_id,
                    error: e.to_string(),
                });
                if failure_count >= max_attempts {
                    update_status(&mut graph, task_id, TaskStatus::Blocked)?;
                    save_tasks(&tasks_path, &graph)?;
                    bus.publish(Event::TaskBlocked {
                        agent_name: config.agent_name.clone(),
                        task_id: task_id.to_string(),
                        reason: e.to_string(),
                    });
                    return Ok(());
                }
                continue;
            }
        };

        if saw_session_error {
            clear_session_id(&tasks_path, task_id)?;
            bus.publish(Event::SessionCorrupted {
                agent_name: config.agent_name.clone(),
                task_id: task_id.to_string(),
                bad_session_id: resume_id.unwrap_or_default(),
            });
            continue;
        }

        if let Some(sid) = &outcome.session_id {
            persist_session_id(&tasks_path, task_id, sid)?;
        }

        if outcome.reason != "exit" {
            // Interjected or idle-timed-out: leave the task in progress and
            // let the next outer poll resume it (possibly with a freshly
            // recorded interjection folded into the prompt).
            return Ok(());
        }

        let graph_after = load_tasks(&tasks_path)?;
        let task_after = find(&graph_after, task_id)?.clone();
        let step_done = match &pending_step_id {
            Some(id) => task_after
                .steps
                .iter()
                .any(|s| &s.id == id && s.status == bloom_core::StepStatus::Done),
            None => task_after.status != TaskStatus::InProgress,
        };

        if !step_done {
            // The agent's turn ended without invoking `step done`/`done`;
            // retry the same step rather than spin silently.
            failure_count += 1;
            if failure_count >= max_attempts {
                let mut graph = load_tasks(&tasks_path)?;
                update_status(&mut graph, task_id, TaskStatus::Blocked)?;
                save_tasks(&tasks_path, &graph)?;
                bus.publish(Event::TaskBlocked {
                    agent_name: config.agent_name.clone(),
                    task_id: task_id.to_string(),
                    reason: "agent exited without completing the step".to_string(),
                });
                return Ok(());
            }
            continue;
        }
        failure_count = 0;

        bus.publish(Event::StepCompleted {
            agent_name: config.agent_name.clone(),
            task_id: task_id.to_string(),
            step_id: pending_step_id.unwrap_or_else(|| format!("{task_id}.0")),
        });

        if task_after.status == TaskStatus::Done || is_implicit {
            if task_after.status != TaskStatus::Done {
                let mut graph = load_tasks(&tasks_path)?;
                update_status(&mut graph, task_id, TaskStatus::Done)?;
                save_tasks(&tasks_path, &graph)?;
            }
            break;
        }
    }

    bus.publish(Event::StepsAllCompleted { agent_name: config.agent_name.clone(), task_id: task_id.to_string() });
    bus.publish(Event::TaskCompleted { agent_name: config.agent_name.clone(), task_id: task_id.to_string() });

    run_git_pipeline(config, bus, session, task_id, &wt_info.path).await
}

async fn run_git_pipeline(
    config: &WorkLoopConfig,
    bus: &EventBus,
    session: &Arc<SessionManager>,
    task_id: &str,
    worktree_path: &Path,
) -> Result<(), SchedulerError> {
    let tasks_path = config.tasks_path();
    let mut graph = load_tasks(&tasks_path)?;
    let repo = find(&graph, task_id)?.repo.clone();

    let agent_runner = SchedulerAgentRunner {
        session: Arc::clone(session),
        cli_type: config.cli_type,
        working_dir: worktree_path.to_path_buf(),
    };
    let git = RealGitRunner;
    let git_read = default_read_adapter();

    let pipeline = GitPipeline {
        git: &git,
        git_read: git_read.as_ref(),
        bus,
        agent_runner: &agent_runner,
        repos_dir: config.repos_dir.clone(),
        merge_locks_dir: config.merge_locks_dir(),
        remote_url: config.remote_for(&repo),
        push_to_remote: config.push_to_remote,
        auto_cleanup_merged: config.auto_cleanup_merged,
        max_attempts: config.max_attempts,
    };

    pipeline.run(&mut graph, &tasks_path, task_id, worktree_path).await?;
    Ok(())
}

/// Pull every repo referenced by the task graph, rate-limited per repo.
fn pull_default_branches(
    config: &WorkLoopConfig,
    graph: &TaskGraph,
    bus: &EventBus,
    last_pulled: &mut HashMap<String, Instant>,
) {
    let repos: std::collections::HashSet<String> =
        graph.tasks.iter().flat_map(|t| t.flatten()).map(|t| t.repo.clone()).collect();

    for repo in repos {
        let due = last_pulled
            .get(&repo)
            .map(|t| t.elapsed() >= PULL_RATE_LIMIT)
            .unwrap_or(true);
        if !due {
            continue;
        }
        last_pulled.insert(repo.clone(), Instant::now());

        let bare = bloom_git::worktree::bare_repo_path(&config.repos_dir, &repo);
        if !bare.exists() {
            continue;
        }
        let default_branch = config.default_branch_for(&repo);
        let bare_str = bare.to_str().unwrap_or(".");

        bus.publish(Event::GitPulling { repo: repo.clone() });
        let git = RealGitRunner;
        match git.run_git(bare_str, &["fetch", "origin", &default_branch]) {
            Ok(output) if output.success => {
                bus.publish(Event::GitPulled { repo: repo.clone(), branch: default_branch });
            }
            Ok(output) => {
                warn!(repo, stderr = %output.stderr, "fetch of default branch failed");
            }
            Err(e) => {
                warn!(repo, error = %e, "fetch of default branch failed");
            }
        }
    }
}

fn build_step_prompt(task: &Task, step_id: Option<&str>, interjection_note: Option<&str>) -> String {
    let mut prompt = String::new();
    if let Some(note) = interjection_note {
        prompt.push_str("A human has interjected with the following message — take it into \
                          account before continuing:\n\n");
        prompt.push_str(note);
        prompt.push_str("\n\n---\n\n");
    }

    match step_id {
        Some(id) => {
            if let Some(step) = task.steps.iter().find(|s| s.id == id) {
                prompt.push_str(&step.instruction);
                if !step.acceptance_criteria.is_empty() {
                    prompt.push_str("\n\nAcceptance criteria:\n");
                    for c in &step.acceptance_criteria {
                        prompt.push_str(&format!("- {c}\n"));
                    }
                }
            }
        }
        None => {
            if let Some(instructions) = &task.instructions {
                prompt.push_str(instructions);
            } else {
                prompt.push_str(&task.title);
            }
            if !task.acceptance_criteria.is_empty() {
                prompt.push_str("\n\nAcceptance criteria:\n");
                for c in &task.acceptance_criteria {
                    prompt.push_str(&format!("- {c}\n"));
                }
            }
        }
    }
    prompt
}

fn persist_session_id(tasks_path: &Path, task_id: &str, session_id: &str) -> Result<(), SchedulerError> {
    let mut graph = load_tasks(tasks_path)?;
    set_session_id(&mut graph, task_id, Some(session_id.to_string()))?;
    save_tasks(tasks_path, &graph)?;
    Ok(())
}

fn clear_session_id(tasks_path: &Path, task_id: &str) -> Result<(), SchedulerError> {
    let mut graph = load_tasks(tasks_path)?;
    set_session_id(&mut graph, task_id, None)?;
    save_tasks(tasks_path, &graph)?;
    Ok(())
}

fn set_session_id(graph: &mut TaskGraph, task_id: &str, session_id: Option<String>) -> Result<(), SchedulerError> {
    fn find_mut<'a>(tasks: &'a mut [Task], id: &str) -> Option<&'a mut Task> {
        for t in tasks {
            if t.id == id {
                return Some(t);
            }
            if let Some(found) = find_mut(&mut t.subtasks, id) {
                return Some(found);
            }
        }
        None
    }
    let task = find_mut(&mut graph.tasks, task_id).ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
    task.session_id = session_id;
    Ok(())
}

fn find<'g>(graph: &'g TaskGraph, task_id: &str) -> Result<&'g Task, SchedulerError> {
    graph
        .tasks
        .iter()
        .flat_map(|t| t.flatten())
        .find(|t| t.id == task_id)
        .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bloom_core::{Step, StepStatus};

    fn task_with_steps() -> Task {
        Task {
            id: "t".into(),
            title: "t".into(),
            status: TaskStatus::InProgress,
            phase: None,
            depends_on: vec![],
            repo: "r".into(),
            branch: "b".into(),
            base_branch: None,
            merge_into: None,
            open_pr: false,
            agent_name: None,
            checkpoint: false,
            instructions: Some("do the thing".into()),
            steps: vec![Step::new("t", 1, "write the code")],
            acceptance_criteria: vec!["tests pass".into()],
            ai_notes: vec![],
            subtasks: vec![],
            session_id: None,
            commit_retry_attempts: 0,
            merge_retry_attempts: 0,
        }
    }

    #[test]
    fn build_step_prompt_includes_step_instruction() {
        let task = task_with_steps();
        let prompt = build_step_prompt(&task, Some("t.1"), None);
        assert!(prompt.contains("write the code"));
    }

    #[test]
    fn build_step_prompt_folds_in_interjection() {
        let task = task_with_steps();
        let prompt = build_step_prompt(&task, Some("t.1"), Some("use tabs"));
        assert!(prompt.contains("use tabs"));
        assert!(prompt.find("use tabs").unwrap() < prompt.find("write the code").unwrap());
    }

    #[test]
    fn build_step_prompt_falls_back_to_instructions_for_implicit_task() {
        let mut task = task_with_steps();
        task.steps.clear();
        let prompt = build_step_prompt(&task, None, None);
        assert!(prompt.contains("do the thing"));
        assert!(prompt.contains("tests pass"));
    }

    #[test]
    fn resume_in_progress_prefers_own_unfinished_task() {
        let mut t = task_with_steps();
        t.agent_name = Some("frontend".into());
        t.steps[0].status = StepStatus::InProgress;
        let graph = TaskGraph { git: Default::default(), tasks: vec![t] };
        assert_eq!(resume_in_progress(&graph, "frontend").as_deref(), Some("t"));
        assert_eq!(resume_in_progress(&graph, "backend"), None);
    }
}
