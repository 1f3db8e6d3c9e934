//! Task Store (C1): load/save `tasks.yaml`, atomic status mutation, and
//! `next_task_for` selection.
//!
//! Grounded on the crash-safe write pattern in `DaemonLockfile::acquire`
//! (`.tmp` + fsync + rename) and the `can_transition_to` validation style
//! used throughout the teacher's status enums.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::TaskStoreError;
use crate::types::{Task, TaskStatus};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitSection {
    #[serde(default)]
    pub push_to_remote: bool,
    #[serde(default)]
    pub auto_cleanup_merged: bool,
}

/// The parsed contents of `tasks.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    #[serde(default)]
    pub git: GitSection,
    pub tasks: Vec<Task>,
}

/// `loadTasks(path)`: parse YAML, reject unknown top-level keys, and
/// validate id uniqueness + acyclic `depends_on` across the flattened set
/// (subtasks included).
pub fn load_tasks(path: impl AsRef<Path>) -> Result<TaskGraph, TaskStoreError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| TaskStoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    // `deny_unknown_fields` on a nested struct rejects unknown *task*
    // fields; unknown top-level keys are rejected the same way because
    // `TaskGraph` itself only declares `git` and `tasks`.
    let graph: TaskGraphStrict =
        serde_yaml::from_str(&text).map_err(|source| TaskStoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    let graph = TaskGraph {
        git: graph.git,
        tasks: graph.tasks,
    };

    validate(&graph.tasks)?;
    debug!(path = %path.display(), count = graph.tasks.len(), "tasks.yaml loaded");
    Ok(graph)
}

/// Strict mirror of `TaskGraph` used only for the initial parse so unknown
/// top-level keys are a hard error; the public API still returns the
/// permissive `TaskGraph` so call sites don't need to know about this.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskGraphStrict {
    #[serde(default)]
    git: GitSection,
    tasks: Vec<Task>,
}

fn validate(tasks: &[Task]) -> Result<(), TaskStoreError> {
    let flattened: Vec<&Task> = tasks.iter().flat_map(|t| t.flatten()).collect();

    let mut seen = HashSet::new();
    for t in &flattened {
        if !seen.insert(t.id.as_str()) {
            return Err(TaskStoreError::DuplicateId(t.id.clone()));
        }
    }

    for t in &flattened {
        for dep in &t.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(TaskStoreError::UnknownDependency(
                    t.id.clone(),
                    dep.clone(),
                ));
            }
        }
    }

    for t in &flattened {
        detect_cycle(&t.id, &flattened, &mut HashSet::new())?;
    }

    Ok(())
}

fn detect_cycle<'a>(
    start: &str,
    all: &[&'a Task],
    visiting: &mut HashSet<String>,
) -> Result<(), TaskStoreError> {
    if !visiting.insert(start.to_string()) {
        return Err(TaskStoreError::CyclicDependency(start.to_string()));
    }
    if let Some(task) = all.iter().find(|t| t.id == start) {
        for dep in &task.depends_on {
            detect_cycle(dep, all, visiting)?;
        }
    }
    visiting.remove(start);
    Ok(())
}

/// `saveTasks(path, tasks)`: crash-safe durable persist. Writes to
/// `<path>.tmp`, fsyncs, then renames over the original so the file on
/// disk always reflects either the pre- or post-update state, never a
/// partial write.
pub fn save_tasks(path: impl AsRef<Path>, graph: &TaskGraph) -> Result<(), TaskStoreError> {
    let path = path.as_ref();
    let tmp_path = tmp_path_for(path);

    let yaml = serde_yaml::to_string(graph).map_err(|source| TaskStoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    {
        let mut file = std::fs::File::create(&tmp_path).map_err(|source| TaskStoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        file.write_all(yaml.as_bytes())
            .map_err(|source| TaskStoreError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        file.sync_all().map_err(|source| TaskStoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
    }

    std::fs::rename(&tmp_path, path).map_err(|source| TaskStoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!(path = %path.display(), "tasks.yaml saved");
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// `updateStatus(id, newStatus)`: in-memory mutation, checked against the
/// status invariant in `TaskStatus::can_transition_to`.
pub fn update_status(
    graph: &mut TaskGraph,
    task_id: &str,
    new_status: TaskStatus,
) -> Result<(), TaskStoreError> {
    let task = find_task_mut(&mut graph.tasks, task_id)
        .ok_or_else(|| TaskStoreError::NotFound(task_id.to_string()))?;

    if !task.status.can_transition_to(new_status) {
        return Err(TaskStoreError::InvalidTransition {
            task_id: task_id.to_string(),
            from: task.status,
            to: new_status,
        });
    }

    task.status = new_status;
    Ok(())
}

/// `markStepDone(stepId)`: flip one step to `Done` by its `<task-id>.<n>`
/// id. The task's own status is left untouched here — the work loop is the
/// only thing that decides whether "all steps done" means the task is now
/// `Done` (see `bloom-scheduler::work_loop::run_task`).
pub fn mark_step_done(graph: &mut TaskGraph, step_id: &str) -> Result<(), TaskStoreError> {
    let task_id = step_id
        .rsplit_once('.')
        .map(|(task_id, _)| task_id)
        .unwrap_or(step_id);
    let task = find_task_mut(&mut graph.tasks, task_id)
        .ok_or_else(|| TaskStoreError::NotFound(task_id.to_string()))?;
    let step = task
        .steps
        .iter_mut()
        .find(|s| s.id == step_id)
        .ok_or_else(|| TaskStoreError::StepNotFound(step_id.to_string()))?;
    step.status = crate::types::StepStatus::Done;
    Ok(())
}

/// `appendNote(taskId, text)`: append one entry to a task's `ai_notes`.
pub fn append_note(graph: &mut TaskGraph, task_id: &str, note: &str) -> Result<(), TaskStoreError> {
    let task = find_task_mut(&mut graph.tasks, task_id)
        .ok_or_else(|| TaskStoreError::NotFound(task_id.to_string()))?;
    task.ai_notes.push(note.to_string());
    Ok(())
}

fn find_task_mut<'a>(tasks: &'a mut [Task], id: &str) -> Option<&'a mut Task> {
    for t in tasks {
        if t.id == id {
            return Some(t);
        }
        if let Some(found) = find_task_mut(&mut t.subtasks, id) {
            return Some(found);
        }
    }
    None
}

/// `nextTaskFor(agentName)`: select at most one runnable task for the
/// given agent. Candidates are tasks whose dependencies are satisfied and
/// whose status is runnable, AND (`agent_name == agentName` OR
/// `agent_name` unset and no task already claims that agent). Ties break
/// by `(phase asc, declaration order)`.
pub fn next_task_for<'a>(graph: &'a TaskGraph, agent_name: &str) -> Option<&'a Task> {
    let flattened: Vec<&Task> = graph.tasks.iter().flat_map(|t| t.flatten()).collect();
    let owned_tasks = owned(&flattened);

    let has_routed_runnable_task = flattened
        .iter()
        .any(|t| t.agent_name.as_deref() == Some(agent_name) && t.is_runnable(&owned_tasks));

    let mut candidates: Vec<(usize, &Task)> = flattened
        .iter()
        .enumerate()
        .filter_map(|(decl_order, t)| {
            let routed_to_us = t.agent_name.as_deref() == Some(agent_name);
            let floating = t.agent_name.is_none() && !has_routed_runnable_task;
            if !(routed_to_us || floating) {
                return None;
            }
            if !t.is_runnable(&owned_tasks) {
                return None;
            }
            Some((decl_order, *t))
        })
        .collect();

    candidates.sort_by(|(order_a, a), (order_b, b)| {
        a.phase
            .unwrap_or(u32::MAX)
            .cmp(&b.phase.unwrap_or(u32::MAX))
            .then(order_a.cmp(order_b))
    });

    candidates.into_iter().map(|(_, t)| t).next()
}

fn owned<'a>(flattened: &[&'a Task]) -> Vec<Task> {
    flattened.iter().map(|t| (*t).clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Step;

    fn minimal_task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: id.to_string(),
            status: TaskStatus::Todo,
            phase: None,
            depends_on: vec![],
            repo: "r".into(),
            branch: format!("feature/{id}"),
            base_branch: None,
            merge_into: None,
            open_pr: false,
            agent_name: None,
            checkpoint: false,
            instructions: Some("do it".into()),
            steps: vec![],
            acceptance_criteria: vec![],
            ai_notes: vec![],
            subtasks: vec![],
            session_id: None,
            commit_retry_attempts: 0,
            merge_retry_attempts: 0,
        }
    }

    #[test]
    fn round_trip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.yaml");

        let mut t1 = minimal_task("t1");
        t1.steps.push(Step::new("t1", 1, "write the code"));
        let graph = TaskGraph {
            git: GitSection {
                push_to_remote: true,
                auto_cleanup_merged: false,
            },
            tasks: vec![t1],
        };

        save_tasks(&path, &graph).unwrap();
        let loaded = load_tasks(&path).unwrap();
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].id, "t1");
        assert!(loaded.git.push_to_remote);
        assert!(!path.with_extension("yaml.tmp").exists());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let tasks = vec![minimal_task("dup"), minimal_task("dup")];
        let err = validate(&tasks).unwrap_err();
        assert!(matches!(err, TaskStoreError::DuplicateId(_)));
    }

    #[test]
    fn rejects_cycles() {
        let mut a = minimal_task("a");
        a.depends_on = vec!["b".into()];
        let mut b = minimal_task("b");
        b.depends_on = vec!["a".into()];
        let err = validate(&[a, b]).unwrap_err();
        assert!(matches!(err, TaskStoreError::CyclicDependency(_)));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let mut a = minimal_task("a");
        a.depends_on = vec!["ghost".into()];
        let err = validate(&[a]).unwrap_err();
        assert!(matches!(err, TaskStoreError::UnknownDependency(_, _)));
    }

    #[test]
    fn next_task_for_drains_routed_work_before_floating_work() {
        let mut t_other_agent = minimal_task("t0");
        t_other_agent.agent_name = Some("backend".into());

        let mut t_phase2 = minimal_task("t1");
        t_phase2.phase = Some(2);
        t_phase2.agent_name = Some("frontend".into());

        let mut t_phase1 = minimal_task("t2");
        t_phase1.phase = Some(1);
        // floating (no agent_name), earlier phase than t1 — but "frontend"
        // still has a runnable routed task (t1) waiting, so the floating
        // task is not yet eligible.

        let graph = TaskGraph {
            git: GitSection::default(),
            tasks: vec![t_other_agent, t_phase2, t_phase1],
        };

        let picked = next_task_for(&graph, "frontend").unwrap();
        assert_eq!(picked.id, "t1");
    }

    #[test]
    fn next_task_for_falls_back_to_floating_once_routed_work_is_exhausted() {
        let mut t_phase2 = minimal_task("t1");
        t_phase2.phase = Some(2);
        t_phase2.status = TaskStatus::Done;
        t_phase2.agent_name = Some("frontend".into());

        let mut t_phase1 = minimal_task("t2");
        t_phase1.phase = Some(1);
        // floating, and "frontend" has no runnable routed task left — eligible.

        let graph = TaskGraph {
            git: GitSection::default(),
            tasks: vec![t_phase2, t_phase1],
        };

        let picked = next_task_for(&graph, "frontend").unwrap();
        assert_eq!(picked.id, "t2");
    }

    #[test]
    fn next_task_for_breaks_ties_by_phase_then_order_among_routed_tasks() {
        let mut t_phase2 = minimal_task("t1");
        t_phase2.phase = Some(2);
        t_phase2.agent_name = Some("frontend".into());

        let mut t_phase1 = minimal_task("t2");
        t_phase1.phase = Some(1);
        t_phase1.agent_name = Some("frontend".into());

        let graph = TaskGraph {
            git: GitSection::default(),
            tasks: vec![t_phase2, t_phase1],
        };

        let picked = next_task_for(&graph, "frontend").unwrap();
        assert_eq!(picked.id, "t2");
    }

    #[test]
    fn next_task_for_respects_dependencies() {
        let mut dep = minimal_task("dep");
        dep.status = TaskStatus::InProgress;
        let mut t = minimal_task("t");
        t.depends_on = vec!["dep".into()];

        let graph = TaskGraph {
            git: GitSection::default(),
            tasks: vec![dep, t],
        };
        assert!(next_task_for(&graph, "any").is_none());
    }

    #[test]
    fn update_status_enforces_transition() {
        let mut graph = TaskGraph {
            git: GitSection::default(),
            tasks: vec![minimal_task("t")],
        };
        update_status(&mut graph, "t", TaskStatus::ReadyForAgent).unwrap();
        let err = update_status(&mut graph, "t", TaskStatus::Done).unwrap_err();
        assert!(matches!(err, TaskStoreError::InvalidTransition { .. }));
    }
}
