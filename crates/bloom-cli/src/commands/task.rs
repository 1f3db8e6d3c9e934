//! `bloom step done`, `bloom done`, `bloom block`, `bloom note` — the
//! human/agent-facing commands that mutate `tasks.yaml` directly, the way
//! an agent's own `step done`/`done` subprocess call does from inside a
//! session (§3, §4.2 step 8).

use std::path::Path;

use bloom_core::{append_note, load_tasks, mark_step_done, save_tasks, update_status, TaskStatus};

pub fn step_done(workspace_dir: &Path, step_id: &str) -> anyhow::Result<()> {
    let path = crate::workspace::tasks_path(workspace_dir);
    let mut graph = load_tasks(&path)?;
    mark_step_done(&mut graph, step_id)?;
    save_tasks(&path, &graph)?;
    println!("step {step_id} marked done");
    Ok(())
}

pub fn done(workspace_dir: &Path, task_id: &str) -> anyhow::Result<()> {
    let path = crate::workspace::tasks_path(workspace_dir);
    let mut graph = load_tasks(&path)?;
    update_status(&mut graph, task_id, TaskStatus::Done)?;
    save_tasks(&path, &graph)?;
    println!("task {task_id} marked done");
    Ok(())
}

pub fn block(workspace_dir: &Path, task_id: &str, reason: Option<&str>) -> anyhow::Result<()> {
    let path = crate::workspace::tasks_path(workspace_dir);
    let mut graph = load_tasks(&path)?;
    update_status(&mut graph, task_id, TaskStatus::Blocked)?;
    if let Some(reason) = reason {
        append_note(&mut graph, task_id, &format!("blocked: {reason}"))?;
    }
    save_tasks(&path, &graph)?;
    println!("task {task_id} blocked");
    Ok(())
}

pub fn note(workspace_dir: &Path, task_id: &str, text: &str) -> anyhow::Result<()> {
    let path = crate::workspace::tasks_path(workspace_dir);
    let mut graph = load_tasks(&path)?;
    append_note(&mut graph, task_id, text)?;
    save_tasks(&path, &graph)?;
    println!("note added to {task_id}");
    Ok(())
}
