//! Question queue (C7): one JSON file per question under
//! `<workspace>/.queue/<id>.json`.
//!
//! Grounded on the crash-safe `.tmp` + `sync_all` + rename write pattern
//! `bloom-core::task_store` uses for `tasks.yaml`, generalized here to one
//! file per record instead of one file for the whole graph.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bloom_core::{load_tasks, save_tasks, update_status, Question, QuestionKind, QuestionStatus, TaskStatus};
use tracing::info;

use crate::error::QueueError;

pub fn queue_dir(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(".queue")
}

fn record_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

pub fn list(dir: &Path, status: Option<QuestionStatus>) -> Result<Vec<Question>, QueueError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let question = read(&path)?;
        if status.map(|s| s == question.status).unwrap_or(true) {
            out.push(question);
        }
    }
    out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(out)
}

pub fn get(dir: &Path, id: &str) -> Result<Question, QueueError> {
    let path = record_path(dir, id);
    if !path.exists() {
        return Err(QueueError::NotFound(id.to_string()));
    }
    read(&path)
}

fn read(path: &Path) -> Result<Question, QueueError> {
    let text = fs::read_to_string(path).map_err(|source| QueueError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| QueueError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn create(dir: &Path, question: &Question) -> Result<(), QueueError> {
    fs::create_dir_all(dir)?;
    write(&record_path(dir, &question.id), question)?;
    info!(id = %question.id, agent = %question.agent_name, "question created");
    Ok(())
}

fn write(path: &Path, question: &Question) -> Result<(), QueueError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);

    let json = serde_json::to_string_pretty(question).map_err(|source| QueueError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    {
        let mut file = fs::File::create(&tmp_path).map_err(|source| QueueError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        file.write_all(json.as_bytes()).map_err(|source| QueueError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        file.sync_all().map_err(|source| QueueError::Io {
            path: tmp_path.clone(),
            source,
        })?;
    }
    fs::rename(&tmp_path, path).map_err(|source| QueueError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Resolve `answer_text` against the question's kind, applying `on_yes`/
/// `on_no` to the linked task (via `bloom_core`) when the answer resolves
/// affirmatively or negatively, then persists the answered question.
pub fn answer(
    dir: &Path,
    tasks_path: &Path,
    id: &str,
    answer_text: &str,
) -> Result<Question, QueueError> {
    let mut question = get(dir, id)?;
    question.status = QuestionStatus::Answered;
    question.answer = Some(answer_text.to_string());

    if let (Some(task_id), Some(target)) =
        (question.task_id.clone(), resolve_target_status(&question, answer_text))
    {
        let mut graph = load_tasks(tasks_path)?;
        update_status(&mut graph, &task_id, target)?;
        save_tasks(tasks_path, &graph)?;
    }

    write(&record_path(dir, id), &question)?;
    info!(id, answer = answer_text, "question answered");
    Ok(question)
}

fn resolve_target_status(question: &Question, answer_text: &str) -> Option<TaskStatus> {
    match question.kind {
        QuestionKind::YesNo => {
            if answer_text.eq_ignore_ascii_case("yes") {
                question.on_yes
            } else if answer_text.eq_ignore_ascii_case("no") {
                question.on_no
            } else {
                None
            }
        }
        QuestionKind::Choice => {
            let choices = question.choices.as_deref().unwrap_or(&[]);
            if choices.first().map(|c| c == answer_text).unwrap_or(false) {
                question.on_yes
            } else {
                question.on_no
            }
        }
        QuestionKind::Open => None,
    }
}

pub fn dismiss(dir: &Path, id: &str) -> Result<Question, QueueError> {
    let mut question = get(dir, id)?;
    question.status = QuestionStatus::Dismissed;
    write(&record_path(dir, id), &question)?;
    Ok(question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn yes_no(id: &str, task_id: &str) -> Question {
        Question {
            id: id.to_string(),
            agent_name: "frontend".into(),
            task_id: Some(task_id.to_string()),
            kind: QuestionKind::YesNo,
            prompt: "ship it?".into(),
            choices: None,
            created_at: Utc::now(),
            status: QuestionStatus::Pending,
            answer: None,
            on_yes: Some(TaskStatus::ReadyForAgent),
            on_no: Some(TaskStatus::Blocked),
        }
    }

    fn minimal_task(id: &str) -> bloom_core::Task {
        bloom_core::Task {
            id: id.to_string(),
            title: id.to_string(),
            status: TaskStatus::Blocked,
            phase: None,
            depends_on: vec![],
            repo: "r".into(),
            branch: "b".into(),
            base_branch: None,
            merge_into: None,
            open_pr: false,
            agent_name: None,
            checkpoint: false,
            instructions: None,
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
    fn answer_yes_applies_on_yes_transition() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_dir(dir.path());
        let tasks_path = dir.path().join("tasks.yaml");

        bloom_core::save_tasks(
            &tasks_path,
            &bloom_core::TaskGraph {
                git: Default::default(),
                tasks: vec![minimal_task("t")],
            },
        )
        .unwrap();

        create(&queue, &yes_no("q1", "t")).unwrap();
        let answered = answer(&queue, &tasks_path, "q1", "yes").unwrap();
        assert_eq!(answered.status, QuestionStatus::Answered);

        let graph = load_tasks(&tasks_path).unwrap();
        assert_eq!(graph.tasks[0].status, TaskStatus::ReadyForAgent);
    }

    #[test]
    fn dismiss_marks_dismissed_without_touching_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_dir(dir.path());
        create(&queue, &yes_no("q1", "t")).unwrap();
        let dismissed = dismiss(&queue, "q1").unwrap();
        assert_eq!(dismissed.status, QuestionStatus::Dismissed);
    }

    #[test]
    fn list_filters_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_dir(dir.path());
        create(&queue, &yes_no("q1", "t")).unwrap();
        let mut q2 = yes_no("q2", "t");
        q2.status = QuestionStatus::Dismissed;
        create(&queue, &q2).unwrap();

        let pending = list(&queue, Some(QuestionStatus::Pending)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "q1");
    }
}
