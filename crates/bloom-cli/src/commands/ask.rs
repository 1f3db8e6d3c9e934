//! `bloom ask` and `bloom wait-answer` (C7): raise a question from the
//! command line (the same record shape an in-session agent's `ask` tool
//! call would create) and optionally block until a human answers it.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::bail;
use bloom_core::{Question, QuestionKind, QuestionStatus, TaskStatus};
use bloom_queue::questions;
use uuid::Uuid;

#[allow(clippy::too_many_arguments)]
pub fn ask(
    workspace_dir: &Path,
    agent_name: &str,
    prompt: &str,
    task_id: Option<&str>,
    kind: QuestionKind,
    choices: Vec<String>,
    on_yes: Option<TaskStatus>,
    on_no: Option<TaskStatus>,
) -> anyhow::Result<()> {
    let dir = questions::queue_dir(workspace_dir);
    let question = Question {
        id: Uuid::new_v4().to_string(),
        agent_name: agent_name.to_string(),
        task_id: task_id.map(str::to_string),
        kind,
        prompt: prompt.to_string(),
        choices: if choices.is_empty() { None } else { Some(choices) },
        created_at: chrono::Utc::now(),
        status: QuestionStatus::Pending,
        answer: None,
        on_yes,
        on_no,
    };
    questions::create(&dir, &question)?;
    println!("{}", question.id);
    Ok(())
}

/// Poll the question record until it leaves `Pending` or `timeout` elapses.
pub fn wait_answer(
    workspace_dir: &Path,
    question_id: &str,
    poll_interval: Duration,
    timeout: Duration,
) -> anyhow::Result<()> {
    let dir = questions::queue_dir(workspace_dir);
    let start = Instant::now();
    loop {
        let question = questions::get(&dir, question_id)?;
        match question.status {
            QuestionStatus::Pending => {}
            QuestionStatus::Answered => {
                println!("{}", question.answer.unwrap_or_default());
                return Ok(());
            }
            QuestionStatus::Dismissed => {
                bail!("question {question_id} was dismissed without an answer");
            }
        }
        if start.elapsed() >= timeout {
            bail!("timed out after {:?} waiting for an answer to {question_id}", timeout);
        }
        std::thread::sleep(poll_interval.min(timeout.saturating_sub(start.elapsed())));
    }
}

pub fn answer(workspace_dir: &Path, question_id: &str, answer_text: &str) -> anyhow::Result<()> {
    let dir = questions::queue_dir(workspace_dir);
    let tasks_path = crate::workspace::tasks_path(workspace_dir);
    let question = questions::answer(&dir, &tasks_path, question_id, answer_text)?;
    println!("question {question_id} answered: {}", question.answer.unwrap_or_default());
    Ok(())
}

pub fn dismiss(workspace_dir: &Path, question_id: &str) -> anyhow::Result<()> {
    let dir = questions::queue_dir(workspace_dir);
    questions::dismiss(&dir, question_id)?;
    println!("question {question_id} dismissed");
    Ok(())
}
