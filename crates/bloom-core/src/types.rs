//! Core data model: tasks, steps, sessions, worktrees, questions and
//! interjections. See `task_store` for the operations that mutate these
//! types and `bloom-git`/`bloom-session` for the types that describe live
//! process/filesystem state built on top of them.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Linear task lifecycle, plus the `Blocked` escape hatch.
///
/// The happy-path order is exactly the declaration order below; `Blocked`
/// can be entered from any non-terminal status and can only be left by an
/// explicit human action (back to `ReadyForAgent`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    ReadyForAgent,
    Assigned,
    InProgress,
    Blocked,
    DonePendingMerge,
    Done,
}

impl TaskStatus {
    /// Position in the canonical non-blocked pipeline order, used for the
    /// monotonicity invariant (a task's status sequence must be
    /// non-decreasing along this order, `Blocked` aside).
    fn pipeline_rank(self) -> u8 {
        match self {
            TaskStatus::Todo => 0,
            TaskStatus::ReadyForAgent => 1,
            TaskStatus::Assigned => 2,
            TaskStatus::InProgress => 3,
            TaskStatus::DonePendingMerge => 4,
            TaskStatus::Done => 5,
            TaskStatus::Blocked => u8::MAX,
        }
    }

    /// Whether a transition from `self` to `next` is permitted.
    ///
    /// `Blocked` may be entered from any non-terminal status and left only
    /// back to `ReadyForAgent` (the human-recovery path); all other
    /// transitions must move strictly forward along the pipeline order.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        if self == next {
            return false;
        }
        match (self, next) {
            (TaskStatus::Done, _) => false,
            (_, TaskStatus::Blocked) => self != TaskStatus::Done,
            (TaskStatus::Blocked, TaskStatus::ReadyForAgent) => true,
            (TaskStatus::Blocked, _) => false,
            _ => next.pipeline_rank() > self.pipeline_rank(),
        }
    }

    pub fn is_runnable(self) -> bool {
        matches!(self, TaskStatus::Todo | TaskStatus::ReadyForAgent)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}

// ---------------------------------------------------------------------------
// StepStatus / Step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Todo,
    InProgress,
    Done,
}

/// A sub-unit of a task, id'd `<task-id>.<n>`. Steps execute strictly in
/// declaration order; a step is `Done` only once the agent has invoked the
/// external `bloom step done <id>` command for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub instruction: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default = "default_step_status")]
    pub status: StepStatus,
}

fn default_step_status() -> StepStatus {
    StepStatus::Todo
}

impl Step {
    pub fn new(task_id: &str, index: usize, instruction: impl Into<String>) -> Self {
        Self {
            id: format!("{task_id}.{index}"),
            instruction: instruction.into(),
            acceptance_criteria: Vec::new(),
            status: StepStatus::Todo,
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of work in the task graph, identified by a human-chosen slug
/// rather than a generated id — tasks.yaml is meant to be hand-edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub phase: Option<u32>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub repo: String,
    pub branch: String,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub merge_into: Option<String>,
    #[serde(default)]
    pub open_pr: bool,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub checkpoint: bool,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub ai_notes: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<Task>,
    /// Session id returned by the agent provider, persisted so the next
    /// step can `--resume` rather than starting cold.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Bounded retry counters for the current process lifetime only — the
    /// source has no cross-restart persistence policy for these (see
    /// SPEC_FULL.md open questions), so neither do we.
    #[serde(default, skip_serializing)]
    pub commit_retry_attempts: u32,
    #[serde(default, skip_serializing)]
    pub merge_retry_attempts: u32,
}

impl Task {
    /// A task is runnable iff its status is `Todo`/`ReadyForAgent` and
    /// every dependency has reached `Done` or `DonePendingMerge`.
    pub fn is_runnable(&self, all_tasks: &[Task]) -> bool {
        if !self.status.is_runnable() {
            return false;
        }
        self.depends_on.iter().all(|dep_id| {
            all_tasks.iter().any(|t| {
                t.id == *dep_id
                    && matches!(t.status, TaskStatus::Done | TaskStatus::DonePendingMerge)
            })
        })
    }

    /// Flatten this task and all nested subtasks (used for id-uniqueness
    /// and cycle validation in the task store).
    pub fn flatten(&self) -> Vec<&Task> {
        let mut out = vec![self];
        for sub in &self.subtasks {
            out.extend(sub.flatten());
        }
        out
    }

    pub fn next_pending_step(&self) -> Option<&Step> {
        self.steps.iter().find(|s| s.status != StepStatus::Done)
    }
}

// ---------------------------------------------------------------------------
// CliType — known agent providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CliType {
    Claude,
    Copilot,
    Goose,
    OpenCode,
    Codex,
    Cursor,
}

impl CliType {
    pub fn as_str(self) -> &'static str {
        match self {
            CliType::Claude => "claude",
            CliType::Copilot => "copilot",
            CliType::Goose => "goose",
            CliType::OpenCode => "opencode",
            CliType::Codex => "codex",
            CliType::Cursor => "cursor",
        }
    }

    pub fn all() -> [CliType; 6] {
        [
            CliType::Claude,
            CliType::Copilot,
            CliType::Goose,
            CliType::OpenCode,
            CliType::Codex,
            CliType::Cursor,
        ]
    }
}

impl std::str::FromStr for CliType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(CliType::Claude),
            "copilot" => Ok(CliType::Copilot),
            "goose" => Ok(CliType::Goose),
            "opencode" => Ok(CliType::OpenCode),
            "codex" => Ok(CliType::Codex),
            "cursor" => Ok(CliType::Cursor),
            other => Err(format!("unknown agent provider `{other}`")),
        }
    }
}

// ---------------------------------------------------------------------------
// Question / Interjection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    YesNo,
    Choice,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Pending,
    Answered,
    Dismissed,
}

/// A question raised by an agent (or a human) via `bloom ask`, persisted
/// under `<workspace>/.queue/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub agent_name: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub kind: QuestionKind,
    pub prompt: String,
    #[serde(default)]
    pub choices: Option<Vec<String>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub status: QuestionStatus,
    #[serde(default)]
    pub answer: Option<String>,
    /// Status to apply to `task_id` if the answer resolves "yes" /
    /// affirmative-choice-zero.
    #[serde(default)]
    pub on_yes: Option<TaskStatus>,
    #[serde(default)]
    pub on_no: Option<TaskStatus>,
}

/// An out-of-band human message that preempted a live session, persisted
/// under `<workspace>/.interjections/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interjection {
    pub id: String,
    pub agent_name: String,
    pub message: String,
    #[serde(default)]
    pub task_id: Option<String>,
    /// Session id at the moment of interjection, so the next step can
    /// decide whether resuming still makes sense.
    #[serde(default)]
    pub session_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub resumed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_pipeline_is_monotone() {
        assert!(TaskStatus::Todo.can_transition_to(TaskStatus::ReadyForAgent));
        assert!(TaskStatus::ReadyForAgent.can_transition_to(TaskStatus::Assigned));
        assert!(!TaskStatus::Assigned.can_transition_to(TaskStatus::Todo));
        assert!(!TaskStatus::Done.can_transition_to(TaskStatus::Blocked));
    }

    #[test]
    fn blocked_recovers_only_to_ready_for_agent() {
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Blocked));
        assert!(TaskStatus::Blocked.can_transition_to(TaskStatus::ReadyForAgent));
        assert!(!TaskStatus::Blocked.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Blocked.can_transition_to(TaskStatus::Done));
    }

    #[test]
    fn runnable_requires_deps_done() {
        let dep = Task {
            id: "dep".into(),
            title: "dep".into(),
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
            instructions: None,
            steps: vec![],
            acceptance_criteria: vec![],
            ai_notes: vec![],
            subtasks: vec![],
            session_id: None,
            commit_retry_attempts: 0,
            merge_retry_attempts: 0,
        };
        let mut task = dep.clone();
        task.id = "t".into();
        task.depends_on = vec!["dep".into()];
        task.status = TaskStatus::Todo;

        let all = vec![dep.clone(), task.clone()];
        assert!(!task.is_runnable(&all));

        let mut done_dep = dep;
        done_dep.status = TaskStatus::Done;
        let all = vec![done_dep, task.clone()];
        assert!(task.is_runnable(&all));
    }

    #[test]
    fn cli_type_round_trips_through_str() {
        for cli in CliType::all() {
            let parsed: CliType = cli.as_str().parse().unwrap();
            assert_eq!(parsed, cli);
        }
        assert!("not-a-cli".parse::<CliType>().is_err());
    }
}
