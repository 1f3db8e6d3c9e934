#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;
mod workspace;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use bloom_core::{ConfigError, QuestionKind, TaskStatus};
use clap::{Parser, Subcommand};

/// bloom -- orchestrate AI coding agents across a task graph of git worktrees.
#[derive(Parser)]
#[command(name = "bloom", version, about)]
struct Cli {
    /// Workspace root (defaults to the nearest ancestor containing tasks.yaml).
    #[arg(short = 'w', long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler: one work loop per agent configured in
    /// bloom.config.yaml, running until SIGINT/SIGTERM.
    Run {
        /// Synthesize bloom.config.yaml from repos/*/*.git when it's missing.
        #[arg(long)]
        auto_detect: bool,
    },

    /// Mark a step done (the same call an agent session makes via its
    /// `step done` tool).
    Step {
        #[command(subcommand)]
        command: StepCommands,
    },

    /// Mark a whole task done.
    Done { task_id: String },

    /// Mark a task blocked, optionally recording why.
    Block {
        task_id: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Append a freeform note to a task's aiNotes.
    Note { task_id: String, text: String },

    /// Raise a question for a human to answer out of band.
    Ask {
        agent_name: String,
        prompt: String,
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long, value_enum, default_value_t = AskKind::Open)]
        kind: AskKind,
        #[arg(long = "choice")]
        choices: Vec<String>,
        #[arg(long = "on-yes")]
        on_yes: Option<String>,
        #[arg(long = "on-no")]
        on_no: Option<String>,
    },

    /// Answer a previously raised question.
    Answer {
        question_id: String,
        answer: String,
    },

    /// Dismiss a previously raised question without an answer.
    DismissQuestion { question_id: String },

    /// Block until `questionId` is answered (or dismissed), printing the answer.
    WaitAnswer {
        question_id: String,
        #[arg(long, default_value_t = 2)]
        poll_interval_secs: u64,
        #[arg(long, default_value_t = 3600)]
        timeout_secs: u64,
    },

    /// `bloom interject <agentName> <message>` records an interjection;
    /// `bloom interject resume <id>` / `bloom interject dismiss <id>` manage
    /// an existing one. `resume`/`dismiss` are reserved agent names for this
    /// reason — dispatched by hand below rather than as clap subcommands, so
    /// there's no ambiguity between "the literal word resume" and "an agent
    /// named resume" for clap to resolve.
    Interject {
        #[arg(num_args = 2..=2)]
        args: Vec<String>,
        #[arg(long)]
        task_id: Option<String>,
    },

    /// List recorded interjections.
    Interjections,
}

#[derive(Subcommand)]
enum StepCommands {
    /// Mark a step done.
    Done { step_id: String },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum AskKind {
    YesNo,
    Choice,
    Open,
}

impl From<AskKind> for QuestionKind {
    fn from(kind: AskKind) -> Self {
        match kind {
            AskKind::YesNo => QuestionKind::YesNo,
            AskKind::Choice => QuestionKind::Choice,
            AskKind::Open => QuestionKind::Open,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// §6.5: 0 success, 1 user-visible error, 2 config/validation error.
/// Signal exits (128+N) are left to the process's natural termination and
/// are never constructed here.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ConfigError>().is_some() {
        return 2;
    }
    if let Some(task_store_err) = err.downcast_ref::<bloom_core::TaskStoreError>() {
        return match task_store_err {
            bloom_core::TaskStoreError::DuplicateId(_)
            | bloom_core::TaskStoreError::CyclicDependency(_)
            | bloom_core::TaskStoreError::UnknownDependency(_, _)
            | bloom_core::TaskStoreError::InvalidTransition { .. } => 2,
            _ => 1,
        };
    }
    1
}

/// `TaskStatus` only derives `serde`, not `clap::ValueEnum` (bloom-core has
/// no clap dependency and shouldn't need one) — parse the same snake_case
/// spelling serde uses for `--on-yes`/`--on-no` by hand instead.
fn parse_task_status(raw: &str) -> anyhow::Result<TaskStatus> {
    match raw {
        "todo" => Ok(TaskStatus::Todo),
        "ready_for_agent" => Ok(TaskStatus::ReadyForAgent),
        "assigned" => Ok(TaskStatus::Assigned),
        "in_progress" => Ok(TaskStatus::InProgress),
        "blocked" => Ok(TaskStatus::Blocked),
        "done_pending_merge" => Ok(TaskStatus::DonePendingMerge),
        "done" => Ok(TaskStatus::Done),
        other => anyhow::bail!(
            "unknown task status `{other}` (expected one of: todo, ready_for_agent, assigned, \
             in_progress, blocked, done_pending_merge, done)"
        ),
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run { auto_detect } => {
            let workspace_dir = workspace::resolve(cli.workspace).unwrap_or_else(|_| {
                std::env::current_dir().expect("current directory must be readable")
            });
            commands::run::run(workspace_dir, auto_detect).await
        }
        other => {
            let workspace_dir = workspace::resolve(cli.workspace)?;
            match other {
                Commands::Run { .. } => unreachable!(),
                Commands::Step {
                    command: StepCommands::Done { step_id },
                } => commands::task::step_done(&workspace_dir, &step_id),
                Commands::Done { task_id } => commands::task::done(&workspace_dir, &task_id),
                Commands::Block { task_id, reason } => {
                    commands::task::block(&workspace_dir, &task_id, reason.as_deref())
                }
                Commands::Note { task_id, text } => {
                    commands::task::note(&workspace_dir, &task_id, &text)
                }
                Commands::Ask {
                    agent_name,
                    prompt,
                    task_id,
                    kind,
                    choices,
                    on_yes,
                    on_no,
                } => commands::ask::ask(
                    &workspace_dir,
                    &agent_name,
                    &prompt,
                    task_id.as_deref(),
                    kind.into(),
                    choices,
                    on_yes.as_deref().map(parse_task_status).transpose()?,
                    on_no.as_deref().map(parse_task_status).transpose()?,
                ),
                Commands::Answer { question_id, answer } => {
                    commands::ask::answer(&workspace_dir, &question_id, &answer)
                }
                Commands::DismissQuestion { question_id } => {
                    commands::ask::dismiss(&workspace_dir, &question_id)
                }
                Commands::WaitAnswer {
                    question_id,
                    poll_interval_secs,
                    timeout_secs,
                } => commands::ask::wait_answer(
                    &workspace_dir,
                    &question_id,
                    Duration::from_secs(poll_interval_secs),
                    Duration::from_secs(timeout_secs),
                ),
                Commands::Interject { args, task_id } => match args.as_slice() {
                    [first, id] if first == "resume" => {
                        commands::interject::resume(&workspace_dir, id)
                    }
                    [first, id] if first == "dismiss" => {
                        commands::interject::dismiss(&workspace_dir, id)
                    }
                    [agent_name, message] => commands::interject::interject(
                        &workspace_dir,
                        agent_name,
                        message,
                        task_id.as_deref(),
                    ),
                    _ => anyhow::bail!(
                        "usage: bloom interject <agentName> <message> | bloom interject resume <id> | bloom interject dismiss <id>"
                    ),
                },
                Commands::Interjections => commands::interject::list(&workspace_dir),
            }
        }
    }
}
