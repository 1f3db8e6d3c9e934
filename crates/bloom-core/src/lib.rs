//! Core data model and Task Store (C1) for the Bloom orchestrator.
//!
//! This crate has no knowledge of git, subprocesses, or events — it only
//! knows how to parse, validate, and durably persist `tasks.yaml`, and how
//! to load the layered YAML configuration. Every other crate in the
//! workspace depends on this one.

pub mod config;
pub mod error;
pub mod task_store;
pub mod types;

pub use error::{ConfigError, TaskStoreError};
pub use task_store::{
    append_note, load_tasks, mark_step_done, next_task_for, save_tasks, update_status, GitSection,
    TaskGraph,
};
pub use types::{
    CliType, Interjection, Question, QuestionKind, QuestionStatus, Step, StepStatus, Task,
    TaskStatus,
};
