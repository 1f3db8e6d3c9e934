//! The Question / Interjection Queue (C7): file-based records under
//! `<workspace>/.queue/` (questions) and `<workspace>/.interjections/`
//! (interjections), plus a debounced filesystem watch so CLI/TUI adapters
//! can react to new records without polling.
//!
//! This crate knows nothing about subprocesses or the scheduler — it only
//! reads, writes, and watches these two directories, and applies
//! `onYes`/`onNo` task-status transitions via [`bloom_core`] when a
//! question is answered.

pub mod error;
pub mod interjections;
pub mod questions;
pub mod watch;

pub use error::QueueError;
pub use watch::{QueueEvent, QueueEventKind, QueueWatcher};
