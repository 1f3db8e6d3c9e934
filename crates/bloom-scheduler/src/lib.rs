//! The Scheduler / Work Loop (C2) for the Bloom orchestrator: one polling
//! activity per configured agent name that ties the Task Store, Session
//! Manager, Sandbox Manager, Git Pipeline, and Question/Interjection Queue
//! together, publishing every state change onto the Event Bus.
//!
//! This is the only crate that depends on every other Bloom crate — it is
//! the composition root for a single agent's work loop. The binary
//! (`bloom-cli`'s `run` subcommand) is the composition root for the whole
//! daemon: one `run_work_loop` task per configured agent, fanned in behind
//! one shared [`ShutdownSignal`].

pub mod agent_runner;
pub mod error;
pub mod shutdown;
pub mod work_loop;

pub use agent_runner::SchedulerAgentRunner;
pub use error::SchedulerError;
pub use shutdown::ShutdownSignal;
pub use work_loop::{run_work_loop, WorkLoopConfig};
