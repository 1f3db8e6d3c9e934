//! The Session Manager (C3): spawn a provider subprocess for one agent's
//! step, stream its stdout as [`StreamEvent`]s, enforce the idle timeout,
//! and support graceful interjection.
//!
//! Grounded on `at-agents/executor.rs`'s `AgentExecutor` (tracked
//! `active_tasks` map, prompt-building, timeout-via-`tokio::time::timeout`
//! shape) and `at-session/session.rs`'s `AgentSession` (one live session per
//! identity, kill-on-demand), re-plumbed from the teacher's PTY pool onto
//! `tokio::process::Command` because the wire protocol here is
//! newline-delimited JSON a PTY's line discipline would corrupt (see
//! DESIGN.md's Open Question decisions).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bloom_bus::{Event, EventBus};
use bloom_core::CliType;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::protocol::{self, StreamEvent};
use crate::provider::provider_for;
use crate::sandbox::SandboxManager;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

pub struct RunOutcome {
    pub exit_code: Option<i32>,
    pub session_id: Option<String>,
    pub reason: String,
}

pub struct InterjectionContext {
    pub agent_name: String,
    pub message: String,
    pub session_id: Option<String>,
    pub working_dir: PathBuf,
}

struct ActiveSession {
    session_id: Mutex<Option<String>>,
    working_dir: PathBuf,
    interject: tokio::sync::watch::Sender<bool>,
}

pub struct SessionManager {
    bus: EventBus,
    sandbox: SandboxManager,
    active: Arc<Mutex<HashMap<String, Arc<ActiveSession>>>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(bus: EventBus, sandbox: SandboxManager) -> Self {
        Self {
            bus,
            sandbox,
            active: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Run one step of `agentName`'s task to completion: spawn the provider
    /// subprocess (through the sandbox manager), stream parsed events to
    /// `on_event`, and block until the process exits, is interjected, or
    /// goes idle past the timeout.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        agent_name: &str,
        task_id: &str,
        working_dir: &Path,
        cli_type: CliType,
        system_prompt: &str,
        user_prompt: &str,
        resume_session_id: Option<String>,
        mut on_event: impl FnMut(StreamEvent) + Send,
    ) -> Result<RunOutcome, SessionError> {
        let active_session = {
            let mut active = self.active.lock().expect("lock poisoned");
            if active.contains_key(agent_name) {
                return Err(SessionError::AgentBusy(agent_name.to_string()));
            }
            let (interject_tx, _) = tokio::sync::watch::channel(false);
            let session = Arc::new(ActiveSession {
                session_id: Mutex::new(resume_session_id.clone()),
                working_dir: working_dir.to_path_buf(),
                interject: interject_tx,
            });
            active.insert(agent_name.to_string(), Arc::clone(&session));
            session
        };

        let result = self
            .run_inner(
                agent_name,
                task_id,
                working_dir,
                cli_type,
                system_prompt,
                user_prompt,
                resume_session_id,
                &active_session,
                &mut on_event,
            )
            .await;

        self.active.lock().expect("lock poisoned").remove(agent_name);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_inner(
        &self,
        agent_name: &str,
        task_id: &str,
        working_dir: &Path,
        cli_type: CliType,
        system_prompt: &str,
        user_prompt: &str,
        resume_session_id: Option<String>,
        active_session: &Arc<ActiveSession>,
        on_event: &mut impl FnMut(StreamEvent) + Send,
    ) -> Result<RunOutcome, SessionError> {
        let provider = provider_for(cli_type);
        let prompt = build_prompt(system_prompt, user_prompt);
        let args = provider.build_args(&prompt, resume_session_id.as_deref());

        let instance = self.sandbox.instance_or_default(agent_name, working_dir);
        let (program, wrapped_args) = instance.wrap_command(provider.binary, &args);

        let mut command = Command::new(&program);
        command
            .args(&wrapped_args)
            .current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| SessionError::Spawn {
            command: program.clone(),
            source,
        })?;

        let pid = child.id().unwrap_or(0);
        instance.track(pid);

        self.bus.publish(Event::AgentProcessStarted {
            agent_name: agent_name.to_string(),
            task_id: Some(task_id.to_string()),
            pid,
            command: format!("{program} {}", wrapped_args.join(" ")),
        });

        let stdout = child.stdout.take().expect("piped stdout");
        let mut lines = BufReader::new(stdout).lines();
        let mut interject_rx = active_session.interject.subscribe();

        let mut reason = "exit".to_string();
        let mut session_id = resume_session_id;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) => {
                            let event = protocol::parse_line(&text);
                            if let StreamEvent::Session { session_id: id } = &event {
                                session_id = Some(id.clone());
                                *active_session.session_id.lock().expect("lock poisoned") = Some(id.clone());
                            }
                            self.publish_for(agent_name, task_id, &event);
                            on_event(event);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(agent = agent_name, error = %e, "error reading agent stdout");
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep(self.idle_timeout) => {
                    warn!(agent = agent_name, "agent session idle, terminating");
                    graceful_kill(&mut child).await;
                    reason = "timeout".to_string();
                    break;
                }
                changed = interject_rx.changed() => {
                    if changed.is_ok() && *interject_rx.borrow() {
                        info!(agent = agent_name, "agent session interjected, terminating");
                        graceful_kill(&mut child).await;
                        reason = "interjected".to_string();
                        break;
                    }
                }
            }
        }

        let exit_code = match child.try_wait() {
            Ok(Some(status)) => status.code(),
            _ => {
                let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
                child.try_wait().ok().flatten().and_then(|s| s.code())
            }
        };
        instance.untrack(pid);

        self.bus.publish(Event::AgentProcessEnded {
            agent_name: agent_name.to_string(),
            task_id: Some(task_id.to_string()),
            exit_code,
            reason: reason.clone(),
        });

        Ok(RunOutcome { exit_code, session_id, reason })
    }

    fn publish_for(&self, agent_name: &str, task_id: &str, event: &StreamEvent) {
        if let StreamEvent::Text(text) = event {
            if !text.is_empty() {
                self.bus.publish(Event::AgentOutput {
                    agent_name: agent_name.to_string(),
                    task_id: Some(task_id.to_string()),
                    text: text.clone(),
                });
            }
        }
    }

    /// The canonical interjection mechanism (§4.3): record the live
    /// session's context, then gracefully kill it. The caller owns
    /// persisting the interjection record (C7); this only stops the
    /// subprocess and hands back what it needs to do so.
    pub fn interject(&self, agent_name: &str, message: &str) -> Option<InterjectionContext> {
        let active = self.active.lock().expect("lock poisoned");
        let session = active.get(agent_name)?;
        let _ = session.interject.send(true);
        Some(InterjectionContext {
            agent_name: agent_name.to_string(),
            message: message.to_string(),
            session_id: session.session_id.lock().expect("lock poisoned").clone(),
            working_dir: session.working_dir.clone(),
        })
    }

    pub fn is_busy(&self, agent_name: &str) -> bool {
        self.active.lock().expect("lock poisoned").contains_key(agent_name)
    }
}

fn build_prompt(system_prompt: &str, user_prompt: &str) -> String {
    if system_prompt.is_empty() {
        user_prompt.to_string()
    } else {
        format!("System: {system_prompt}\n\n{user_prompt}")
    }
}

#[cfg(unix)]
async fn graceful_kill(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    if tokio::time::timeout(Duration::from_secs(5), child.wait()).await.is_err() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[cfg(not(unix))]
async fn graceful_kill(child: &mut tokio::process::Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_prompt_prefixes_system_prompt() {
        let prompt = build_prompt("be terse", "fix the bug");
        assert_eq!(prompt, "System: be terse\n\nfix the bug");
    }

    #[test]
    fn build_prompt_skips_empty_system_prompt() {
        assert_eq!(build_prompt("", "fix the bug"), "fix the bug");
    }

    #[tokio::test]
    async fn second_concurrent_run_is_rejected_as_busy() {
        let manager = SessionManager::new(EventBus::new(), SandboxManager::new());
        {
            let mut active = manager.active.lock().unwrap();
            active.insert(
                "frontend".to_string(),
                Arc::new(ActiveSession {
                    session_id: Mutex::new(None),
                    working_dir: PathBuf::from("/tmp"),
                    interject: tokio::sync::watch::channel(false).0,
                }),
            );
        }
        assert!(manager.is_busy("frontend"));
        let err = manager
            .run(
                "frontend",
                "t1",
                Path::new("/tmp"),
                CliType::Claude,
                "",
                "hi",
                None,
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AgentBusy(name) if name == "frontend"));
    }

    #[test]
    fn interject_returns_none_for_unknown_agent() {
        let manager = SessionManager::new(EventBus::new(), SandboxManager::new());
        assert!(manager.interject("nobody", "stop").is_none());
    }

    #[test]
    fn interject_captures_session_id_and_workdir() {
        let manager = SessionManager::new(EventBus::new(), SandboxManager::new());
        {
            let mut active = manager.active.lock().unwrap();
            active.insert(
                "frontend".to_string(),
                Arc::new(ActiveSession {
                    session_id: Mutex::new(Some("sess-1".to_string())),
                    working_dir: PathBuf::from("/work/frontend"),
                    interject: tokio::sync::watch::channel(false).0,
                }),
            );
        }
        let ctx = manager.interject("frontend", "use tabs").unwrap();
        assert_eq!(ctx.session_id.as_deref(), Some("sess-1"));
        assert_eq!(ctx.working_dir, PathBuf::from("/work/frontend"));
        assert_eq!(ctx.message, "use tabs");
    }
}
