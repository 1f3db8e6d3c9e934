//! `bloom run` (A6): the daemon entrypoint. Loads the layered config, wires
//! up the shared Event Bus / Sandbox Manager / Session Manager, spawns one
//! work loop per configured agent, and waits for SIGINT/SIGTERM to drain
//! them.
//!
//! Grounded on `at-daemon/main.rs`'s startup sequence (config load →
//! telemetry init → spawn long-running activities → install ctrl_c handler
//! → join). None of the teacher's Dolt-backed bead board, axum HTTP API, or
//! frontend-serving machinery carries over — `bloom run` has no API surface
//! of its own, only the work loops it spawns (see DESIGN.md).

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bloom_bus::EventBus;
use bloom_core::config::{GlobalConfig, WorkspaceConfig};
use bloom_core::CliType;
use bloom_scheduler::{run_work_loop, ShutdownSignal, WorkLoopConfig};
use bloom_session::{SandboxConfig, SandboxManager, SessionManager};
use tracing::warn;

pub async fn run(workspace_dir: PathBuf, auto_detect: bool) -> anyhow::Result<()> {
    let global = GlobalConfig::load()?;
    let workspace = WorkspaceConfig::load_or_discover(&workspace_dir, auto_detect)?;

    bloom_telemetry::init_logging("bloom", Some(&global.log_level), "info");

    if workspace.agents.is_empty() {
        anyhow::bail!(
            "{} has no agents configured (add an `agents:` list)",
            WorkspaceConfig::path_for(&workspace_dir).display()
        );
    }

    bloom_telemetry::daemon_startup(&workspace.agents);

    let bus = EventBus::new();
    let sandbox = SandboxManager::new();
    let repos_dir = workspace.repos_dir(&workspace_dir);
    for agent_name in &workspace.agents {
        let mut sandbox_config = SandboxConfig::new(repos_dir.clone());
        sandbox_config.enabled = global.sandbox.enabled;
        sandbox_config.deny_read_paths = global
            .sandbox
            .deny_read_paths
            .iter()
            .map(|path| expand_tilde(path))
            .collect();
        sandbox.create_instance(agent_name, repos_dir.clone(), Some(sandbox_config));
    }
    let session = Arc::new(SessionManager::new(bus.clone(), sandbox.clone()));

    let shutdown = ShutdownSignal::new();
    install_signal_handler(shutdown.clone());

    let mut handles = Vec::new();
    for agent_name in &workspace.agents {
        let cli_type = resolve_cli_type(agent_name);
        let config = WorkLoopConfig {
            agent_name: agent_name.clone(),
            workspace_dir: workspace_dir.clone(),
            repos_dir: repos_dir.clone(),
            repo_configs: workspace.repos.clone(),
            poll_interval: Duration::from_secs(workspace.poll_interval_secs),
            cli_type,
            max_attempts: 3,
            push_to_remote: workspace.repos.iter().any(|r| r.push_to_remote),
            auto_cleanup_merged: workspace.repos.iter().any(|r| r.auto_cleanup_merged),
        };
        let bus = bus.clone();
        let session = Arc::clone(&session);
        let shutdown_rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            run_work_loop(config, bus, session, shutdown_rx).await
        }));
    }

    bloom_telemetry::daemon_ready();

    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "agent work loop exited with an error"),
            Err(err) => warn!(%err, "agent work loop task panicked"),
        }
    }

    sandbox.destroy_all();
    bloom_telemetry::daemon_shutdown_complete();
    Ok(())
}

/// Agent names are provider names by default (`claude`, `copilot`, ...); an
/// unrecognized name falls back to `claude` rather than failing startup —
/// per-agent provider overrides beyond this convention are future scope
/// (see DESIGN.md's Open Question decisions).
/// `config.yaml`'s `denyReadPaths` defaults are written `~/.ssh`-style;
/// expand that the same way `at-cli`'s `expand_tilde` helper does, since
/// `SandboxConfig::deny_read_paths` is matched against real filesystem
/// paths, not against `~`.
fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")).join(rest),
        None => PathBuf::from(path),
    }
}

fn resolve_cli_type(agent_name: &str) -> CliType {
    CliType::from_str(agent_name).unwrap_or_else(|_| {
        warn!(agent = agent_name, "agent name is not a known provider, defaulting to claude");
        CliType::Claude
    })
}

fn install_signal_handler(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sig) => sig,
                Err(_) => {
                    let _ = ctrl_c.await;
                    shutdown.trigger();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        shutdown.trigger();
    });
}

