//! Structured logging (A2): a `tracing_subscriber::fmt` layer driven by an
//! `EnvFilter`, plus the daemon's coarse lifecycle log lines.
//!
//! Grounded on `at-telemetry/logging.rs::init_logging`/`init_logging_json`,
//! adapted to read `BLOOM_LOG` rather than `RUST_LOG` so Bloom's own env
//! var doesn't collide with filtering for unrelated crates in the same
//! process, and to accept a config-supplied fallback level ahead of the
//! hardcoded default. No Datadog/OpenTelemetry exporter is carried — a
//! single-operator CLI orchestrator has no hosted observability backend in
//! scope (see DESIGN.md).

use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "BLOOM_LOG";

fn resolve_filter(config_log_level: Option<&str>, default_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV_VAR) {
        return filter;
    }
    let fallback = config_log_level.unwrap_or(default_level);
    EnvFilter::new(fallback)
}

/// Install a human-readable `fmt` subscriber. Safe to call more than once
/// per process (e.g. from tests) — later calls are ignored.
pub fn init_logging(binary_name: &str, config_log_level: Option<&str>, default_level: &str) {
    let filter = resolve_filter(config_log_level, default_level);
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    tracing::info!(service = binary_name, "telemetry initialized");
}

/// Same as [`init_logging`] but emits newline-delimited JSON, for
/// deployments that ship logs to a collector rather than a terminal.
pub fn init_logging_json(binary_name: &str, config_log_level: Option<&str>, default_level: &str) {
    let filter = resolve_filter(config_log_level, default_level);
    let _ = tracing_subscriber::fmt().json().with_env_filter(filter).try_init();
    tracing::info!(service = binary_name, "telemetry initialized");
}

/// Logged once the daemon has parsed config and is about to spawn work
/// loops. Matches `at-daemon/main.rs`'s coarse lifecycle logging.
pub fn daemon_startup(agents: &[String]) {
    tracing::info!(agent_count = agents.len(), agents = ?agents, "daemon_startup");
}

/// Logged once every configured work loop has been spawned and the
/// shutdown signal handler is installed.
pub fn daemon_ready() {
    tracing::info!("daemon_ready");
}

/// Logged after every work loop has returned and `SandboxManager::destroy_all`
/// has completed.
pub fn daemon_shutdown_complete() {
    tracing::info!("daemon_shutdown_complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_filter_falls_back_to_config_then_default() {
        std::env::remove_var(LOG_ENV_VAR);
        let filter = resolve_filter(Some("debug"), "info");
        assert_eq!(filter.to_string(), "debug");

        let filter = resolve_filter(None, "warn");
        assert_eq!(filter.to_string(), "warn");
    }
}
