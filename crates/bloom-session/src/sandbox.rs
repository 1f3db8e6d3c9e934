//! The Sandbox Manager (C4): per-agent process isolation via an external
//! sandbox runtime (`bwrap` on Linux, `sandbox-exec`/Seatbelt on macOS),
//! with a passthrough fallback when the runtime isn't available.
//!
//! Grounded on `at-core/settings.rs`'s `security.sandbox_mode` +
//! `execution_profiles` config shape for the config surface, and on
//! `at-agents/executor.rs`'s `active_tasks: Arc<Mutex<HashMap<_, Arc<_>>>>`
//! tracked-process-set pattern for instance/child bookkeeping — the teacher
//! has no bubblewrap/Seatbelt integration of its own, so the spawn wrapper
//! itself is new. Liveness/kill semantics mirror `bloom-git::merge_lock`'s
//! `libc::kill(pid, 0)` probe rather than holding onto `std::process::Child`,
//! since ownership of the child passes to whoever reads its stdout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkPolicy {
    DenyAll,
    AllowList,
    Monitor,
    Disabled,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        NetworkPolicy::DenyAll
    }
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub workspace_path: PathBuf,
    pub network_policy: NetworkPolicy,
    pub allowed_domains: Vec<String>,
    pub writable_paths: Vec<PathBuf>,
    pub deny_read_paths: Vec<PathBuf>,
    pub process_limit: Option<u32>,
}

impl SandboxConfig {
    pub fn new(workspace_path: impl Into<PathBuf>) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        Self {
            enabled: false,
            workspace_path: workspace_path.into(),
            network_policy: NetworkPolicy::DenyAll,
            allowed_domains: Vec::new(),
            writable_paths: Vec::new(),
            deny_read_paths: vec![
                home.join(".ssh"),
                home.join(".aws"),
                home.join(".gnupg"),
            ],
            process_limit: None,
        }
    }

    /// The full writable set: the workspace plus any extra writable paths.
    pub fn writable_set(&self) -> Vec<PathBuf> {
        let mut set = vec![self.workspace_path.clone()];
        set.extend(self.writable_paths.iter().cloned());
        set
    }

    /// The exported runtime network config: `deny-all`/`allow-list` always
    /// carry an explicit (possibly empty) domain list for the runtime to
    /// enforce; `monitor`/`disabled` omit the network section entirely so
    /// the runtime applies no restriction at all.
    pub fn exported_network_config(&self) -> Option<NetworkExport> {
        match self.network_policy {
            NetworkPolicy::DenyAll | NetworkPolicy::AllowList => Some(NetworkExport {
                mode: self.network_policy,
                allowed_domains: self.allowed_domains.clone(),
            }),
            NetworkPolicy::Monitor | NetworkPolicy::Disabled => None,
        }
    }
}

/// The network section of the exported sandbox runtime config — see
/// [`SandboxConfig::exported_network_config`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NetworkExport {
    pub mode: NetworkPolicy,
    pub allowed_domains: Vec<String>,
}

/// Which runtime is available on this host, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SandboxRuntime {
    Bubblewrap,
    Seatbelt,
}

fn detect_runtime() -> Option<SandboxRuntime> {
    if cfg!(target_os = "macos") {
        if PathBuf::from("/usr/bin/sandbox-exec").exists() {
            return Some(SandboxRuntime::Seatbelt);
        }
        return None;
    }
    which("bwrap").map(|_| SandboxRuntime::Bubblewrap)
}

fn which(bin: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(bin))
            .find(|candidate| candidate.is_file())
    })
}

/// A live sandbox instance for one agent: its resolved config plus the pid
/// of every process spawned under it so far.
pub struct SandboxInstance {
    pub config: SandboxConfig,
    pub sandboxed: bool,
    pub created_at: DateTime<Utc>,
    processes: Mutex<Vec<u32>>,
}

impl SandboxInstance {
    /// Resolve the actual program + argv to execute for `command`/`args`:
    /// unchanged when passthrough, wrapped in a `bwrap` invocation when
    /// sandboxed. The caller (an async spawner) is responsible for actually
    /// starting the process and calling [`track`](Self::track) with its pid.
    pub fn wrap_command(&self, command: &str, args: &[String]) -> (String, Vec<String>) {
        if !self.sandboxed {
            return (command.to_string(), args.to_vec());
        }

        let mut bwrap_args = vec!["--die-with-parent".to_string(), "--unshare-all".to_string()];
        match self.config.exported_network_config() {
            Some(NetworkExport { mode: NetworkPolicy::DenyAll, .. }) => {
                // No --share-net: network stays unshared from --unshare-all.
            }
            Some(NetworkExport { allowed_domains, .. }) => {
                // allow-list: share the net namespace but hand the runtime
                // the explicit domain list via the environment, since bwrap
                // itself has no domain-level filter.
                bwrap_args.push("--share-net".to_string());
                bwrap_args.push("--setenv".to_string());
                bwrap_args.push("BLOOM_ALLOWED_DOMAINS".to_string());
                bwrap_args.push(allowed_domains.join(","));
            }
            None => {
                // monitor/disabled: no restriction at all.
                bwrap_args.push("--share-net".to_string());
            }
        }
        for writable in self.config.writable_set() {
            bwrap_args.push("--bind".to_string());
            bwrap_args.push(writable.display().to_string());
            bwrap_args.push(writable.display().to_string());
        }
        bwrap_args.push("--ro-bind".to_string());
        bwrap_args.push("/".to_string());
        bwrap_args.push("/".to_string());
        for deny in &self.config.deny_read_paths {
            bwrap_args.push("--tmpfs".to_string());
            bwrap_args.push(deny.display().to_string());
        }
        bwrap_args.push(command.to_string());
        bwrap_args.extend(args.iter().cloned());

        ("bwrap".to_string(), bwrap_args)
    }

    /// Register a freshly spawned child's pid so `destroy`/`destroy_all`
    /// can reach it.
    pub fn track(&self, pid: u32) {
        self.processes.lock().expect("lock poisoned").push(pid);
    }

    /// Drop a pid from tracking once its owner has reaped it (e.g. the
    /// session manager's own wait loop already knows it exited).
    pub fn untrack(&self, pid: u32) {
        self.processes.lock().expect("lock poisoned").retain(|p| *p != pid);
    }

    /// SIGTERM every tracked pid, wait briefly, then SIGKILL stragglers.
    fn destroy(&self) {
        let pids: Vec<u32> = self.processes.lock().expect("lock poisoned").drain(..).collect();
        for pid in pids {
            terminate_then_kill(pid);
        }
    }

    pub fn process_count(&self) -> usize {
        self.processes.lock().expect("lock poisoned").len()
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn terminate_then_kill(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while pid_alive(pid) && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    if pid_alive(pid) {
        unsafe {
            libc::kill(pid as i32, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn terminate_then_kill(_pid: u32) {}

/// Owns one [`SandboxInstance`] per agent name. `destroy_all` is the
/// orchestrator-wide shutdown hook; every signal/error/before-exit path
/// must call it before the process exits.
#[derive(Clone)]
pub struct SandboxManager {
    instances: Arc<Mutex<HashMap<String, Arc<SandboxInstance>>>>,
}

impl SandboxManager {
    pub fn new() -> Self {
        Self { instances: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Create (or replace) the sandbox instance for `agent_name`. Falls back
    /// to passthrough with a single warning if sandboxing is requested but
    /// the runtime isn't available — never errors.
    pub fn create_instance(
        &self,
        agent_name: &str,
        workspace_path: impl Into<PathBuf>,
        overrides: Option<SandboxConfig>,
    ) -> Arc<SandboxInstance> {
        let config = overrides.unwrap_or_else(|| SandboxConfig::new(workspace_path));
        let runtime = if config.enabled { detect_runtime() } else { None };
        let sandboxed = if config.enabled && runtime.is_none() {
            warn!(agent = agent_name, "sandbox runtime unavailable, falling back to passthrough spawn");
            false
        } else {
            config.enabled
        };

        let instance = Arc::new(SandboxInstance {
            config,
            sandboxed,
            created_at: Utc::now(),
            processes: Mutex::new(Vec::new()),
        });

        let mut instances = self.instances.lock().expect("lock poisoned");
        if let Some(previous) = instances.insert(agent_name.to_string(), Arc::clone(&instance)) {
            previous.destroy();
        }
        instance
    }

    pub fn instance(&self, agent_name: &str) -> Option<Arc<SandboxInstance>> {
        self.instances.lock().expect("lock poisoned").get(agent_name).cloned()
    }

    /// Fetch the agent's instance, creating a disabled (passthrough) one on
    /// the fly if none has been configured yet.
    pub fn instance_or_default(&self, agent_name: &str, workdir: impl Into<PathBuf>) -> Arc<SandboxInstance> {
        self.instance(agent_name).unwrap_or_else(|| self.create_instance(agent_name, workdir, None))
    }

    pub fn destroy_instance(&self, agent_name: &str) {
        if let Some(instance) = self.instances.lock().expect("lock poisoned").remove(agent_name) {
            instance.destroy();
        }
    }

    pub fn destroy_all(&self) {
        let mut instances = self.instances.lock().expect("lock poisoned");
        for (_, instance) in instances.drain() {
            instance.destroy();
        }
    }
}

impl Default for SandboxManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_set_includes_workspace_and_extras() {
        let mut cfg = SandboxConfig::new("/tmp/ws");
        cfg.writable_paths.push(PathBuf::from("/tmp/extra"));
        let set = cfg.writable_set();
        assert_eq!(set, vec![PathBuf::from("/tmp/ws"), PathBuf::from("/tmp/extra")]);
    }

    #[test]
    fn deny_read_paths_default_to_ssh_aws_gnupg() {
        let cfg = SandboxConfig::new("/tmp/ws");
        assert_eq!(cfg.deny_read_paths.len(), 3);
    }

    #[test]
    fn deny_all_and_allow_list_export_an_explicit_domain_list() {
        let mut cfg = SandboxConfig::new("/tmp/ws");
        cfg.network_policy = NetworkPolicy::DenyAll;
        assert_eq!(
            cfg.exported_network_config(),
            Some(NetworkExport { mode: NetworkPolicy::DenyAll, allowed_domains: vec![] })
        );

        cfg.network_policy = NetworkPolicy::AllowList;
        cfg.allowed_domains = vec!["github.com".into()];
        assert_eq!(
            cfg.exported_network_config(),
            Some(NetworkExport {
                mode: NetworkPolicy::AllowList,
                allowed_domains: vec!["github.com".to_string()],
            })
        );
    }

    #[test]
    fn monitor_and_disabled_omit_the_network_section() {
        let mut cfg = SandboxConfig::new("/tmp/ws");
        cfg.network_policy = NetworkPolicy::Monitor;
        assert_eq!(cfg.exported_network_config(), None);
        cfg.network_policy = NetworkPolicy::Disabled;
        assert_eq!(cfg.exported_network_config(), None);
    }

    #[test]
    fn wrap_command_blocks_net_for_deny_all_and_shares_for_allow_list() {
        let mut cfg = SandboxConfig::new("/tmp/ws");
        cfg.network_policy = NetworkPolicy::DenyAll;
        let instance = SandboxInstance { config: cfg, sandboxed: true, created_at: Utc::now(), processes: Mutex::new(Vec::new()) };
        let (_, args) = instance.wrap_command("claude", &[]);
        assert!(!args.contains(&"--share-net".to_string()));

        let mut cfg = SandboxConfig::new("/tmp/ws");
        cfg.network_policy = NetworkPolicy::AllowList;
        cfg.allowed_domains = vec!["github.com".into()];
        let instance = SandboxInstance { config: cfg, sandboxed: true, created_at: Utc::now(), processes: Mutex::new(Vec::new()) };
        let (_, args) = instance.wrap_command("claude", &[]);
        assert!(args.contains(&"--share-net".to_string()));
        assert!(args.iter().any(|a| a == "github.com"));
    }

    #[test]
    fn disabled_sandbox_never_requires_runtime() {
        let mgr = SandboxManager::new();
        let instance = mgr.create_instance("frontend", "/tmp/ws", None);
        assert!(!instance.sandboxed);
    }

    #[test]
    fn creating_a_second_instance_replaces_the_first() {
        let mgr = SandboxManager::new();
        mgr.create_instance("frontend", "/tmp/ws", None);
        let second = mgr.create_instance("frontend", "/tmp/ws2", None);
        assert_eq!(mgr.instance("frontend").unwrap().config.workspace_path, second.config.workspace_path);
    }
}
