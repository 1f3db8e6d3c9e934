//! Cross-process merge lock (C6): at most one non-stale lock per
//! `(repo, targetBranch)`.
//!
//! Grounded on `at-core/lockfile.rs::DaemonLockfile` — atomic `O_CREAT |
//! O_EXCL` creation plus a `kill(pid, 0)` liveness probe for staleness,
//! generalized from a single well-known daemon lockfile path to one lock
//! file per `(repo, targetBranch)` under `<workspace>/.merge-locks/`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MergeLockError;

const STALE_AFTER: chrono::Duration = chrono::Duration::minutes(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeLock {
    pub agent_name: String,
    pub source_branch: String,
    pub target_branch: String,
    pub acquired_at: DateTime<Utc>,
    pub pid: u32,
}

impl MergeLock {
    pub fn is_stale(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.acquired_at);
        age > STALE_AFTER || !pid_alive(self.pid)
    }
}

pub enum AcquireOutcome {
    Acquired,
    HeldBy(MergeLock),
}

pub fn lock_path(merge_locks_dir: &Path, repo: &str, target_branch: &str) -> PathBuf {
    let sanitized = target_branch.replace('/', "-");
    merge_locks_dir.join(format!("{repo}-{sanitized}.lock"))
}

/// `acquireMergeLock`: attempt to take the lock for `(repo, targetBranch)`.
/// Steals a stale lock (dead holder or age > 10 min) in place.
pub fn acquire(
    merge_locks_dir: &Path,
    repo: &str,
    target_branch: &str,
    agent_name: &str,
    source_branch: &str,
) -> Result<AcquireOutcome, MergeLockError> {
    std::fs::create_dir_all(merge_locks_dir)?;
    let path = lock_path(merge_locks_dir, repo, target_branch);

    let lock = MergeLock {
        agent_name: agent_name.to_string(),
        source_branch: source_branch.to_string(),
        target_branch: target_branch.to_string(),
        acquired_at: Utc::now(),
        pid: std::process::id(),
    };

    match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(mut file) => {
            let json = serde_json::to_string_pretty(&lock)
                .map_err(|source| MergeLockError::Parse { path: path.clone(), source })?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            Ok(AcquireOutcome::Acquired)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            match read(&path)? {
                Some(existing) if !existing.is_stale() => Ok(AcquireOutcome::HeldBy(existing)),
                _ => {
                    tracing::info!(repo, target_branch, "stealing stale merge lock");
                    write_lock(&path, &lock)?;
                    Ok(AcquireOutcome::Acquired)
                }
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn write_lock(path: &Path, lock: &MergeLock) -> Result<(), MergeLockError> {
    let tmp = path.with_extension("lock.tmp");
    let json = serde_json::to_string_pretty(lock)
        .map_err(|source| MergeLockError::Parse { path: path.to_path_buf(), source })?;
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read(path: &Path) -> Result<Option<MergeLock>, MergeLockError> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            match serde_json::from_str(&text) {
                Ok(lock) => Ok(Some(lock)),
                Err(_) => Ok(None), // corrupt lock file is treated as stale
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// `releaseMergeLock`: idempotent delete.
pub fn release(merge_locks_dir: &Path, repo: &str, target_branch: &str) -> Result<(), MergeLockError> {
    let path = lock_path(merge_locks_dir, repo, target_branch);
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// `waitForMergeLock`: poll `acquire` until success or `max_wait`. Invokes
/// `on_waiting(holder, elapsed)` on every unsuccessful poll so the caller
/// can emit `merge:lock_waiting`.
pub fn wait_for_lock(
    merge_locks_dir: &Path,
    repo: &str,
    target_branch: &str,
    agent_name: &str,
    source_branch: &str,
    poll_interval: Duration,
    max_wait: Duration,
    mut on_waiting: impl FnMut(&MergeLock, Duration),
) -> Result<(), MergeLockError> {
    let start = std::time::Instant::now();
    loop {
        match acquire(merge_locks_dir, repo, target_branch, agent_name, source_branch)? {
            AcquireOutcome::Acquired => return Ok(()),
            AcquireOutcome::HeldBy(holder) => {
                let elapsed = start.elapsed();
                if elapsed >= max_wait {
                    return Err(MergeLockError::Timeout {
                        repo: repo.to_string(),
                        target_branch: target_branch.to_string(),
                        waited_ms: elapsed.as_millis() as u64,
                    });
                }
                on_waiting(&holder, elapsed);
                std::thread::sleep(poll_interval.min(max_wait.saturating_sub(elapsed)));
            }
        }
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only probes existence, never delivered.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        match acquire(dir.path(), "r", "main", "frontend", "feature/x").unwrap() {
            AcquireOutcome::Acquired => {}
            AcquireOutcome::HeldBy(_) => panic!("expected to acquire a fresh lock"),
        }
        assert!(lock_path(dir.path(), "r", "main").exists());

        release(dir.path(), "r", "main").unwrap();
        assert!(!lock_path(dir.path(), "r", "main").exists());
    }

    #[test]
    fn second_acquire_reports_holder() {
        let dir = tempfile::tempdir().unwrap();
        acquire(dir.path(), "r", "main", "frontend", "feature/x").unwrap();
        match acquire(dir.path(), "r", "main", "backend", "feature/y").unwrap() {
            AcquireOutcome::HeldBy(lock) => assert_eq!(lock.agent_name, "frontend"),
            AcquireOutcome::Acquired => panic!("expected contention"),
        }
    }

    #[test]
    fn stale_lock_with_dead_pid_is_stolen() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path(), "r", "main");
        let stale = MergeLock {
            agent_name: "ghost".into(),
            source_branch: "feature/ghost".into(),
            target_branch: "main".into(),
            acquired_at: Utc::now(),
            pid: 4_000_000,
        };
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        match acquire(dir.path(), "r", "main", "frontend", "feature/x").unwrap() {
            AcquireOutcome::Acquired => {}
            AcquireOutcome::HeldBy(_) => panic!("stale lock with dead pid should be stolen"),
        }
    }

    #[test]
    fn aged_lock_is_stale_even_with_live_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path(), "r", "main");
        let stale = MergeLock {
            agent_name: "ghost".into(),
            source_branch: "feature/ghost".into(),
            target_branch: "main".into(),
            acquired_at: Utc::now() - chrono::Duration::minutes(11),
            pid: std::process::id(),
        };
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        assert!(stale.is_stale());
        match acquire(dir.path(), "r", "main", "frontend", "feature/x").unwrap() {
            AcquireOutcome::Acquired => {}
            AcquireOutcome::HeldBy(_) => panic!("aged lock should be stale"),
        }
    }

    #[test]
    fn wait_for_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        acquire(dir.path(), "r", "main", "frontend", "feature/x").unwrap();

        let err = wait_for_lock(
            dir.path(),
            "r",
            "main",
            "backend",
            "feature/y",
            Duration::from_millis(5),
            Duration::from_millis(20),
            |_, _| {},
        )
        .unwrap_err();
        assert!(matches!(err, MergeLockError::Timeout { .. }));
    }
}
