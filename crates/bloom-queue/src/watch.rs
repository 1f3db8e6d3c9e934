//! Debounced filesystem watch over the queue directories.
//!
//! Grounded on `at-core/file_watcher.rs`'s `notify::recommended_watcher` +
//! `crossbeam_channel::unbounded()` wiring. That file notes `notify` 7.x
//! dropped its built-in debounce and leaves its own `debounce_ms` field
//! unused (no `notify-debouncer-*` crate in the workspace); here the
//! coalescing window is actually applied, so a burst of writes to the same
//! file collapses to a single callback instead of firing once per write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

use crate::error::QueueError;

const DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEventKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone)]
pub struct QueueEvent {
    pub path: PathBuf,
    pub kind: QueueEventKind,
}

/// Handle owning the background watch thread. Dropping it stops the
/// watcher and joins the thread.
pub struct QueueWatcher {
    _watcher: RecommendedWatcher,
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for QueueWatcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Watch `dir` (non-recursively) and invoke `on_event` for each coalesced
/// `.json` change, fired from a dedicated background thread.
pub fn watch(
    dir: &Path,
    mut on_event: impl FnMut(QueueEvent) + Send + 'static,
) -> Result<QueueWatcher, QueueError> {
    std::fs::create_dir_all(dir)?;
    let (tx, rx) = crossbeam_channel::unbounded();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            let _ = tx.send(event);
        }
    })
    .map_err(|e| QueueError::Watch(e.to_string()))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| QueueError::Watch(e.to_string()))?;

    let running = Arc::new(AtomicBool::new(true));
    let running_thread = Arc::clone(&running);

    let thread = std::thread::spawn(move || {
        let mut last_seen: HashMap<PathBuf, Instant> = HashMap::new();
        while running_thread.load(Ordering::SeqCst) {
            let event = match rx.recv_timeout(DEBOUNCE) {
                Ok(event) => event,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            };
            let Some(kind) = map_kind(&event.kind) else { continue };
            for path in event.paths {
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let now = Instant::now();
                let recently_seen = last_seen
                    .get(&path)
                    .map(|t| now.duration_since(*t) < DEBOUNCE)
                    .unwrap_or(false);
                last_seen.insert(path.clone(), now);
                if recently_seen {
                    continue;
                }
                on_event(QueueEvent { path, kind });
            }
        }
    });

    Ok(QueueWatcher { _watcher: watcher, running, thread: Some(thread) })
}

fn map_kind(kind: &notify::EventKind) -> Option<QueueEventKind> {
    use notify::EventKind;
    match kind {
        EventKind::Create(_) => Some(QueueEventKind::Added),
        EventKind::Modify(_) => Some(QueueEventKind::Modified),
        EventKind::Remove(_) => Some(QueueEventKind::Removed),
        _ => {
            warn!(?kind, "ignoring unmapped notify event kind");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn watch_reports_created_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);

        let _watcher = watch(dir.path(), move |event| {
            seen_cb.lock().unwrap().push(event);
        })
        .unwrap();

        std::fs::write(dir.path().join("q1.json"), "{}").unwrap();
        std::thread::sleep(Duration::from_millis(500));

        let events = seen.lock().unwrap();
        assert!(events.iter().any(|e| e.path.ends_with("q1.json")));
    }
}
