//! The Event Bus (C8): a typed, tagged-union event stream fanned out to
//! every subscribed adapter (CLI renderer, TUI, log sink, future web UI).
//!
//! `Event` carries only primitive data and ids — consumers resolve full
//! detail (task title, step instructions, ...) from [`bloom_core`] by id.
//! Grounded on `at-bridge/event_bus.rs`'s `Arc<Mutex<Vec<flume::Sender<_>>>>`
//! fan-out, specialised to `Event` instead of a generic bridge protocol.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// The full Bloom event taxonomy, tagged on the wire as
/// `{"type": "agent:started", "payload": {...}}`.
///
/// Deliberately a single flat enum (not a generic `{event_type: String, ...}`
/// envelope) so that every variant's payload is concretely typed and
/// exhaustive matching catches new event kinds at compile time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    #[serde(rename = "agent:started")]
    AgentStarted { agent_name: String },
    #[serde(rename = "agent:idle")]
    AgentIdle { agent_name: String },
    #[serde(rename = "agent:output")]
    AgentOutput {
        agent_name: String,
        task_id: Option<String>,
        text: String,
    },
    #[serde(rename = "agent:process_started")]
    AgentProcessStarted {
        agent_name: String,
        task_id: Option<String>,
        pid: u32,
        command: String,
    },
    #[serde(rename = "agent:process_ended")]
    AgentProcessEnded {
        agent_name: String,
        task_id: Option<String>,
        exit_code: Option<i32>,
        reason: String,
    },

    #[serde(rename = "task:found")]
    TaskFound { agent_name: String, task_id: String },
    #[serde(rename = "task:started")]
    TaskStarted { agent_name: String, task_id: String },
    #[serde(rename = "task:completed")]
    TaskCompleted { agent_name: String, task_id: String },
    #[serde(rename = "task:failed")]
    TaskFailed {
        agent_name: String,
        task_id: String,
        error: String,
    },
    #[serde(rename = "task:blocked")]
    TaskBlocked {
        agent_name: String,
        task_id: String,
        reason: String,
    },

    #[serde(rename = "step:started")]
    StepStarted {
        agent_name: String,
        task_id: String,
        step_id: String,
    },
    #[serde(rename = "step:completed")]
    StepCompleted {
        agent_name: String,
        task_id: String,
        step_id: String,
    },
    #[serde(rename = "step:failed")]
    StepFailed {
        agent_name: String,
        task_id: String,
        step_id: String,
        error: String,
    },
    #[serde(rename = "steps:all_completed")]
    StepsAllCompleted { agent_name: String, task_id: String },

    #[serde(rename = "git:pulling")]
    GitPulling { repo: String },
    #[serde(rename = "git:pulled")]
    GitPulled { repo: String, branch: String },
    #[serde(rename = "git:pushing")]
    GitPushing { repo: String, branch: String },
    #[serde(rename = "git:pushed")]
    GitPushed { repo: String, branch: String },
    #[serde(rename = "git:pr_creating")]
    GitPrCreating { repo: String, task_id: String },
    #[serde(rename = "git:pr_created")]
    GitPrCreated {
        repo: String,
        task_id: String,
        url: String,
        already_existed: bool,
    },
    #[serde(rename = "git:merging")]
    GitMerging {
        repo: String,
        source: String,
        target: String,
    },
    #[serde(rename = "git:merged")]
    GitMerged {
        repo: String,
        source: String,
        target: String,
    },
    #[serde(rename = "git:merge_conflict")]
    GitMergeConflict {
        repo: String,
        task_id: String,
        files: Vec<String>,
    },
    #[serde(rename = "git:cleanup")]
    GitCleanup {
        repo: String,
        task_id: String,
        worktree_removed: bool,
        branch_deleted: bool,
    },
    #[serde(rename = "git:uncommitted_changes")]
    GitUncommittedChanges { repo: String, task_id: String },

    #[serde(rename = "worktree:creating")]
    WorktreeCreating {
        repo: String,
        branch: String,
        path: String,
    },
    #[serde(rename = "worktree:created")]
    WorktreeCreated {
        repo: String,
        branch: String,
        path: String,
    },

    #[serde(rename = "merge:lock_waiting")]
    MergeLockWaiting {
        repo: String,
        target_branch: String,
        holder_agent: Option<String>,
    },
    #[serde(rename = "merge:lock_acquired")]
    MergeLockAcquired {
        repo: String,
        target_branch: String,
        agent_name: String,
    },
    #[serde(rename = "merge:lock_timeout")]
    MergeLockTimeout { repo: String, target_branch: String },
    #[serde(rename = "merge:retry")]
    MergeRetry {
        repo: String,
        target_branch: String,
        attempt: u32,
    },
    #[serde(rename = "merge:conflict_resolving")]
    MergeConflictResolving {
        repo: String,
        task_id: String,
        attempt: u32,
    },
    #[serde(rename = "merge:conflict_resolved")]
    MergeConflictResolved {
        repo: String,
        task_id: String,
        success: bool,
    },

    #[serde(rename = "session:corrupted")]
    SessionCorrupted {
        agent_name: String,
        task_id: String,
        bad_session_id: String,
    },
    #[serde(rename = "commit:retry")]
    CommitRetry {
        agent_name: String,
        task_id: String,
        attempt: u32,
    },

    #[serde(rename = "question:created")]
    QuestionCreated {
        question_id: String,
        agent_name: String,
    },
    #[serde(rename = "question:answered")]
    QuestionAnswered { question_id: String, answer: String },

    #[serde(rename = "error")]
    Error {
        agent_name: Option<String>,
        task_id: Option<String>,
        message: String,
    },
    #[serde(rename = "log")]
    Log { level: String, message: String },
}

/// A lightweight fan-out bus built on flume channels.
///
/// Each call to [`subscribe`](EventBus::subscribe) creates a new receiver
/// that sees every event published from that point forward, delivered in
/// publish order on the emitter's own execution context (no internal
/// buffering thread). Disconnected subscribers are pruned on the next
/// publish.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<flume::Sender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> flume::Receiver<Event> {
        let (tx, rx) = flume::unbounded();
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.push(tx);
        rx
    }

    /// Publish to every current subscriber. Never blocks and never fails —
    /// a subscriber with a dropped receiver is simply pruned.
    pub fn publish(&self, event: Event) {
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        tracing::trace!(?event, "event published");
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("EventBus lock poisoned").len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();

        bus.publish(Event::AgentStarted {
            agent_name: "frontend".into(),
        });
        bus.publish(Event::AgentIdle {
            agent_name: "frontend".into(),
        });

        for rx in [&rx1, &rx2] {
            assert!(matches!(rx.try_recv().unwrap(), Event::AgentStarted { .. }));
            assert!(matches!(rx.try_recv().unwrap(), Event::AgentIdle { .. }));
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        {
            let _rx = bus.subscribe();
            assert_eq!(bus.subscriber_count(), 1);
        }
        bus.publish(Event::Log {
            level: "info".into(),
            message: "hi".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn tagged_union_round_trips_through_json() {
        let event = Event::GitPrCreated {
            repo: "r".into(),
            task_id: "t1".into(),
            url: "https://example.com/pr/1".into(),
            already_existed: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "git:pr_created");
        assert_eq!(json["payload"]["task_id"], "t1");

        let round_tripped: Event = serde_json::from_value(json).unwrap();
        assert!(matches!(round_tripped, Event::GitPrCreated { .. }));
    }
}
