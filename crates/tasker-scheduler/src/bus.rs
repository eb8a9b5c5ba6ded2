//! In-process event bus for task lifecycle notifications.
//!
//! Dispatch is synchronous and fire-and-forget: every subscriber runs on
//! the producer's call stack, and a failing (or panicking) subscriber is
//! logged and skipped so the producer never sees it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tasker_core::{StrategyType, TaskPayload, TaskStatus, TaskType};

/// Event topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskEventKind {
    Waiting,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl TaskEventKind {
    /// Topic name as seen by subscribers.
    pub fn topic(&self) -> &'static str {
        match self {
            TaskEventKind::Waiting => "taskWaiting",
            TaskEventKind::Running => "taskRunning",
            TaskEventKind::Completed => "taskCompleted",
            TaskEventKind::Failed => "taskFailed",
            TaskEventKind::Canceled => "taskCanceled",
        }
    }

    /// `Scheduled` is announced on the waiting topic.
    pub fn for_status(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Waiting | TaskStatus::Scheduled => TaskEventKind::Waiting,
            TaskStatus::Running => TaskEventKind::Running,
            TaskStatus::Completed => TaskEventKind::Completed,
            TaskStatus::Failed => TaskEventKind::Failed,
            TaskStatus::Canceled => TaskEventKind::Canceled,
        }
    }
}

/// One lifecycle transition of a task instance.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task_id: String,
    pub task_name: String,
    pub task_type: TaskType,
    pub strategy: StrategyType,
    pub status: TaskStatus,
    pub message: String,
    /// Payload snapshot at the time of the transition.
    pub payload: TaskPayload,
    pub timestamp: DateTime<Utc>,
}

type Handler = Arc<dyn Fn(&TaskEvent) -> Result<(), String> + Send + Sync>;

struct Subscription {
    id: u64,
    topic: Option<TaskEventKind>,
    handler: Handler,
}

/// Handle returned by `on`/`on_any`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Publish/subscribe channel for task events.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to one topic.
    pub fn on<F>(&self, kind: TaskEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&TaskEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        self.subscribe(Some(kind), Arc::new(handler))
    }

    /// Subscribe to every topic.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&TaskEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        self.subscribe(None, Arc::new(handler))
    }

    fn subscribe(&self, topic: Option<TaskEventKind>, handler: Handler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription { id, topic, handler });
        SubscriptionId(id)
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id.0);
        subs.len() < before
    }

    /// Deliver an event to every matching subscriber.
    /// Returns how many subscribers handled it successfully.
    pub fn emit(&self, event: &TaskEvent) -> usize {
        // Snapshot so handlers may subscribe/emit without deadlocking.
        let handlers: Vec<Handler> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.topic.is_none_or(|t| t == event.kind))
            .map(|s| s.handler.clone())
            .collect();

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => tracing::warn!(
                    "⚠️ Subscriber failed on {} for task {}: {e}",
                    event.kind.topic(),
                    event.task_id
                ),
                Err(_) => tracing::error!(
                    "💥 Subscriber panicked on {} for task {}",
                    event.kind.topic(),
                    event.task_id
                ),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
