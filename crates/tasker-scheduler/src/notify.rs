//! Result notifications: the outbound "task result" feed.
//! Lightweight: a broadcast channel for live listeners plus an in-memory
//! ring buffer for late readers. Rendering is left to the presentation layer.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tasker_core::{TaskResult, TaskStatus};
use tokio::sync::broadcast;

/// History size.
const HISTORY_LIMIT: usize = 100;

/// The result of one task, as announced to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNotification {
    pub task_id: String,
    pub task_name: String,
    pub result: TaskResult,
    pub timestamp: DateTime<Utc>,
}

impl TaskNotification {
    pub fn new(task_id: &str, task_name: &str, result: TaskResult) -> Self {
        Self {
            task_id: task_id.to_string(),
            task_name: task_name.to_string(),
            result,
            timestamp: Utc::now(),
        }
    }

    /// One human-readable line.
    pub fn render(&self) -> String {
        let r = &self.result;
        match r.status {
            TaskStatus::Completed => format!("✅ '{}' completed", self.task_name),
            TaskStatus::Failed => format!(
                "❌ '{}' failed: {}",
                self.task_name,
                r.error.as_deref().unwrap_or("unknown error")
            ),
            TaskStatus::Scheduled => format!(
                "⏰ '{}' scheduled for {}",
                self.task_name,
                r.scheduled_for
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "an unknown time".into())
            ),
            TaskStatus::Canceled => match &r.condition {
                Some(condition) => format!(
                    "⏹️ '{}' canceled: condition '{condition}' never met",
                    self.task_name
                ),
                None => format!("⏹️ '{}' canceled", self.task_name),
            },
            TaskStatus::Waiting => format!("⏳ '{}' waiting", self.task_name),
            TaskStatus::Running => format!("▶️ '{}' running", self.task_name),
        }
    }
}

/// Fans task results out to subscribers and remembers the last 100.
pub struct ResultNotifier {
    sender: broadcast::Sender<TaskNotification>,
    history: Mutex<VecDeque<TaskNotification>>,
}

impl ResultNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HISTORY_LIMIT);
        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    /// Record and broadcast. Having no listener is fine.
    pub fn publish(&self, notification: TaskNotification) {
        tracing::debug!("📣 {}", notification.render());
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push_back(notification.clone());
            // Ring buffer, keep last 100
            if history.len() > HISTORY_LIMIT {
                history.pop_front();
            }
        }
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskNotification> {
        self.sender.subscribe()
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<TaskNotification> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for ResultNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let notifier = ResultNotifier::new();
        let mut rx = notifier.subscribe();
        notifier.publish(TaskNotification::new(
            "t-1",
            "mail",
            TaskResult::with_status(TaskStatus::Completed),
        ));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.task_id, "t-1");
        assert_eq!(got.render(), "✅ 'mail' completed");
    }

    #[test]
    fn test_history_is_bounded() {
        let notifier = ResultNotifier::new();
        for i in 0..(HISTORY_LIMIT + 5) {
            notifier.publish(TaskNotification::new(
                &format!("t-{i}"),
                "x",
                TaskResult::failed("boom"),
            ));
        }
        let history = notifier.history();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].task_id, "t-5");
        assert_eq!(history[0].render(), "❌ 'x' failed: boom");
    }

    #[test]
    fn test_render_canceled_by_exhaustion() {
        let n = TaskNotification::new("t", "nightly", TaskResult::canceled("night"));
        assert_eq!(n.render(), "⏹️ 'nightly' canceled: condition 'night' never met");
    }
}
