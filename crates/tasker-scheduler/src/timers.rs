//! Timer registry: one live timer per task id.
//!
//! Owned by the runner and shared with the scheduled/conditional
//! strategies. Arming a task id that already has a timer replaces the old
//! one, whose waiter then stops quietly. A timer claims (disarms) its entry when it fires; from that point
//! the task is running and can no longer be cancelled.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tasker_core::{StrategyType, TaskType};
use tokio::sync::oneshot;

/// Metadata about an armed timer.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerInfo {
    pub task_id: String,
    pub task_name: String,
    pub task_type: TaskType,
    pub strategy: StrategyType,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub armed_at: DateTime<Utc>,
}

struct TimerEntry {
    generation: u64,
    cancel: oneshot::Sender<()>,
    info: TimerInfo,
}

#[derive(Default)]
struct TimerTable {
    entries: HashMap<String, TimerEntry>,
    next_generation: u64,
}

/// Token handed to the timer future by `arm`.
pub struct ArmedTimer {
    generation: u64,
    cancelled: oneshot::Receiver<()>,
}

impl ArmedTimer {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// How a timer wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Fired,
    Cancelled,
    /// A newer `arm` for the same task id took over the entry.
    Replaced,
}

/// Registry of live timers indexed by task id.
#[derive(Default)]
pub struct TimerRegistry {
    table: Mutex<TimerTable>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer for `info.task_id`, replacing any prior one.
    pub fn arm(&self, info: TimerInfo) -> ArmedTimer {
        let (tx, rx) = oneshot::channel();
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.next_generation += 1;
        let generation = table.next_generation;
        let task_id = info.task_id.clone();
        let entry = TimerEntry {
            generation,
            cancel: tx,
            info,
        };
        if table.entries.insert(task_id.clone(), entry).is_some() {
            // Dropping the old sender wakes the old waiter as replaced.
            tracing::debug!("⏱️ Re-armed timer for task {task_id}, previous timer cleared");
        }
        ArmedTimer {
            generation,
            cancelled: rx,
        }
    }

    /// Claim the entry for a timer that just fired.
    /// Fails when the timer was cancelled or replaced in the meantime.
    pub fn disarm(&self, task_id: &str, generation: u64) -> bool {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        match table.entries.get(task_id) {
            Some(entry) if entry.generation == generation => {
                table.entries.remove(task_id);
                true
            }
            _ => false,
        }
    }

    /// Cancel the live timer of a task. No-op (false) when there is none.
    pub fn cancel(&self, task_id: &str) -> bool {
        let removed = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .remove(task_id);
        match removed {
            Some(entry) => {
                let _ = entry.cancel.send(());
                tracing::info!("⏹️ Timer for task '{}' cancelled", entry.info.task_name);
                true
            }
            None => false,
        }
    }

    /// Wait `delay` unless the timer is cancelled or replaced first, then
    /// claim the entry. A timer that lost the race with `cancel` reports
    /// `Cancelled`, one that lost it with a re-arm reports `Replaced`.
    pub async fn wait(&self, task_id: &str, mut armed: ArmedTimer, delay: Duration) -> TimerOutcome {
        match self.sleep(&mut armed, delay).await {
            TimerOutcome::Fired => {}
            stopped => return stopped,
        }
        if self.disarm(task_id, armed.generation) {
            TimerOutcome::Fired
        } else if self.contains(task_id) {
            TimerOutcome::Replaced
        } else {
            TimerOutcome::Cancelled
        }
    }

    /// Wait `delay` without claiming the entry, so the same timer can be
    /// reused across polling ticks. Must not be called again once it
    /// returned anything but `Fired`.
    pub async fn sleep(&self, armed: &mut ArmedTimer, delay: Duration) -> TimerOutcome {
        tokio::select! {
            _ = tokio::time::sleep(delay) => TimerOutcome::Fired,
            signal = &mut armed.cancelled => match signal {
                Ok(()) => TimerOutcome::Cancelled,
                // Sender dropped without a cancel: the entry was replaced.
                Err(_) => TimerOutcome::Replaced,
            },
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .contains_key(task_id)
    }

    pub fn info(&self, task_id: &str) -> Option<TimerInfo> {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(task_id)
            .map(|e| e.info.clone())
    }

    /// Live timers of scheduled tasks, soonest first.
    pub fn scheduled(&self) -> Vec<TimerInfo> {
        let mut out: Vec<TimerInfo> = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .values()
            .filter(|e| e.info.strategy == StrategyType::Scheduled)
            .map(|e| e.info.clone())
            .collect();
        out.sort_by_key(|i| i.scheduled_for);
        out
    }

    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn info(id: &str, strategy: StrategyType) -> TimerInfo {
        TimerInfo {
            task_id: id.into(),
            task_name: format!("task {id}"),
            task_type: TaskType::Email,
            strategy,
            scheduled_for: None,
            armed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_fires_and_clears_entry() {
        let timers = TimerRegistry::new();
        let armed = timers.arm(info("a", StrategyType::Scheduled));
        assert!(timers.contains("a"));
        let outcome = timers.wait("a", armed, Duration::from_millis(10)).await;
        assert_eq!(outcome, TimerOutcome::Fired);
        assert!(timers.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_fire() {
        let timers = Arc::new(TimerRegistry::new());
        let armed = timers.arm(info("b", StrategyType::Scheduled));
        let t = timers.clone();
        let waiter =
            tokio::spawn(async move { t.wait("b", armed, Duration::from_secs(30)).await });
        assert!(timers.cancel("b"));
        assert_eq!(waiter.await.unwrap(), TimerOutcome::Cancelled);
        // Second cancel is a no-op.
        assert!(!timers.cancel("b"));
    }

    #[tokio::test]
    async fn test_rearm_replaces_previous_timer() {
        let timers = Arc::new(TimerRegistry::new());
        let first = timers.arm(info("c", StrategyType::Conditional));
        let t = timers.clone();
        let old = tokio::spawn(async move { t.wait("c", first, Duration::from_secs(30)).await });
        let second = timers.arm(info("c", StrategyType::Conditional));

        assert_eq!(old.await.unwrap(), TimerOutcome::Replaced);
        assert_eq!(timers.len(), 1);
        assert!(timers.contains("c"));
        assert_eq!(
            timers.wait("c", second, Duration::ZERO).await,
            TimerOutcome::Fired
        );
    }

    #[tokio::test]
    async fn test_sleep_keeps_entry_across_ticks() {
        let timers = TimerRegistry::new();
        let mut armed = timers.arm(info("p", StrategyType::Conditional));
        for _ in 0..2 {
            assert_eq!(
                timers.sleep(&mut armed, Duration::from_millis(1)).await,
                TimerOutcome::Fired
            );
            assert!(timers.contains("p"));
        }
        assert!(timers.cancel("p"));
        assert_eq!(
            timers.sleep(&mut armed, Duration::from_secs(30)).await,
            TimerOutcome::Cancelled
        );
        assert!(!timers.disarm("p", armed.generation()));
    }

    #[test]
    fn test_cancel_unknown_is_noop() {
        let timers = TimerRegistry::new();
        assert!(!timers.cancel("missing"));
    }

    #[test]
    fn test_scheduled_snapshot_filters_conditional() {
        let timers = TimerRegistry::new();
        let _a = timers.arm(info("s", StrategyType::Scheduled));
        let _b = timers.arm(info("w", StrategyType::Conditional));
        let scheduled = timers.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].task_id, "s");
    }
}
