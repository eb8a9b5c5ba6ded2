use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use tasker_core::{Condition, ExecutionStrategyConfig, StrategyType, TaskResult, TaskStatus};

use super::ExecutionStrategy;
use crate::conditions::PredicateRegistry;
use crate::task::Task;
use crate::timers::{TimerInfo, TimerOutcome, TimerRegistry};

/// Poll a condition and run the task the first time it holds.
///
/// The first check happens right away, later ones every `interval`.
/// Gives up with `canceled` once `max_attempts` checks have failed. A poller
/// whose timer is re-armed under the same id resolves to `waiting` without
/// emitting anything.
pub struct ConditionalStrategy {
    condition: Condition,
    interval: Duration,
    max_attempts: u32,
    timers: Arc<TimerRegistry>,
    predicates: PredicateRegistry,
}

impl ConditionalStrategy {
    pub fn new(
        condition: Condition,
        interval: Duration,
        max_attempts: u32,
        timers: Arc<TimerRegistry>,
        predicates: PredicateRegistry,
    ) -> Self {
        Self {
            condition,
            interval,
            max_attempts,
            timers,
            predicates,
        }
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl ExecutionStrategy for ConditionalStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Conditional
    }

    fn apply(&self, mut task: Task) -> BoxFuture<'static, TaskResult> {
        let condition = self.condition.clone();
        let interval = self.interval;
        let max_attempts = self.max_attempts;
        let timers = self.timers.clone();
        let predicates = self.predicates.clone();

        task.set_strategy(ExecutionStrategyConfig::Conditional {
            condition: condition.clone(),
            interval_ms: Some(interval.as_millis() as u64),
            max_attempts: Some(max_attempts),
        });
        task.set_status(
            TaskStatus::Waiting,
            format!("Waiting for condition '{condition}'"),
        );
        let mut armed = timers.arm(TimerInfo {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            task_type: task.task_type,
            strategy: StrategyType::Conditional,
            scheduled_for: None,
            armed_at: Utc::now(),
        });

        async move {
            let id = task.id.clone();
            let mut delay = Duration::ZERO;
            let mut attempts: u32 = 0;
            loop {
                match timers.sleep(&mut armed, delay).await {
                    TimerOutcome::Fired => {}
                    TimerOutcome::Cancelled => {
                        tracing::info!("⏹️ Conditional task '{}' canceled", task.name);
                        task.set_status(TaskStatus::Canceled, "Canceled before condition was met");
                        return TaskResult::with_status(TaskStatus::Canceled);
                    }
                    TimerOutcome::Replaced => {
                        // The newer arm owns the task's lifecycle from here.
                        tracing::debug!("⏱️ Conditional task '{}' re-armed, old poller stops", task.name);
                        return TaskResult::with_status(TaskStatus::Waiting);
                    }
                }

                attempts += 1;
                if attempts > max_attempts {
                    timers.disarm(&id, armed.generation());
                    tracing::info!(
                        "⌛ Condition '{condition}' not met after {max_attempts} attempt(s), giving up on '{}'",
                        task.name
                    );
                    task.set_status(
                        TaskStatus::Canceled,
                        format!("Condition '{condition}' not met after {max_attempts} attempt(s)"),
                    );
                    return TaskResult::canceled(condition.describe());
                }

                let met = predicates.evaluate(&condition);
                tracing::debug!(
                    "🔎 Condition '{condition}' for '{}': attempt {attempts}/{max_attempts} -> {met}",
                    task.name
                );
                if met {
                    // Claim the timer; losing means a cancel or a re-arm got there first.
                    if !timers.disarm(&id, armed.generation()) {
                        if timers.contains(&id) {
                            return TaskResult::with_status(TaskStatus::Waiting);
                        }
                        task.set_status(TaskStatus::Canceled, "Canceled before condition was met");
                        return TaskResult::with_status(TaskStatus::Canceled);
                    }
                    let started_at = Utc::now();
                    return match task.execute().await {
                        Ok(()) => TaskResult::completed(started_at, Utc::now()),
                        Err(e) => TaskResult::failed(e.to_string()).timed(started_at, Utc::now()),
                    };
                }
                delay = interval;
            }
        }
        .boxed()
    }

    fn cancel(&self, task_id: &str) -> bool {
        self.timers.cancel(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::strategy::testing::status_recorder;
    use crate::task::testing::counting_factory;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;
    use tasker_core::{TaskPayload, TaskType};

    fn strategy(
        condition: &str,
        interval_ms: u64,
        max_attempts: u32,
        predicates: PredicateRegistry,
    ) -> ConditionalStrategy {
        ConditionalStrategy::new(
            Condition::from(condition),
            Duration::from_millis(interval_ms),
            max_attempts,
            Arc::new(TimerRegistry::new()),
            predicates,
        )
    }

    #[tokio::test]
    async fn test_true_on_first_check_runs_without_delay() {
        let predicates = PredicateRegistry::new();
        predicates.register("ready", || Ok(true));
        let (factory, runs) = counting_factory(Arc::new(EventBus::new()));
        let task = factory
            .create("go", TaskType::Social, TaskPayload::new(), None)
            .unwrap();

        let started = Instant::now();
        let result = strategy("ready", 60_000, 10, predicates).apply(task).await;
        assert_eq!(result.status, TaskStatus::Completed);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_cancels() {
        let predicates = PredicateRegistry::new();
        let checks = Arc::new(AtomicU32::new(0));
        let c = checks.clone();
        predicates.register("never", move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        });
        let bus = Arc::new(EventBus::new());
        let seen = status_recorder(&bus);
        let (factory, runs) = counting_factory(bus.clone());
        let task = factory
            .create("wait", TaskType::Clean, TaskPayload::new(), None)
            .unwrap();

        let result = strategy("never", 5, 3, predicates).apply(task).await;
        assert_eq!(result.status, TaskStatus::Canceled);
        assert_eq!(result.condition.as_deref(), Some("never"));
        assert_eq!(checks.load(Ordering::SeqCst), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![TaskStatus::Waiting, TaskStatus::Canceled]
        );
    }

    #[tokio::test]
    async fn test_becomes_true_later() {
        let predicates = PredicateRegistry::new();
        let checks = Arc::new(AtomicU32::new(0));
        let c = checks.clone();
        predicates.register("third-time", move || {
            Ok(c.fetch_add(1, Ordering::SeqCst) >= 2)
        });
        let (factory, runs) = counting_factory(Arc::new(EventBus::new()));
        let task = factory
            .create("eventually", TaskType::Email, TaskPayload::new(), None)
            .unwrap();

        let result = strategy("third-time", 5, 10, predicates).apply(task).await;
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(checks.load(Ordering::SeqCst), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_condition_met() {
        let predicates = PredicateRegistry::new();
        predicates.register("never", || Ok(false));
        let (factory, runs) = counting_factory(Arc::new(EventBus::new()));
        let task = factory
            .create("stop", TaskType::Email, TaskPayload::new(), None)
            .unwrap();
        let id = task.id.clone();

        let s = strategy("never", 10_000, 10, predicates);
        let pending = tokio::spawn(s.apply(task));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(s.cancel(&id));
        let result = pending.await.unwrap();
        assert_eq!(result.status, TaskStatus::Canceled);
        assert!(result.condition.is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!s.cancel(&id));
    }

    #[tokio::test]
    async fn test_rearm_retires_old_poller_quietly() {
        let predicates = PredicateRegistry::new();
        predicates.register("never", || Ok(false));
        let bus = Arc::new(EventBus::new());
        let seen = status_recorder(&bus);
        let (factory, _) = counting_factory(bus.clone());
        let s = strategy("never", 10_000, 10, predicates);
        let first = factory
            .create("poll", TaskType::Email, TaskPayload::new(), Some("same".into()))
            .unwrap();
        let second = factory
            .create("poll", TaskType::Email, TaskPayload::new(), Some("same".into()))
            .unwrap();

        let old = tokio::spawn(s.apply(first));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _new = s.apply(second);

        let result = old.await.unwrap();
        assert_eq!(result.status, TaskStatus::Waiting);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![TaskStatus::Waiting, TaskStatus::Waiting]
        );
        assert!(s.cancel("same"));
    }

    #[tokio::test]
    async fn test_erroring_predicate_counts_as_not_met() {
        let predicates = PredicateRegistry::new();
        predicates.register("broken", || Err("sensor offline".into()));
        let (factory, runs) = counting_factory(Arc::new(EventBus::new()));
        let task = factory
            .create("t", TaskType::Email, TaskPayload::new(), None)
            .unwrap();

        let result = strategy("broken", 1, 2, predicates).apply(task).await;
        assert_eq!(result.status, TaskStatus::Canceled);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
