//! Startup recovery: rehydrates scheduled and conditional work left in the
//! record store by a previous process.
//!
//! Scheduled records are handled first: past-due ones start running right
//! away, side by side, and future ones are re-armed under the same id.
//! Waiting records are then re-armed as conditional tasks. Finally the
//! past-due runs are awaited and their outcome is persisted. Every record
//! has its own error boundary; one bad record never stops the rest.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tasker_core::types::parse_timestamp;
use tasker_core::{
    Condition, ExecutionStrategyConfig, RecordPatch, RecordResult, Result, StrategyType,
    TaskRecord, TaskStatus, TaskerError,
};
use tokio::task::JoinHandle;

use crate::log::AuditEntry;
use crate::runner::TaskRunner;

/// What `recover` did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Past-due scheduled records that ran and completed.
    pub executed: usize,
    /// Past-due scheduled records whose run failed.
    pub failed: usize,
    pub rearmed_scheduled: usize,
    pub rearmed_conditional: usize,
    /// Conditional records re-armed with the default condition.
    pub degraded: usize,
    /// Records that could not be recovered.
    pub skipped: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.executed + self.failed + self.rearmed_scheduled + self.rearmed_conditional
    }
}

enum Recovered {
    Executed,
    Failed,
    RearmedScheduled,
    RearmedConditional { degraded: bool },
}

enum ScheduledRecovery {
    Rearmed,
    Overdue(JoinHandle<Result<()>>),
}

impl TaskRunner {
    /// Recover persisted work. Call once at startup, before new work is
    /// accepted. Without a store this is a no-op.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let Some(store) = self.shared.store.clone() else {
            return Ok(report);
        };
        let records = store.get_all()?;
        let now = Utc::now();

        let (scheduled, waiting): (Vec<_>, Vec<_>) = records
            .into_iter()
            .filter(|r| matches!(r.result.status, TaskStatus::Scheduled | TaskStatus::Waiting))
            .partition(|r| r.result.status == TaskStatus::Scheduled);

        let mut overdue = Vec::new();
        for record in scheduled {
            let id = record.id.clone();
            match self.recover_scheduled(record, now) {
                Ok(ScheduledRecovery::Rearmed) => report.count(Recovered::RearmedScheduled),
                Ok(ScheduledRecovery::Overdue(handle)) => overdue.push((id, handle)),
                Err(e) => {
                    tracing::warn!("⚠️ Skipping scheduled record {id}: {e}");
                    report.skipped += 1;
                }
            }
        }
        for record in waiting {
            let id = record.id.clone();
            match self.recover_conditional(record) {
                Ok(outcome) => report.count(outcome),
                Err(e) => {
                    tracing::warn!("⚠️ Skipping conditional record {id}: {e}");
                    report.skipped += 1;
                }
            }
        }
        for (task_id, handle) in overdue {
            let outcome = self.collect_overdue(&task_id, handle).await;
            report.count(outcome);
        }

        tracing::info!(
            "♻️ Recovery done: {} executed, {} failed, {} scheduled, {} conditional ({} degraded), {} skipped",
            report.executed,
            report.failed,
            report.rearmed_scheduled,
            report.rearmed_conditional,
            report.degraded,
            report.skipped
        );
        Ok(report)
    }

    fn recover_scheduled(
        &self,
        record: TaskRecord,
        now: DateTime<Utc>,
    ) -> Result<ScheduledRecovery> {
        let at = record
            .result
            .scheduled_for
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or_else(|| {
                TaskerError::Store(format!(
                    "bad scheduled_for {:?}",
                    record.result.scheduled_for
                ))
            })?;
        let config = ExecutionStrategyConfig::scheduled_at(at);
        let mut task =
            self.shared
                .factory
                .create(&record.name, record.task_type, record.payload, Some(record.id))?;

        if at > now {
            self.launch(task, config, None)?;
            return Ok(ScheduledRecovery::Rearmed);
        }

        tracing::info!(
            "⏰ Task '{}' was due at {}, running it now",
            task.name,
            at.to_rfc3339()
        );
        // The terminal event persists the outcome and notifies listeners.
        task.set_strategy(config);
        Ok(ScheduledRecovery::Overdue(tokio::spawn(async move {
            task.execute().await
        })))
    }

    async fn collect_overdue(&self, task_id: &str, handle: JoinHandle<Result<()>>) -> Recovered {
        match handle.await {
            Ok(Ok(())) => Recovered::Executed,
            Ok(Err(e)) => {
                tracing::warn!("⚠️ Overdue task {task_id} failed: {e}");
                Recovered::Failed
            }
            Err(e) => {
                tracing::error!("💥 Overdue task {task_id} aborted: {e}");
                self.persist_outcome(task_id, RecordResult::failed(format!("task aborted: {e}")));
                Recovered::Failed
            }
        }
    }

    fn recover_conditional(&self, record: TaskRecord) -> Result<Recovered> {
        let condition = record.result.condition.clone().ok_or_else(|| {
            TaskerError::Store("waiting record has no condition".into())
        })?;
        let (condition, degraded) = self.resolve_condition(&record, condition);
        let config = ExecutionStrategyConfig::Conditional {
            condition,
            interval_ms: record.result.interval_ms,
            max_attempts: record.result.max_attempts,
        };
        let task =
            self.shared
                .factory
                .create(&record.name, record.task_type, record.payload, Some(record.id))?;
        self.launch(task, config, None)?;
        Ok(Recovered::RearmedConditional { degraded })
    }

    /// Unknown named conditions fall back to the configured default.
    fn resolve_condition(&self, record: &TaskRecord, condition: Condition) -> (Condition, bool) {
        if self.shared.predicates.resolves(&condition) {
            return (condition, false);
        }
        let fallback = self.shared.settings.default_condition.clone();
        tracing::warn!(
            "⚠️ Condition '{condition}' of task '{}' is not registered, falling back to '{fallback}'",
            record.name
        );
        self.shared.log.add_audit_entry(AuditEntry {
            task_id: Some(record.id.clone()),
            task_name: Some(record.name.clone()),
            task_type: record.task_type,
            strategy: Some(StrategyType::Conditional),
            message: format!(
                "AUDIT: condition '{condition}' could not be restored, using '{fallback}'"
            ),
        });
        (fallback, true)
    }

    fn persist_outcome(&self, task_id: &str, result: RecordResult) {
        if let Some(store) = &self.shared.store {
            if let Err(e) = store.update_by_id(task_id, RecordPatch::finished(result)) {
                tracing::warn!("⚠️ Failed to update record {task_id}: {e}");
            }
        }
    }
}

impl RecoveryReport {
    fn count(&mut self, outcome: Recovered) {
        match outcome {
            Recovered::Executed => self.executed += 1,
            Recovered::Failed => self.failed += 1,
            Recovered::RearmedScheduled => self.rearmed_scheduled += 1,
            Recovered::RearmedConditional { degraded } => {
                self.rearmed_conditional += 1;
                if degraded {
                    self.degraded += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::PredicateRegistry;
    use crate::store::{MemoryStore, RecordStore};
    use crate::task::testing::CountingHandler;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};
    use tasker_core::{TaskPayload, TaskType, TaskerConfig};

    fn config() -> TaskerConfig {
        let mut config = TaskerConfig::default();
        config.tasks.simulated_latency_ms = 0;
        config.scheduler.default_condition = Condition::from("never");
        config
    }

    fn never() -> PredicateRegistry {
        let predicates = PredicateRegistry::new();
        predicates.register("never", || Ok(false));
        predicates
    }

    fn social_payload() -> TaskPayload {
        let mut p = TaskPayload::new();
        p.insert("message".into(), serde_json::json!("back online"));
        p
    }

    fn record(id: &str, result: RecordResult) -> TaskRecord {
        TaskRecord {
            id: id.into(),
            task_type: TaskType::Social,
            name: format!("post {id}"),
            payload: social_payload(),
            executed_at: None,
            result,
        }
    }

    #[tokio::test]
    async fn test_without_store_is_noop() {
        let runner = TaskRunner::new(config());
        assert_eq!(runner.recover().await.unwrap(), RecoveryReport::default());
    }

    #[tokio::test]
    async fn test_mixed_records() {
        let past = Utc::now() - chrono::Duration::minutes(5);
        let future = Utc::now() + chrono::Duration::minutes(5);
        let mut broken = record("broken", RecordResult::status(TaskStatus::Scheduled));
        broken.result.scheduled_for = Some("not a date".into());
        let store = Arc::new(MemoryStore::with_records(vec![
            record("overdue", RecordResult::scheduled(past)),
            record("later", RecordResult::scheduled(future)),
            broken,
            record("polling", RecordResult::waiting(Condition::from("never"), 60_000, 3)),
            record("done", RecordResult::status(TaskStatus::Completed)),
        ]));
        let runner = TaskRunner::builder(config())
            .store(store.clone())
            .predicates(never())
            .build();

        let report = runner.recover().await.unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(report.rearmed_scheduled, 1);
        assert_eq!(report.rearmed_conditional, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.degraded, 0);
        assert_eq!(report.total(), 3);

        let overdue = store.find_by_id("overdue").unwrap().unwrap();
        assert_eq!(overdue.result.status, TaskStatus::Completed);
        assert!(overdue.executed_at.is_some());

        // Re-armed under the original ids.
        assert_eq!(
            runner.timers().info("later").map(|i| i.strategy),
            Some(StrategyType::Scheduled)
        );
        assert!(runner.timers().contains("polling"));
        runner.cancel_task("later");
        runner.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_condition_degrades_to_default() {
        let store = Arc::new(MemoryStore::with_records(vec![record(
            "custom",
            RecordResult::waiting(Condition::from("tide-is-high"), 60_000, 2),
        )]));
        let runner = TaskRunner::builder(config())
            .store(store.clone())
            .predicates(never())
            .build();

        let report = runner.recover().await.unwrap();
        assert_eq!(report.rearmed_conditional, 1);
        assert_eq!(report.degraded, 1);
        assert!(
            runner
                .get_history()
                .iter()
                .any(|e| e.is_audit && e.task_id == "custom" && e.message.contains("tide-is-high"))
        );
        // Persisted again with the fallback condition.
        let rec = store.find_by_id("custom").unwrap().unwrap();
        assert_eq!(rec.result.condition, Some(Condition::from("never")));
        runner.shutdown();
    }

    #[tokio::test]
    async fn test_overdue_failure_is_persisted() {
        let past = Utc::now() - chrono::Duration::seconds(1);
        let mut bad = record("bad", RecordResult::scheduled(past));
        bad.payload
            .insert("message".into(), serde_json::json!("x".repeat(300)));
        let store = Arc::new(MemoryStore::with_records(vec![bad]));
        let runner = TaskRunner::builder(config()).store(store.clone()).build();

        let report = runner.recover().await.unwrap();
        assert_eq!(report.failed, 1);
        let rec = store.find_by_id("bad").unwrap().unwrap();
        assert_eq!(rec.result.status, TaskStatus::Failed);
        assert!(rec.result.error.unwrap().contains("280"));
    }

    #[tokio::test]
    async fn test_overdue_records_run_side_by_side() {
        let past = Utc::now() - chrono::Duration::minutes(1);
        let store = Arc::new(MemoryStore::with_records(vec![
            record("first", RecordResult::scheduled(past)),
            record("second", RecordResult::scheduled(past)),
        ]));
        let handler = CountingHandler {
            delay: Duration::from_millis(300),
            ..CountingHandler::new(TaskType::Social)
        };
        let runs = handler.runs.clone();
        let runner = TaskRunner::builder(config())
            .store(store.clone())
            .handler(Arc::new(handler))
            .build();

        let started = Instant::now();
        let report = runner.recover().await.unwrap();
        assert_eq!(report.executed, 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_millis(550));
        for id in ["first", "second"] {
            let rec = store.find_by_id(id).unwrap().unwrap();
            assert_eq!(rec.result.status, TaskStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_recovering_twice_keeps_records_armed() {
        let future = Utc::now() + chrono::Duration::minutes(5);
        let store = Arc::new(MemoryStore::with_records(vec![
            record("later", RecordResult::scheduled(future)),
            record("polling", RecordResult::waiting(Condition::from("never"), 60_000, 3)),
        ]));
        let runner = TaskRunner::builder(config())
            .store(store.clone())
            .predicates(never())
            .build();

        runner.recover().await.unwrap();
        let again = runner.recover().await.unwrap();
        assert_eq!(again.rearmed_scheduled, 1);
        assert_eq!(again.rearmed_conditional, 1);
        // Let the replaced timers wake up and retire.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let later = store.find_by_id("later").unwrap().unwrap();
        assert_eq!(later.result.status, TaskStatus::Scheduled);
        let polling = store.find_by_id("polling").unwrap().unwrap();
        assert_eq!(polling.result.status, TaskStatus::Waiting);
        assert!(
            !runner
                .get_history()
                .iter()
                .any(|e| e.status == TaskStatus::Canceled)
        );
        assert_eq!(runner.timers().len(), 2);
        assert_eq!(runner.active_conditional_count(), 1);
        runner.cancel_task("later");
        runner.shutdown();
    }
}
