use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use tasker_core::types::parse_timestamp;
use tasker_core::{
    ExecutionStrategyConfig, Result, StrategyType, TaskResult, TaskStatus, TaskerError,
};

use super::ExecutionStrategy;
use crate::task::Task;
use crate::timers::{TimerInfo, TimerOutcome, TimerRegistry};

/// Run once at a target time.
///
/// A target already in the past fires right away (recovery relies on it);
/// rejecting past dates is the caller's job.
pub struct ScheduledStrategy {
    target: DateTime<Utc>,
    target_date: String,
    timers: Arc<TimerRegistry>,
}

impl ScheduledStrategy {
    pub fn new(target_date: &str, timers: Arc<TimerRegistry>) -> Result<Self> {
        if target_date.trim().is_empty() {
            return Err(TaskerError::Strategy(
                "scheduled strategy requires a target date".into(),
            ));
        }
        let target = parse_timestamp(target_date).ok_or_else(|| {
            TaskerError::Strategy(format!("invalid target date '{target_date}'"))
        })?;
        Ok(Self {
            target,
            target_date: target_date.to_string(),
            timers,
        })
    }

    pub fn target(&self) -> DateTime<Utc> {
        self.target
    }
}

impl ExecutionStrategy for ScheduledStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Scheduled
    }

    fn apply(&self, mut task: Task) -> BoxFuture<'static, TaskResult> {
        let target = self.target;
        let config = ExecutionStrategyConfig::Scheduled {
            target_date: self.target_date.clone(),
        };
        task.set_strategy(config.clone());
        task.set_status(
            TaskStatus::Waiting,
            format!("Scheduled for {}", target.to_rfc3339()),
        );

        let armed = self.timers.arm(TimerInfo {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            task_type: task.task_type,
            strategy: StrategyType::Scheduled,
            scheduled_for: Some(target),
            armed_at: Utc::now(),
        });
        let delay = (target - Utc::now()).to_std().unwrap_or_default();
        tracing::info!(
            "⏰ Task '{}' scheduled for {} (in {}s)",
            task.name,
            target.to_rfc3339(),
            delay.as_secs()
        );

        let timers = self.timers.clone();
        tokio::spawn(async move {
            let id = task.id.clone();
            match timers.wait(&id, armed, delay).await {
                TimerOutcome::Fired => {
                    tracing::info!("⏰ Running scheduled task '{}'", task.name);
                    task.set_strategy(config);
                    if let Err(e) = task.execute().await {
                        tracing::error!("❌ Scheduled task '{}' failed: {e}", task.name);
                    }
                }
                TimerOutcome::Cancelled => {
                    task.set_status(TaskStatus::Canceled, "Scheduled run canceled");
                }
                TimerOutcome::Replaced => {
                    tracing::debug!("⏱️ Scheduled task '{}' re-armed, old timer dropped", task.name);
                }
            }
        });

        async move { TaskResult::scheduled(target) }.boxed()
    }

    fn cancel(&self, task_id: &str) -> bool {
        self.timers.cancel(task_id)
    }
}
