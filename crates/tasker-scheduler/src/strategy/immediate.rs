use futures::FutureExt;
use futures::future::BoxFuture;
use tasker_core::{ExecutionStrategyConfig, StrategyType, TaskResult};

use super::ExecutionStrategy;
use crate::task::Task;

/// Run now. Nothing to cancel.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateStrategy;

impl ExecutionStrategy for ImmediateStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Immediate
    }

    fn apply(&self, mut task: Task) -> BoxFuture<'static, TaskResult> {
        task.set_strategy(ExecutionStrategyConfig::Immediate);
        async move {
            let started_at = chrono::Utc::now();
            match task.execute().await {
                Ok(()) => TaskResult::completed(started_at, chrono::Utc::now()),
                Err(e) => TaskResult::failed(e.to_string()).timed(started_at, chrono::Utc::now()),
            }
        }
        .boxed()
    }
}
