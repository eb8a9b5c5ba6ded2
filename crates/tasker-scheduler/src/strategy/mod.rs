//! Execution strategies: *when* a task runs.
//!
//! `apply` is split in two halves: the synchronous part (binding the
//! strategy, announcing `waiting`, arming timers) runs when `apply` is
//! called; the returned future drives the rest and resolves to the
//! strategy's `TaskResult`. A caller can therefore cancel as soon as
//! `apply` returns, before the future is ever polled.

pub mod conditional;
pub mod immediate;
pub mod scheduled;
pub mod selector;

use futures::future::BoxFuture;
use tasker_core::{StrategyType, TaskResult};

use crate::task::Task;

pub use conditional::ConditionalStrategy;
pub use immediate::ImmediateStrategy;
pub use scheduled::ScheduledStrategy;
pub use selector::StrategySelector;

pub trait ExecutionStrategy: Send + Sync {
    fn strategy_type(&self) -> StrategyType;

    /// Start the strategy for `task`. Requires a tokio runtime.
    fn apply(&self, task: Task) -> BoxFuture<'static, TaskResult>;

    /// Cancel not-yet-started work for `task_id`.
    /// Idempotent: false when there was nothing to cancel.
    fn cancel(&self, _task_id: &str) -> bool {
        false
    }
}
