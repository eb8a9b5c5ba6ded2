use std::sync::Arc;
use std::time::Duration;

use tasker_core::config::SchedulerConfig;
use tasker_core::{ExecutionStrategyConfig, Result, TaskerError};

use super::{ConditionalStrategy, ExecutionStrategy, ImmediateStrategy, ScheduledStrategy};
use crate::conditions::PredicateRegistry;
use crate::timers::TimerRegistry;

/// Maps a strategy configuration to a fresh strategy instance.
#[derive(Clone)]
pub struct StrategySelector {
    timers: Arc<TimerRegistry>,
    predicates: PredicateRegistry,
    defaults: SchedulerConfig,
}

impl StrategySelector {
    pub fn new(
        timers: Arc<TimerRegistry>,
        predicates: PredicateRegistry,
        defaults: SchedulerConfig,
    ) -> Self {
        Self {
            timers,
            predicates,
            defaults,
        }
    }

    /// Missing or unresolvable fields fail here, never at run time.
    pub fn select(&self, config: &ExecutionStrategyConfig) -> Result<Arc<dyn ExecutionStrategy>> {
        match config {
            ExecutionStrategyConfig::Immediate => Ok(Arc::new(ImmediateStrategy)),
            ExecutionStrategyConfig::Scheduled { target_date } => Ok(Arc::new(
                ScheduledStrategy::new(target_date, self.timers.clone())?,
            )),
            ExecutionStrategyConfig::Conditional {
                condition,
                interval_ms,
                max_attempts,
            } => {
                if !self.predicates.resolves(condition) {
                    return Err(TaskerError::Strategy(format!(
                        "no predicate registered for condition '{condition}'"
                    )));
                }
                Ok(Arc::new(ConditionalStrategy::new(
                    condition.clone(),
                    Duration::from_millis(
                        interval_ms.unwrap_or(self.defaults.conditional_interval_ms),
                    ),
                    max_attempts.unwrap_or(self.defaults.conditional_max_attempts),
                    self.timers.clone(),
                    self.predicates.clone(),
                )))
            }
        }
    }
}
