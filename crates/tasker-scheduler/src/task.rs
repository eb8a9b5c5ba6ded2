//! Task definitions: the runtime value object bound to a strategy.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tasker_core::{
    ExecutionStrategyConfig, Result, StrategyType, TaskPayload, TaskStatus, TaskType,
    TaskerError,
};

use crate::bus::{EventBus, TaskEvent, TaskEventKind};

/// Business logic of one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// Name used when a request does not give one.
    fn default_name(&self) -> &str;

    /// Payload fields filled in when the request leaves them out.
    fn default_payload(&self) -> TaskPayload {
        TaskPayload::new()
    }

    /// Runtime payload checks, run right before `execute`.
    fn validate(&self, _payload: &TaskPayload) -> Result<()> {
        Ok(())
    }

    /// Do the work. Returns a human message describing the outcome.
    async fn execute(&self, payload: &mut TaskPayload) -> Result<String>;

    /// Strip fields produced by a previous run (ids, timestamps, notes).
    fn reset_generated(&self, _payload: &mut TaskPayload) {}
}

/// A task instance.
pub struct Task {
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    pub payload: TaskPayload,
    strategy: Option<ExecutionStrategyConfig>,
    status: Option<TaskStatus>,
    handler: Arc<dyn TaskHandler>,
    bus: Arc<EventBus>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("task_type", &self.task_type)
            .field("strategy", &self.strategy)
            .field("status", &self.status)
            .finish()
    }
}

impl Task {
    pub fn strategy(&self) -> Option<&ExecutionStrategyConfig> {
        self.strategy.as_ref()
    }

    pub fn strategy_type(&self) -> StrategyType {
        self.strategy
            .as_ref()
            .map(|s| s.strategy_type())
            .unwrap_or(StrategyType::Immediate)
    }

    pub fn set_strategy(&mut self, config: ExecutionStrategyConfig) {
        self.strategy = Some(config);
    }

    /// Last status this instance reported.
    pub fn status(&self) -> Option<TaskStatus> {
        self.status
    }

    /// Record a transition and announce it on the bus.
    /// Ignored once the task reached a terminal status.
    pub(crate) fn set_status(&mut self, status: TaskStatus, message: impl Into<String>) {
        if self.status.is_some_and(|s| s.is_terminal()) {
            tracing::debug!(
                "Ignoring {status} for task {}: already {}",
                self.id,
                self.status.map(|s| s.as_str()).unwrap_or_default()
            );
            return;
        }
        self.status = Some(status);
        let event = TaskEvent {
            kind: TaskEventKind::for_status(status),
            task_id: self.id.clone(),
            task_name: self.name.clone(),
            task_type: self.task_type,
            strategy: self.strategy_type(),
            status,
            message: message.into(),
            payload: self.payload.clone(),
            timestamp: Utc::now(),
        };
        self.bus.emit(&event);
    }

    /// Run the handler, reporting running → completed/failed.
    pub async fn execute(&mut self) -> Result<()> {
        self.set_status(TaskStatus::Running, "Execution started");
        let outcome = match self.handler.validate(&self.payload) {
            Ok(()) => AssertUnwindSafe(self.handler.execute(&mut self.payload))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(TaskerError::Execution(format!(
                        "handler panicked: {}",
                        panic_message(&*panic)
                    )))
                }),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(message) => {
                self.set_status(TaskStatus::Completed, message);
                Ok(())
            }
            Err(e) => {
                self.set_status(TaskStatus::Failed, format!("Error: {e}"));
                Err(e)
            }
        }
    }

    /// Clear fields generated by earlier runs.
    pub fn reset_generated(&mut self) {
        self.handler.reset_generated(&mut self.payload);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Generate a fresh task id.
pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Builds tasks from a type → handler table.
#[derive(Clone)]
pub struct TaskFactory {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
    bus: Arc<EventBus>,
}

impl TaskFactory {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            handlers: HashMap::new(),
            bus,
        }
    }

    /// Register (or replace) the handler for its task type.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.task_type(), handler);
    }

    pub fn handler(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn supports(&self, task_type: TaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }

    /// Create a task. The handler's default payload is merged under
    /// `payload`; a missing `id` gets a fresh one.
    pub fn create(
        &self,
        name: &str,
        task_type: TaskType,
        payload: TaskPayload,
        id: Option<String>,
    ) -> Result<Task> {
        let handler = self
            .handler(task_type)
            .ok_or(TaskerError::UnsupportedTaskType(task_type))?;
        let mut merged = handler.default_payload();
        merged.extend(payload);
        Ok(Task {
            id: id.unwrap_or_else(new_task_id),
            name: name.to_string(),
            task_type,
            payload: merged,
            strategy: None,
            status: None,
            handler,
            bus: self.bus.clone(),
        })
    }
}
