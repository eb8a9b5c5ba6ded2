//! Fluent construction of `TaskRequest`s with request-time payload checks.

use serde_json::Value;
use tasker_core::{
    ExecutionStrategyConfig, Result, TaskOverrides, TaskPayload, TaskRequest, TaskSource,
    TaskType, TaskerError,
};

use crate::log::CleanMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Builder,
    Template,
}

/// Builds a `TaskRequest`.
///
/// ```ignore
/// let req = TaskRequestBuilder::from_builder()
///     .task_type(TaskType::Social)
///     .name("Launch post")
///     .payload(payload)
///     .strategy(ExecutionStrategyConfig::conditional("day"))
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct TaskRequestBuilder {
    kind: SourceKind,
    key: Option<String>,
    name: Option<String>,
    task_type: Option<TaskType>,
    payload: Option<TaskPayload>,
    strategy: Option<ExecutionStrategyConfig>,
    pending_id: Option<String>,
}

impl TaskRequestBuilder {
    fn empty(kind: SourceKind) -> Self {
        Self {
            kind,
            key: None,
            name: None,
            task_type: None,
            payload: None,
            strategy: None,
            pending_id: None,
        }
    }

    /// A fresh task described field by field.
    pub fn from_builder() -> Self {
        Self::empty(SourceKind::Builder)
    }

    /// A copy of the template registered under `key`.
    pub fn from_template(key: &str) -> Self {
        let mut b = Self::empty(SourceKind::Template);
        b.key = Some(key.to_string());
        b
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn payload(mut self, payload: TaskPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn strategy(mut self, strategy: ExecutionStrategyConfig) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn pending_id(mut self, pending_id: &str) -> Self {
        self.pending_id = Some(pending_id.to_string());
        self
    }

    pub fn build(self) -> Result<TaskRequest> {
        let source = match self.kind {
            SourceKind::Builder => {
                let task_type = self
                    .task_type
                    .ok_or_else(|| TaskerError::Validation("task type is required".into()))?;
                let payload = self.payload.unwrap_or_default();
                validate_payload(task_type, &payload)?;
                TaskSource::Builder {
                    name: self.name.unwrap_or_else(|| format!("{task_type} task")),
                    task_type,
                    payload,
                    strategy: self.strategy,
                }
            }
            SourceKind::Template => {
                let key = self
                    .key
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| TaskerError::Validation("template key is required".into()))?;
                TaskSource::Template {
                    key,
                    overrides: TaskOverrides {
                        name: self.name,
                        payload: self.payload,
                        strategy: self.strategy,
                    },
                }
            }
        };
        Ok(TaskRequest {
            source,
            pending_id: self.pending_id,
        })
    }
}

fn present(payload: &TaskPayload, key: &str) -> bool {
    match payload.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    }
}

fn require(payload: &TaskPayload, task_type: TaskType, key: &str) -> Result<()> {
    if present(payload, key) {
        Ok(())
    } else {
        Err(TaskerError::Validation(format!(
            "{task_type}: '{key}' is required"
        )))
    }
}

/// Request-time checks for builder payloads.
pub fn validate_payload(task_type: TaskType, payload: &TaskPayload) -> Result<()> {
    match task_type {
        TaskType::Email => {
            require(payload, task_type, "to")?;
            require(payload, task_type, "subject")?;
            if !payload.get("body").is_some_and(Value::is_string) {
                return Err(TaskerError::Validation(
                    "email: 'body' must be a string (may be empty)".into(),
                ));
            }
        }
        TaskType::Calendar => {
            require(payload, task_type, "title")?;
            require(payload, task_type, "when")?;
        }
        TaskType::Social => {
            if !payload
                .get("message")
                .and_then(Value::as_str)
                .is_some_and(|m| !m.trim().is_empty())
            {
                return Err(TaskerError::Validation("social: 'message' is required".into()));
            }
            require(payload, task_type, "platform")?;
        }
        TaskType::Backup => require(payload, task_type, "destination")?,
        TaskType::Clean => {
            if let Some(mode) = payload.get("mode").and_then(Value::as_str) {
                mode.parse::<CleanMode>()?;
            }
            if let Some(scope) = payload.get("scope").and_then(Value::as_str) {
                scope
                    .parse::<TaskType>()
                    .map_err(|_| TaskerError::Validation(format!("clean: invalid scope '{scope}'")))?;
            }
        }
    }
    Ok(())
}
