//! Requests accepted by the task runner and its synchronous response.

use serde::{Deserialize, Serialize};

use crate::types::{ExecutionStrategyConfig, StrategyType, TaskPayload, TaskStatus, TaskType};

/// Where the task comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskSource {
    /// A fresh task described field by field.
    Builder {
        name: String,
        task_type: TaskType,
        #[serde(default)]
        payload: TaskPayload,
        #[serde(default)]
        strategy: Option<ExecutionStrategyConfig>,
    },
    /// A copy of a registered template.
    Template {
        key: String,
        #[serde(default)]
        overrides: TaskOverrides,
    },
}

/// Fields that replace a template's values when it is instantiated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<TaskPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ExecutionStrategyConfig>,
}

/// A request to run (or stage) a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub source: TaskSource,
    /// Staged record this run fulfils, as returned by `register_task`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_id: Option<String>,
}

impl TaskRequest {
    pub fn builder(name: &str, task_type: TaskType, payload: TaskPayload) -> Self {
        Self {
            source: TaskSource::Builder {
                name: name.to_string(),
                task_type,
                payload,
                strategy: None,
            },
            pending_id: None,
        }
    }

    pub fn template(key: &str) -> Self {
        Self {
            source: TaskSource::Template {
                key: key.to_string(),
                overrides: TaskOverrides::default(),
            },
            pending_id: None,
        }
    }

    /// Set the execution strategy (override for template requests).
    pub fn with_strategy(mut self, config: ExecutionStrategyConfig) -> Self {
        match &mut self.source {
            TaskSource::Builder { strategy, .. } => *strategy = Some(config),
            TaskSource::Template { overrides, .. } => overrides.strategy = Some(config),
        }
        self
    }

    /// Replace template overrides. No effect on builder requests.
    pub fn with_overrides(mut self, new_overrides: TaskOverrides) -> Self {
        if let TaskSource::Template { overrides, .. } = &mut self.source {
            *overrides = new_overrides;
        }
        self
    }

    pub fn bound_to(mut self, pending_id: &str) -> Self {
        self.pending_id = Some(pending_id.to_string());
        self
    }

    /// Grouping key: the template key, or `type:name` for builder requests.
    pub fn key(&self) -> String {
        match &self.source {
            TaskSource::Builder {
                name, task_type, ..
            } => format!("{task_type}:{name}"),
            TaskSource::Template { key, .. } => key.clone(),
        }
    }

    /// The strategy explicitly requested, if any.
    pub fn requested_strategy(&self) -> Option<&ExecutionStrategyConfig> {
        match &self.source {
            TaskSource::Builder { strategy, .. } => strategy.as_ref(),
            TaskSource::Template { overrides, .. } => overrides.strategy.as_ref(),
        }
    }
}

/// Synchronous answer to `run`. Execution is reported later via events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResponse {
    pub fn accepted(
        task_id: &str,
        task_name: &str,
        strategy: StrategyType,
        initial_status: TaskStatus,
    ) -> Self {
        Self {
            ok: true,
            task_id: Some(task_id.to_string()),
            task_name: Some(task_name.to_string()),
            strategy: Some(strategy),
            initial_status: Some(initial_status),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            task_id: None,
            task_name: None,
            strategy: None,
            initial_status: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Condition;

    #[test]
    fn test_request_keys() {
        let req = TaskRequest::builder("Daily mail", TaskType::Email, TaskPayload::new());
        assert_eq!(req.key(), "email:Daily mail");
        assert_eq!(TaskRequest::template("emailBase").key(), "emailBase");
    }

    #[test]
    fn test_strategy_goes_to_overrides_for_templates() {
        let req = TaskRequest::template("cleanBasic")
            .with_strategy(ExecutionStrategyConfig::conditional(Condition::Night));
        match &req.source {
            TaskSource::Template { overrides, .. } => {
                assert!(matches!(
                    overrides.strategy,
                    Some(ExecutionStrategyConfig::Conditional { .. })
                ));
            }
            _ => panic!("expected template source"),
        }
        assert_eq!(
            req.requested_strategy().map(|s| s.strategy_type()),
            Some(StrategyType::Conditional)
        );
    }

    #[test]
    fn test_request_json() {
        let req: TaskRequest = serde_json::from_str(
            r#"{"source":{"kind":"builder","name":"x","task_type":"social","payload":{"message":"hi"}}}"#,
        )
        .unwrap();
        assert_eq!(req.key(), "social:x");
        assert!(req.requested_strategy().is_none());
    }
}
