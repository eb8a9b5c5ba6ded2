//! Template registry: named, pre-filled task definitions.
//!
//! A template is plain data. Instantiating one builds a fresh task from
//! the declared fields only, applies overrides, then strips any
//! run-generated fields the template may still carry.

use std::sync::{PoisonError, RwLock};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tasker_core::{
    ExecutionStrategyConfig, Result, TaskOverrides, TaskPayload, TaskType, TaskerError,
};

use crate::task::{Task, TaskFactory};

/// A registered template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub name: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub payload: TaskPayload,
    /// Default strategy for instances of this template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ExecutionStrategyConfig>,
}

impl TaskTemplate {
    pub fn new(name: &str, task_type: TaskType, payload: TaskPayload) -> Self {
        Self {
            name: name.to_string(),
            task_type,
            payload,
            strategy: None,
        }
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategyConfig) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Build a task from this template. Override payload keys replace the
    /// template's; the override strategy wins over the template's.
    pub fn instantiate(&self, overrides: &TaskOverrides, factory: &TaskFactory) -> Result<Task> {
        let mut payload = self.payload.clone();
        if let Some(extra) = &overrides.payload {
            payload.extend(extra.clone());
        }
        let name = overrides.name.as_deref().unwrap_or(&self.name);
        let mut task = factory.create(name, self.task_type, payload, None)?;
        task.reset_generated();
        if let Some(strategy) = overrides.strategy.as_ref().or(self.strategy.as_ref()) {
            task.set_strategy(strategy.clone());
        }
        Ok(task)
    }
}

/// Key → template table, listed in registration order.
#[derive(Default)]
pub struct TemplateRegistry {
    templates: RwLock<Vec<(String, TaskTemplate)>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with `default_templates()`.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for (key, template) in default_templates() {
            // Keys are static and non-empty.
            let _ = registry.register(key, template);
        }
        registry
    }

    /// Register (or replace) a template.
    pub fn register(&self, key: &str, template: TaskTemplate) -> Result<()> {
        if key.trim().is_empty() {
            return Err(TaskerError::Validation("template key is required".into()));
        }
        let mut templates = self
            .templates
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match templates.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = template,
            None => templates.push((key.to_string(), template)),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<TaskTemplate> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, t)| t.clone())
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn list(&self) -> Vec<(String, TaskTemplate)> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Instantiate the template registered under `key`.
    pub fn instantiate(
        &self,
        key: &str,
        overrides: &TaskOverrides,
        factory: &TaskFactory,
    ) -> Result<Task> {
        self.get(key)
            .ok_or_else(|| TaskerError::TemplateNotFound(key.to_string()))?
            .instantiate(overrides, factory)
    }
}

fn payload(value: serde_json::Value) -> TaskPayload {
    match value {
        serde_json::Value::Object(map) => map,
        _ => TaskPayload::new(),
    }
}

/// Built-in templates.
pub fn default_templates() -> Vec<(&'static str, TaskTemplate)> {
    let in_ten_minutes = (Utc::now() + chrono::Duration::minutes(10))
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    vec![
        (
            "reminderBase",
            TaskTemplate::new(
                "Base reminder",
                TaskType::Calendar,
                payload(json!({
                    "title": "Reminder",
                    "description": "Review your tasks",
                    "when": in_ten_minutes,
                    "location": "Office",
                })),
            ),
        ),
        (
            "cleanBasic",
            TaskTemplate::new(
                "Basic clean",
                TaskType::Clean,
                payload(json!({
                    "targets": ["./temp", "./cache"],
                    "mode": "soft",
                    "notes": [],
                })),
            ),
        ),
        (
            "weeklyBackup",
            TaskTemplate::new(
                "Weekly backup",
                TaskType::Backup,
                // Destination comes from the handler's configured default.
                TaskPayload::new(),
            ),
        ),
        (
            "emailBase",
            TaskTemplate::new(
                "Base email",
                TaskType::Email,
                payload(json!({
                    "to": ["recipient@example.com"],
                    "cc": [],
                    "bcc": [],
                    "subject": "Default subject",
                    "body": "Default email body",
                    "attachments": [],
                })),
            ),
        ),
        (
            "socialPostBase",
            TaskTemplate::new(
                "Base social post",
                TaskType::Social,
                payload(json!({
                    "platform": "twitter",
                    "message": "Default social post message",
                    "tags": ["#example"],
                    "attachments": [],
                })),
            ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::task::testing::counting_factory;
    use std::sync::Arc;
    use tasker_core::{Condition, StrategyType};

    #[test]
    fn test_default_keys_in_order() {
        let reg = TemplateRegistry::with_defaults();
        assert_eq!(
            reg.list_keys(),
            vec!["reminderBase", "cleanBasic", "weeklyBackup", "emailBase", "socialPostBase"]
        );
    }

    #[test]
    fn test_register_replaces_and_rejects_empty_key() {
        let reg = TemplateRegistry::new();
        reg.register("k", TaskTemplate::new("one", TaskType::Email, TaskPayload::new()))
            .unwrap();
        reg.register("k", TaskTemplate::new("two", TaskType::Email, TaskPayload::new()))
            .unwrap();
        assert_eq!(reg.list().len(), 1);
        assert_eq!(reg.get("k").unwrap().name, "two");
        assert!(reg.register(" ", TaskTemplate::new("x", TaskType::Email, TaskPayload::new())).is_err());
    }

    #[test]
    fn test_instantiate_applies_overrides_and_resets_generated() {
        let (factory, _) = counting_factory(Arc::new(EventBus::new()));
        let reg = TemplateRegistry::new();
        let template = TaskTemplate::new(
            "Base",
            TaskType::Social,
            payload(json!({"message": "hi", "ran": true})),
        )
        .with_strategy(ExecutionStrategyConfig::conditional(Condition::Day));
        reg.register("base", template).unwrap();

        let overrides = TaskOverrides {
            name: Some("Custom".into()),
            payload: Some(payload(json!({"message": "override"}))),
            strategy: None,
        };
        let a = reg.instantiate("base", &overrides, &factory).unwrap();
        let b = reg.instantiate("base", &overrides, &factory).unwrap();

        assert_eq!(a.name, "Custom");
        assert_eq!(a.payload["message"], "override");
        // Generated field stripped by the handler's reset.
        assert!(!a.payload.contains_key("ran"));
        assert_eq!(a.strategy_type(), StrategyType::Conditional);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_unknown_template() {
        let (factory, _) = counting_factory(Arc::new(EventBus::new()));
        let err = TemplateRegistry::new()
            .instantiate("nope", &TaskOverrides::default(), &factory)
            .unwrap_err();
        assert!(matches!(err, TaskerError::TemplateNotFound(_)));
    }
}
