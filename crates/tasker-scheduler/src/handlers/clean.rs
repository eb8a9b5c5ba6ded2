//! Clean task.
//!
//! Execution only records what it did in the payload. The history purge
//! it stands for is applied by the runner when the completion event
//! arrives (see `TaskRunner::cleanup_history`).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tasker_core::{Result, TaskPayload, TaskType};

use super::{now_iso, simulate, str_field, string_list};
use crate::log::CleanMode;
use crate::task::TaskHandler;

pub struct CleanHandler {
    latency: Duration,
}

impl CleanHandler {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

/// Mode of a clean payload. Missing means soft.
pub fn clean_mode(payload: &TaskPayload) -> Result<CleanMode> {
    str_field(payload, "mode").map_or(Ok(CleanMode::Soft), str::parse)
}

/// Optional task type the purge is restricted to.
pub fn clean_scope(payload: &TaskPayload) -> Result<Option<TaskType>> {
    str_field(payload, "scope").map(str::parse).transpose()
}

fn push_note(payload: &mut TaskPayload, note: String) {
    match payload.get_mut("notes") {
        Some(Value::Array(notes)) => notes.push(json!(note)),
        _ => {
            payload.insert("notes".into(), json!([note]));
        }
    }
}

#[async_trait]
impl TaskHandler for CleanHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Clean
    }

    fn default_name(&self) -> &str {
        "Basic clean"
    }

    fn default_payload(&self) -> TaskPayload {
        let mut p = TaskPayload::new();
        p.insert("targets".into(), json!(["./temp", "./cache"]));
        p.insert("mode".into(), json!("soft"));
        p.insert("notes".into(), json!([]));
        p
    }

    fn validate(&self, payload: &TaskPayload) -> Result<()> {
        clean_mode(payload)?;
        clean_scope(payload)?;
        Ok(())
    }

    async fn execute(&self, payload: &mut TaskPayload) -> Result<String> {
        let mode = clean_mode(payload)?;
        let targets = string_list(payload, "targets").len();
        push_note(
            payload,
            format!("Starting {mode} clean of {targets} target(s)"),
        );
        simulate(self.latency).await;
        push_note(payload, "Clean completed".to_string());
        payload.insert("last_run_at".into(), json!(now_iso()));
        Ok(format!("Clean ({mode}) completed"))
    }

    fn reset_generated(&self, payload: &mut TaskPayload) {
        payload.remove("last_run_at");
        payload.insert("notes".into(), json!([]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_and_scope() {
        let mut p = TaskPayload::new();
        assert_eq!(clean_mode(&p).unwrap(), CleanMode::Soft);
        assert_eq!(clean_scope(&p).unwrap(), None);

        p.insert("mode".into(), json!("hard"));
        p.insert("scope".into(), json!("social"));
        assert_eq!(clean_mode(&p).unwrap(), CleanMode::Hard);
        assert_eq!(clean_scope(&p).unwrap(), Some(TaskType::Social));

        p.insert("scope".into(), json!("fax"));
        assert!(CleanHandler::new(Duration::ZERO).validate(&p).is_err());
    }

    #[tokio::test]
    async fn test_execute_appends_notes_and_reset_clears_them() {
        let h = CleanHandler::new(Duration::ZERO);
        let mut p = h.default_payload();
        let msg = h.execute(&mut p).await.unwrap();
        assert_eq!(msg, "Clean (soft) completed");
        assert_eq!(p["notes"].as_array().map(Vec::len), Some(2));
        assert!(p.contains_key("last_run_at"));

        h.reset_generated(&mut p);
        assert_eq!(p["notes"], json!([]));
        assert!(!p.contains_key("last_run_at"));
    }
}
