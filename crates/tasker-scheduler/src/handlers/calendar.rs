//! Calendar task: simulated event creation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tasker_core::types::parse_timestamp;
use tasker_core::{Result, TaskPayload, TaskType, TaskerError};

use super::{now_iso, short_id, simulate, str_field};
use crate::task::TaskHandler;

pub struct CalendarHandler {
    latency: Duration,
}

impl CalendarHandler {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl TaskHandler for CalendarHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Calendar
    }

    fn default_name(&self) -> &str {
        "Calendar reminder"
    }

    fn default_payload(&self) -> TaskPayload {
        let when = Utc::now() + chrono::Duration::minutes(5);
        let mut p = TaskPayload::new();
        p.insert("title".into(), json!("Reminder"));
        p.insert("description".into(), json!(""));
        p.insert(
            "when".into(),
            json!(when.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        p.insert("location".into(), json!(""));
        p
    }

    fn validate(&self, payload: &TaskPayload) -> Result<()> {
        if str_field(payload, "title").is_none() {
            return Err(TaskerError::Validation("calendar: 'title' is required".into()));
        }
        match str_field(payload, "when").and_then(parse_timestamp) {
            Some(_) => Ok(()),
            None => Err(TaskerError::Validation(
                "calendar: 'when' must be a valid ISO-8601 date".into(),
            )),
        }
    }

    async fn execute(&self, payload: &mut TaskPayload) -> Result<String> {
        simulate(self.latency).await;
        let title = str_field(payload, "title").unwrap_or("event").to_string();
        payload.insert("event_id".into(), json!(short_id()));
        payload.insert("created_at".into(), json!(now_iso()));
        Ok(format!("Calendar event '{title}' created"))
    }

    fn reset_generated(&self, payload: &mut TaskPayload) {
        payload.remove("event_id");
        payload.remove("created_at");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_payload_is_valid() {
        let h = CalendarHandler::new(Duration::ZERO);
        assert!(h.validate(&h.default_payload()).is_ok());
    }

    #[test]
    fn test_rejects_bad_date() {
        let h = CalendarHandler::new(Duration::ZERO);
        let mut p = h.default_payload();
        p.insert("when".into(), json!("next tuesday"));
        assert!(h.validate(&p).is_err());
        p.remove("when");
        assert!(h.validate(&p).is_err());
    }

    #[tokio::test]
    async fn test_execute() {
        let h = CalendarHandler::new(Duration::ZERO);
        let mut p = h.default_payload();
        let msg = h.execute(&mut p).await.unwrap();
        assert_eq!(msg, "Calendar event 'Reminder' created");
        assert!(p.contains_key("event_id"));
    }
}
