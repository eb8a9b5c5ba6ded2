//! Built-in task handlers.
//!
//! The email, calendar and social handlers simulate their side effect with
//! a configurable delay. Clean only annotates its payload; the runner turns
//! its completion into a history purge. Backup writes a real snapshot file.

pub mod backup;
pub mod calendar;
pub mod clean;
pub mod email;
pub mod social;

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tasker_core::TaskPayload;
use tasker_core::config::TasksConfig;

use crate::bus::EventBus;
use crate::log::TaskLog;
use crate::task::TaskFactory;

pub use backup::BackupHandler;
pub use calendar::CalendarHandler;
pub use clean::CleanHandler;
pub use email::EmailHandler;
pub use social::SocialHandler;

/// Factory with every built-in handler registered.
pub fn default_factory(bus: Arc<EventBus>, log: Arc<TaskLog>, config: &TasksConfig) -> TaskFactory {
    let latency = Duration::from_millis(config.simulated_latency_ms);
    let mut factory = TaskFactory::new(bus);
    factory.register(Arc::new(EmailHandler::new(latency)));
    factory.register(Arc::new(CalendarHandler::new(latency)));
    factory.register(Arc::new(SocialHandler::new(latency)));
    factory.register(Arc::new(CleanHandler::new(latency)));
    factory.register(Arc::new(BackupHandler::new(log, &config.backup_destination)));
    factory
}

/// Trimmed string field, `None` when missing, not a string, or blank.
pub(crate) fn str_field<'a>(payload: &'a TaskPayload, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// String array field; a single string counts as a one-element list.
pub(crate) fn string_list(payload: &TaskPayload, key: &str) -> Vec<String> {
    match payload.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Short opaque id for simulated remote objects.
pub(crate) fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

pub(crate) async fn simulate(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}
