//! Persisted record schema read and written by the record stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Condition, TaskPayload, TaskStatus, TaskType};

/// A durable record of one task instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Empty on `add` means "let the store assign one".
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub payload: TaskPayload,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
    pub result: RecordResult,
}

/// Last known result of a record.
///
/// `scheduled_for` is kept as text so a corrupt timestamp only affects
/// the record it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordResult {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordResult {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status,
            scheduled_for: None,
            condition: None,
            interval_ms: None,
            max_attempts: None,
            error: None,
        }
    }

    pub fn scheduled(at: DateTime<Utc>) -> Self {
        Self {
            scheduled_for: Some(at.to_rfc3339()),
            ..Self::status(TaskStatus::Scheduled)
        }
    }

    pub fn waiting(condition: Condition, interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            condition: Some(condition),
            interval_ms: Some(interval_ms),
            max_attempts: Some(max_attempts),
            ..Self::status(TaskStatus::Waiting)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::status(TaskStatus::Failed)
        }
    }
}

/// Partial update applied by `update_by_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RecordResult>,
}

impl RecordPatch {
    /// Patch marking a record as finished now with `result`.
    pub fn finished(result: RecordResult) -> Self {
        Self {
            executed_at: Some(Utc::now()),
            result: Some(result),
        }
    }

    pub fn apply(self, record: &mut TaskRecord) {
        if let Some(at) = self.executed_at {
            record.executed_at = Some(at);
        }
        if let Some(result) = self.result {
            record.result = result;
        }
    }
}
