//! Core data model shared by the engine, the stores and the CLI.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskerError;

/// Type-specific open key/value payload.
pub type TaskPayload = serde_json::Map<String, serde_json::Value>;

/// The fixed set of task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Email,
    Calendar,
    Social,
    Clean,
    Backup,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::Email,
        TaskType::Calendar,
        TaskType::Social,
        TaskType::Clean,
        TaskType::Backup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Email => "email",
            TaskType::Calendar => "calendar",
            TaskType::Social => "social",
            TaskType::Clean => "clean",
            TaskType::Backup => "backup",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = TaskerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| TaskerError::Validation(format!("unknown task type '{s}'")))
    }
}

/// Lifecycle status of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Waiting,
    Scheduled,
    Running,
    Completed,
    Failed,
    #[serde(alias = "cancelled")]
    Canceled,
}

impl TaskStatus {
    /// Completed, failed and canceled admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyType {
    Immediate,
    Scheduled,
    Conditional,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::Immediate => "immediate",
            StrategyType::Scheduled => "scheduled",
            StrategyType::Conditional => "conditional",
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A serializable condition for the conditional strategy.
///
/// `Named` refers to a predicate registered by key, so it can be
/// reconstructed after a restart as long as the key is registered again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Condition {
    /// Local hour in [6, 20).
    Day,
    /// Complement of `Day`.
    Night,
    Named(String),
}

impl Condition {
    pub fn describe(&self) -> &str {
        match self {
            Condition::Day => "day",
            Condition::Night => "night",
            Condition::Named(key) => key,
        }
    }

    /// Built-in conditions need no registration.
    pub fn is_builtin(&self) -> bool {
        matches!(self, Condition::Day | Condition::Night)
    }
}

impl From<String> for Condition {
    fn from(s: String) -> Self {
        match s.as_str() {
            "day" => Condition::Day,
            "night" => Condition::Night,
            _ => Condition::Named(s),
        }
    }
}

impl From<&str> for Condition {
    fn from(s: &str) -> Self {
        Condition::from(s.to_string())
    }
}

impl From<Condition> for String {
    fn from(c: Condition) -> Self {
        c.describe().to_string()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Execution strategy configuration (tagged union).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutionStrategyConfig {
    #[default]
    Immediate,
    Scheduled {
        /// ISO-8601 timestamp; validated when the request is run.
        target_date: String,
    },
    Conditional {
        condition: Condition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interval_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_attempts: Option<u32>,
    },
}

impl ExecutionStrategyConfig {
    pub fn strategy_type(&self) -> StrategyType {
        match self {
            Self::Immediate => StrategyType::Immediate,
            Self::Scheduled { .. } => StrategyType::Scheduled,
            Self::Conditional { .. } => StrategyType::Conditional,
        }
    }

    pub fn scheduled_at(at: DateTime<Utc>) -> Self {
        Self::Scheduled {
            target_date: at.to_rfc3339(),
        }
    }

    pub fn conditional(condition: impl Into<Condition>) -> Self {
        Self::Conditional {
            condition: condition.into(),
            interval_ms: None,
            max_attempts: None,
        }
    }
}

/// Parse an ISO-8601 timestamp. Offset-less values are read as local time.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Outcome of one strategy `apply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Condition description, set when a conditional run gives up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status,
            scheduled_for: None,
            condition: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn completed(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            ..Self::with_status(TaskStatus::Completed)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(TaskStatus::Failed)
        }
    }

    pub fn scheduled(at: DateTime<Utc>) -> Self {
        Self {
            scheduled_for: Some(at),
            ..Self::with_status(TaskStatus::Scheduled)
        }
    }

    pub fn canceled(condition: impl Into<String>) -> Self {
        Self {
            condition: Some(condition.into()),
            ..Self::with_status(TaskStatus::Canceled)
        }
    }

    pub fn timed(mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self.finished_at = Some(finished_at);
        self
    }
}

/// One lifecycle transition recorded in the task history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub task_name: String,
    pub task_type: TaskType,
    pub strategy: StrategyType,
    pub status: TaskStatus,
    pub message: String,
    #[serde(default)]
    pub is_audit: bool,
}

impl TaskLogEntry {
    /// Same transition as `other`, ignoring the timestamp.
    pub fn same_transition(&self, other: &TaskLogEntry) -> bool {
        self.task_id == other.task_id
            && self.status == other.status
            && self.message == other.message
            && self.task_type == other.task_type
            && self.strategy == other.strategy
    }
}
