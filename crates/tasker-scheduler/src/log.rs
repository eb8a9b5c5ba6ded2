//! Task history: the domain log of lifecycle transitions.
//!
//! One `TaskLog` per runner, shared by reference. All operations take the
//! lock once, so dedup checks and compaction are atomic with their writes.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tasker_core::{StrategyType, TaskLogEntry, TaskStatus, TaskType, TaskerError};

/// Task id used for entries not tied to a task.
pub const SYSTEM_TASK_ID: &str = "system";

/// History cleanup mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanMode {
    /// Drop old noise, keep terminal outcomes.
    #[default]
    Soft,
    /// Drop everything older than the cutoff.
    Hard,
}

impl CleanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanMode::Soft => "soft",
            CleanMode::Hard => "hard",
        }
    }
}

impl fmt::Display for CleanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanMode {
    type Err = TaskerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "soft" => Ok(CleanMode::Soft),
            "hard" => Ok(CleanMode::Hard),
            other => Err(TaskerError::Validation(format!(
                "clean mode must be 'soft' or 'hard', got '{other}'"
            ))),
        }
    }
}

/// Options for `purge_before`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOptions {
    /// Keep completed/failed/canceled entries regardless of age.
    pub keep_finals: bool,
    /// Only purge entries of this task type.
    pub scope: Option<TaskType>,
}

impl PurgeOptions {
    pub fn for_mode(mode: CleanMode, scope: Option<TaskType>) -> Self {
        Self {
            keep_finals: mode == CleanMode::Soft,
            scope,
        }
    }
}

/// Parameters of a synthetic audit entry.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub task_id: Option<String>,
    pub task_name: Option<String>,
    pub task_type: TaskType,
    pub strategy: Option<StrategyType>,
    pub message: String,
}

impl AuditEntry {
    pub fn system(task_type: TaskType, message: impl Into<String>) -> Self {
        Self {
            task_id: None,
            task_name: None,
            task_type,
            strategy: None,
            message: message.into(),
        }
    }
}

/// In-memory task history with duplicate suppression.
pub struct TaskLog {
    entries: Mutex<Vec<TaskLogEntry>>,
    dedup_window: chrono::Duration,
}

impl TaskLog {
    pub fn new() -> Self {
        Self::with_dedup_window(Duration::from_millis(500))
    }

    pub fn with_dedup_window(window: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            dedup_window: chrono::Duration::from_std(window)
                .unwrap_or_else(|_| chrono::Duration::milliseconds(500)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TaskLogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry unless the same transition was already logged
    /// for this task within the dedup window. Returns true if stored.
    pub fn log(&self, entry: TaskLogEntry) -> bool {
        let mut entries = self.lock();
        let duplicate = entries.iter().rev().any(|e| {
            e.same_transition(&entry)
                && (entry.timestamp - e.timestamp).abs() < self.dedup_window
        });
        if duplicate {
            tracing::debug!(
                "🔁 Dropped duplicate {} entry for task {}",
                entry.status,
                entry.task_id
            );
            return false;
        }
        entries.push(entry);
        true
    }

    /// Snapshot in insertion order.
    pub fn list(&self) -> Vec<TaskLogEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Atomic bulk overwrite.
    pub fn replace(&self, entries: Vec<TaskLogEntry>) {
        *self.lock() = entries;
    }

    /// Drop entries older than `cutoff`. An entry survives when it is out
    /// of scope, not older than the cutoff, or terminal with `keep_finals`.
    /// Returns how many entries were removed.
    pub fn purge_before(&self, cutoff: DateTime<Utc>, options: PurgeOptions) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| {
            let in_scope = options.scope.is_none_or(|s| s == e.task_type);
            !in_scope || e.timestamp >= cutoff || (options.keep_finals && e.status.is_terminal())
        });
        let removed = before - entries.len();
        tracing::info!(
            "🧹 Purged {removed} history entries before {} (keep_finals={}, scope={})",
            cutoff.to_rfc3339(),
            options.keep_finals,
            options.scope.map(|s| s.as_str()).unwrap_or("global")
        );
        removed
    }

    /// Append a system entry, bypassing dedup.
    pub fn add_audit_entry(&self, audit: AuditEntry) -> TaskLogEntry {
        let entry = TaskLogEntry {
            timestamp: Utc::now(),
            task_id: audit.task_id.unwrap_or_else(|| SYSTEM_TASK_ID.to_string()),
            task_name: audit.task_name.unwrap_or_else(|| "System audit".to_string()),
            task_type: audit.task_type,
            strategy: audit.strategy.unwrap_or(StrategyType::Immediate),
            status: TaskStatus::Completed,
            message: audit.message,
            is_audit: true,
        };
        self.lock().push(entry.clone());
        entry
    }

    /// Latest non-audit entry of every task id, in order of first appearance.
    pub fn latest_per_task(&self) -> Vec<TaskLogEntry> {
        latest_per_task(&self.lock())
    }

    /// Remove every entry of the task ids whose latest entry is
    /// `completed`. Audit entries are kept. Returns those ids.
    pub fn compact_completed(&self) -> HashSet<String> {
        let mut entries = self.lock();
        let completed: HashSet<String> = latest_per_task(&entries)
            .into_iter()
            .filter(|e| e.status == TaskStatus::Completed)
            .map(|e| e.task_id)
            .collect();
        entries.retain(|e| e.is_audit || !completed.contains(&e.task_id));
        completed
    }
}

impl Default for TaskLog {
    fn default() -> Self {
        Self::new()
    }
}

fn latest_per_task(entries: &[TaskLogEntry]) -> Vec<TaskLogEntry> {
    let mut order: Vec<&str> = Vec::new();
    let mut latest: HashMap<&str, &TaskLogEntry> = HashMap::new();
    for entry in entries.iter().filter(|e| !e.is_audit) {
        if latest.insert(entry.task_id.as_str(), entry).is_none() {
            order.push(entry.task_id.as_str());
        }
    }
    order
        .into_iter()
        .filter_map(|id| latest.get(id).map(|e| (*e).clone()))
        .collect()
}
