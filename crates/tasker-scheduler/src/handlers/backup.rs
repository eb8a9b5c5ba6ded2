//! Backup task: writes a JSON snapshot of completed tasks.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tasker_core::{Result, StrategyType, TaskPayload, TaskStatus, TaskType, TaskerError};

use super::{now_iso, str_field};
use crate::log::{SYSTEM_TASK_ID, TaskLog};
use crate::task::TaskHandler;

pub struct BackupHandler {
    log: Arc<TaskLog>,
    default_destination: String,
}

impl BackupHandler {
    pub fn new(log: Arc<TaskLog>, default_destination: &str) -> Self {
        Self {
            log,
            default_destination: default_destination.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SnapshotEntry {
    task_id: String,
    task_name: String,
    task_type: TaskType,
    strategy: StrategyType,
    status: TaskStatus,
    last_message: String,
    last_timestamp: String,
}

#[derive(Debug, Serialize)]
struct Snapshot {
    generated_at: String,
    count: usize,
    tasks: Vec<SnapshotEntry>,
}

impl BackupHandler {
    fn snapshot(&self) -> Snapshot {
        let tasks: Vec<SnapshotEntry> = self
            .log
            .latest_per_task()
            .into_iter()
            .filter(|e| {
                e.status == TaskStatus::Completed && !e.is_audit && e.task_id != SYSTEM_TASK_ID
            })
            .map(|e| SnapshotEntry {
                last_timestamp: e.timestamp.to_rfc3339(),
                task_id: e.task_id,
                task_name: e.task_name,
                task_type: e.task_type,
                strategy: e.strategy,
                status: e.status,
                last_message: e.message,
            })
            .collect();
        Snapshot {
            generated_at: now_iso(),
            count: tasks.len(),
            tasks,
        }
    }
}

#[async_trait]
impl TaskHandler for BackupHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Backup
    }

    fn default_name(&self) -> &str {
        "Backup"
    }

    fn default_payload(&self) -> TaskPayload {
        let mut p = TaskPayload::new();
        p.insert("destination".into(), json!(self.default_destination));
        p
    }

    fn validate(&self, payload: &TaskPayload) -> Result<()> {
        match str_field(payload, "destination") {
            Some(_) => Ok(()),
            None => Err(TaskerError::Validation(
                "backup: 'destination' is required".into(),
            )),
        }
    }

    async fn execute(&self, payload: &mut TaskPayload) -> Result<String> {
        let destination = str_field(payload, "destination")
            .ok_or_else(|| TaskerError::Validation("backup: 'destination' is required".into()))?
            .to_string();
        let path = Path::new(&destination);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let snapshot = self.snapshot();
        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(path, json).await?;
        tracing::info!(
            "💾 Backup of {} completed task(s) written to {destination}",
            snapshot.count
        );

        payload.insert("last_run_at".into(), json!(now_iso()));
        Ok(format!(
            "Backup written: {} completed task(s) saved",
            snapshot.count
        ))
    }

    fn reset_generated(&self, payload: &mut TaskPayload) {
        payload.remove("last_run_at");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::AuditEntry;
    use chrono::Utc;
    use tasker_core::TaskLogEntry;

    fn entry(id: &str, status: TaskStatus) -> TaskLogEntry {
        TaskLogEntry {
            timestamp: Utc::now(),
            task_id: id.into(),
            task_name: id.into(),
            task_type: TaskType::Email,
            strategy: StrategyType::Immediate,
            status,
            message: status.to_string(),
            is_audit: false,
        }
    }

    #[tokio::test]
    async fn test_writes_completed_tasks_only() {
        let dir = std::env::temp_dir().join(format!("tasker-backup-{}", uuid::Uuid::new_v4()));
        let dest = dir.join("nested").join("backup.json");

        let log = Arc::new(TaskLog::new());
        log.log(entry("ok", TaskStatus::Running));
        log.log(entry("ok", TaskStatus::Completed));
        log.log(entry("bad", TaskStatus::Failed));
        log.add_audit_entry(AuditEntry::system(TaskType::Clean, "purge"));

        let h = BackupHandler::new(log, dest.to_str().unwrap());
        let mut payload = h.default_payload();
        let msg = h.execute(&mut payload).await.unwrap();
        assert_eq!(msg, "Backup written: 1 completed task(s) saved");
        assert!(payload.contains_key("last_run_at"));

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&dest).unwrap()).unwrap();
        assert_eq!(written["count"], 1);
        assert_eq!(written["tasks"][0]["task_id"], "ok");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_destination_required() {
        let h = BackupHandler::new(Arc::new(TaskLog::new()), "");
        assert!(h.validate(&h.default_payload()).is_err());
    }
}
