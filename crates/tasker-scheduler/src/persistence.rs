//! SQLite-backed record store.
//! Same contract as the JSON file store; survives restarts and keeps
//! writes cheap when there are many records.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tasker_core::{RecordPatch, RecordResult, Result, TaskRecord, TaskType, TaskerError};

use crate::store::RecordStore;

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> TaskerError + '_ {
    move |e| TaskerError::Store(format!("{context}: {e}"))
}

/// SQLite persistence for task records.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err("DB open"))?;
        Self::with_connection(conn)
    }

    /// Throwaway in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("DB open"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS task_records (
                id TEXT PRIMARY KEY,
                task_type TEXT NOT NULL,      -- 'email', 'calendar', 'social', 'clean', 'backup'
                name TEXT NOT NULL DEFAULT '',
                payload TEXT NOT NULL,        -- JSON object
                executed_at TEXT,
                result TEXT NOT NULL,         -- JSON: {status, scheduled_for?, condition?, ...}
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_task_records_created ON task_records(created_at);
         ",
            )
            .map_err(db_err("Migration"))
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type RawRow = (String, String, String, String, Option<String>, String);

fn decode((id, task_type, name, payload, executed_at, result): RawRow) -> Result<TaskRecord> {
    let executed_at = executed_at
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| TaskerError::Store(format!("record '{id}': bad executed_at: {e}")))
        })
        .transpose()?;
    Ok(TaskRecord {
        task_type: task_type.parse::<TaskType>()?,
        name,
        payload: serde_json::from_str(&payload)?,
        executed_at,
        result: serde_json::from_str::<RecordResult>(&result)?,
        id,
    })
}

const SELECT: &str =
    "SELECT id, task_type, name, payload, executed_at, result FROM task_records";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

impl RecordStore for SqliteStore {
    fn get_all(&self) -> Result<Vec<TaskRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("{SELECT} ORDER BY created_at, rowid"))
            .map_err(db_err("Load records"))?;
        let rows = stmt
            .query_map([], read_row)
            .map_err(db_err("Load records"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Load records"))?;
        rows.into_iter().map(decode).collect()
    }

    fn add(&self, mut record: TaskRecord) -> Result<String> {
        if record.id.trim().is_empty() {
            record.id = crate::task::new_task_id();
        }
        self.conn()
            .execute(
                "INSERT INTO task_records (id, task_type, name, payload, executed_at, result, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    task_type = excluded.task_type,
                    name = excluded.name,
                    payload = excluded.payload,
                    executed_at = excluded.executed_at,
                    result = excluded.result",
                params![
                    record.id,
                    record.task_type.as_str(),
                    record.name,
                    serde_json::to_string(&record.payload)?,
                    record.executed_at.map(|t| t.to_rfc3339()),
                    serde_json::to_string(&record.result)?,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(db_err("Save record"))?;
        Ok(record.id)
    }

    fn update_by_id(&self, id: &str, patch: RecordPatch) -> Result<()> {
        let mut record = self
            .find_by_id(id)?
            .ok_or_else(|| TaskerError::Store(format!("record '{id}' not found")))?;
        patch.apply(&mut record);
        self.conn()
            .execute(
                "UPDATE task_records SET executed_at = ?1, result = ?2 WHERE id = ?3",
                params![
                    record.executed_at.map(|t| t.to_rfc3339()),
                    serde_json::to_string(&record.result)?,
                    id,
                ],
            )
            .map_err(db_err("Update record"))?;
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<TaskRecord>> {
        let raw = self
            .conn()
            .query_row(&format!("{SELECT} WHERE id = ?1"), params![id], read_row)
            .optional()
            .map_err(db_err("Find record"))?;
        raw.map(decode).transpose()
    }

    fn clear(&self) -> Result<()> {
        self.conn()
            .execute("DELETE FROM task_records", [])
            .map_err(db_err("Clear records"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasker_core::{Condition, TaskPayload, TaskStatus};

    fn record(id: &str) -> TaskRecord {
        let mut payload = TaskPayload::new();
        payload.insert("message".into(), serde_json::json!("hi"));
        TaskRecord {
            id: id.into(),
            task_type: TaskType::Social,
            name: "post".into(),
            payload,
            executed_at: None,
            result: RecordResult::waiting(Condition::Night, 1000, 3),
        }
    }

    #[test]
    fn test_roundtrip_and_update() {
        let store = SqliteStore::in_memory().unwrap();
        store.add(record("a")).unwrap();
        store.add(record("b")).unwrap();

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].result.condition, Some(Condition::Night));
        assert_eq!(all[0].payload["message"], "hi");

        store
            .update_by_id("a", RecordPatch::finished(RecordResult::status(TaskStatus::Canceled)))
            .unwrap();
        let a = store.find_by_id("a").unwrap().unwrap();
        assert_eq!(a.result.status, TaskStatus::Canceled);
        assert!(a.executed_at.is_some());
        assert!(store.update_by_id("zzz", RecordPatch::default()).is_err());
    }

    #[test]
    fn test_upsert_and_clear() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store.add(record("")).unwrap();
        let mut again = record(&id);
        again.name = "renamed".into();
        store.add(again).unwrap();
        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "renamed");

        store.clear().unwrap();
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_file_database_persists() {
        let dir = std::env::temp_dir().join(format!("tasker-sqlite-{}", uuid::Uuid::new_v4()));
        let path = dir.join("tasks.db");
        SqliteStore::open(&path).unwrap().add(record("durable")).unwrap();
        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.find_by_id("durable").unwrap().is_some());
        std::fs::remove_dir_all(&dir).ok();
    }
}
