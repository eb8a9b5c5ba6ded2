//! Record stores: the durable substrate recovery reads.
//! `JsonFileStore` keeps every record in one pretty-printed JSON file:
//! human-readable, and only touched when a record changes.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tasker_core::{RecordPatch, Result, TaskRecord, TaskerConfig, TaskerError};

use crate::task::new_task_id;

/// Storage operations the engine needs. Implementations must give
/// read-your-writes consistency within one process.
pub trait RecordStore: Send + Sync {
    fn get_all(&self) -> Result<Vec<TaskRecord>>;

    /// Insert or replace by id. An empty id gets a generated one.
    /// Returns the record's id.
    fn add(&self, record: TaskRecord) -> Result<String>;

    /// Patch an existing record. Unknown ids are an error.
    fn update_by_id(&self, id: &str, patch: RecordPatch) -> Result<()>;

    fn find_by_id(&self, id: &str) -> Result<Option<TaskRecord>>;

    fn clear(&self) -> Result<()>;
}

fn assign_id(record: &mut TaskRecord) -> String {
    if record.id.trim().is_empty() {
        record.id = new_task_id();
    }
    record.id.clone()
}

fn upsert(records: &mut Vec<TaskRecord>, record: TaskRecord) {
    match records.iter_mut().find(|r| r.id == record.id) {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}

fn patch(records: &mut [TaskRecord], id: &str, patch: RecordPatch) -> Result<()> {
    let record = records
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or_else(|| TaskerError::Store(format!("record '{id}' not found")))?;
    patch.apply(record);
    Ok(())
}

/// Process-local store, lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<TaskRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `records`.
    pub fn with_records(records: Vec<TaskRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TaskRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordStore for MemoryStore {
    fn get_all(&self) -> Result<Vec<TaskRecord>> {
        Ok(self.lock().clone())
    }

    fn add(&self, mut record: TaskRecord) -> Result<String> {
        let id = assign_id(&mut record);
        upsert(&mut self.lock(), record);
        Ok(id)
    }

    fn update_by_id(&self, id: &str, patch_: RecordPatch) -> Result<()> {
        patch(&mut self.lock(), id, patch_)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<TaskRecord>> {
        Ok(self.lock().iter().find(|r| r.id == id).cloned())
    }

    fn clear(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }
}

/// File-based record store.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Store backed by `path`. The parent directory is created on first write.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Default store path (~/.tasker/tasks_db.json).
    pub fn default_path() -> PathBuf {
        TaskerConfig::home_dir().join("tasks_db.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or empty file means no records. A corrupt file is an error,
    /// never silently treated as empty.
    fn load(&self) -> Result<Vec<TaskRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let json = std::fs::read_to_string(&self.path)
            .map_err(|e| TaskerError::Store(format!("Read error: {e}")))?;
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&json).map_err(|e| {
            TaskerError::Store(format!("Failed to parse {}: {e}", self.path.display()))
        })
    }

    fn save(&self, records: &[TaskRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| TaskerError::Store(format!("Serialize error: {e}")))?;
        std::fs::write(&self.path, json)
            .map_err(|e| TaskerError::Store(format!("Write error: {e}")))?;
        tracing::debug!("💾 Saved {} records to {}", records.len(), self.path.display());
        Ok(())
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Vec<TaskRecord>) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records = self.load()?;
        let out = f(&mut records)?;
        self.save(&records)?;
        Ok(out)
    }
}

impl RecordStore for JsonFileStore {
    fn get_all(&self) -> Result<Vec<TaskRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load()
    }

    fn add(&self, mut record: TaskRecord) -> Result<String> {
        let id = assign_id(&mut record);
        self.modify(|records| {
            upsert(records, record);
            Ok(())
        })?;
        Ok(id)
    }

    fn update_by_id(&self, id: &str, patch_: RecordPatch) -> Result<()> {
        self.modify(|records| patch(records, id, patch_))
    }

    fn find_by_id(&self, id: &str) -> Result<Option<TaskRecord>> {
        Ok(self.get_all()?.into_iter().find(|r| r.id == id))
    }

    fn clear(&self) -> Result<()> {
        self.modify(|records| {
            records.clear();
            Ok(())
        })
    }
}
