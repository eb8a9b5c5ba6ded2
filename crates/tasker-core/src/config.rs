//! Tasker configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TaskerError};
use crate::types::Condition;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskerConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
}

impl TaskerConfig {
    /// Load config from the default path (~/.tasker/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TaskerError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TaskerError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TaskerError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Tasker home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tasker")
    }
}

/// Strategy defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_ms")]
    pub conditional_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub conditional_max_attempts: u32,
    /// Used by recovery when a persisted condition can no longer be resolved.
    #[serde(default = "default_condition")]
    pub default_condition: Condition,
}

fn default_interval_ms() -> u64 { 60_000 }
fn default_max_attempts() -> u32 { 10 }
fn default_condition() -> Condition { Condition::Day }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            conditional_interval_ms: default_interval_ms(),
            conditional_max_attempts: default_max_attempts(),
            default_condition: default_condition(),
        }
    }
}

/// Task history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
}

fn default_dedup_window_ms() -> u64 { 500 }

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: default_dedup_window_ms(),
        }
    }
}

/// Record store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Json,
    Sqlite,
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String { "~/.tasker/tasks_db.json".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

/// Settings for the built-in task handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Artificial latency of the simulated email/calendar/social/clean work.
    #[serde(default = "default_latency_ms")]
    pub simulated_latency_ms: u64,
    #[serde(default = "default_backup_destination")]
    pub backup_destination: String,
}

fn default_latency_ms() -> u64 { 300 }
fn default_backup_destination() -> String { "~/.tasker/backup_db.json".into() }

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            simulated_latency_ms: default_latency_ms(),
            backup_destination: default_backup_destination(),
        }
    }
}
