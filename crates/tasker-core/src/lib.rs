//! # Tasker Core
//!
//! Shared vocabulary for the Tasker task runner: the data model,
//! the error type and the TOML configuration.

pub mod config;
pub mod error;
pub mod record;
pub mod request;
pub mod types;

pub use config::TaskerConfig;
pub use error::{Result, TaskerError};
pub use record::{RecordPatch, RecordResult, TaskRecord};
pub use request::{TaskOverrides, TaskRequest, TaskResponse, TaskSource};
pub use types::{
    Condition, ExecutionStrategyConfig, StrategyType, TaskLogEntry, TaskPayload, TaskResult,
    TaskStatus, TaskType,
};
