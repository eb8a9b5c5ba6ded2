//! Tasker error types.

use crate::types::TaskType;

/// Errors surfaced by the task runner.
#[derive(Debug, thiserror::Error)]
pub enum TaskerError {
    /// Request rejected before anything was started.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No template registered under key '{0}'")]
    TemplateNotFound(String),

    #[error("Unsupported task type: {0}")]
    UnsupportedTaskType(TaskType),

    /// Strategy could not be constructed from its configuration.
    #[error("Strategy error: {0}")]
    Strategy(String),

    /// A task's own execution failed.
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TaskerError {
    /// True for errors that are reported synchronously to the caller of `run`.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::TemplateNotFound(_)
                | Self::UnsupportedTaskType(_)
                | Self::Strategy(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TaskerError>;
