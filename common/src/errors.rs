// Error handling framework
// Validation and not-found errors surface to callers; scheduler and execution
// errors are contained by the orchestrator and the live scheduler.

use crate::models::JobIdentity;
use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Cron expression '{expression}' has no future fire time")]
    NoNextExecution { expression: String },
}

/// Validation errors raised before any state change
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("A trigger named '{0}' already exists")]
    DuplicateName(String),

    #[error("Invalid trigger order: {0}")]
    InvalidOrder(String),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

impl ValidationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFieldValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Persistence sink errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Filesystem error: {0}")]
    FileSystemError(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::FileSystemError(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidJson(err.to_string())
    }
}

/// Errors returned by the configuration store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Trigger not found: {0}")]
    NotFound(String),

    #[error("Failed to persist configuration: {0}")]
    Storage(#[from] StorageError),
}

/// Errors returned by the live scheduler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Job already scheduled: {0}")]
    JobExists(JobIdentity),

    #[error("Job not found: {0}")]
    JobNotFound(JobIdentity),

    #[error(transparent)]
    InvalidSchedule(#[from] ScheduleError),

    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

/// Trigger execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to create HTTP client: {0}")]
    ClientBuildFailed(String),
}
