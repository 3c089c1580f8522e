//! Scheduler errors

use finepay_store::StoreError;
use thiserror::Error;

/// Errors from the Batch Scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    #[error("Scheduler is disabled by configuration")]
    Disabled,

    #[error("Another worker already runs the scheduler: {0}")]
    AlreadyRunning(String),

    #[error("Scheduler task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn is_already_running(&self) -> bool {
        matches!(self, SchedulerError::AlreadyRunning(_))
    }
}
