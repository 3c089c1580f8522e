//! Notification errors

use thiserror::Error;

/// Errors from a notification channel. Never fatal to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("No contact method for {0}")]
    NoRecipient(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Notification timeout after {0}ms")]
    Timeout(u64),
}

/// Result type for notification operations
pub type NotifyResult<T> = Result<T, NotifyError>;
