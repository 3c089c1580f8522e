//! Core domain errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building or parsing domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid {field} value: {value}")]
    InvalidEnumValue { field: String, value: String },

    #[error("Identifier must not be empty")]
    EmptyIdentifier,

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create an invalid enum value error
    pub fn invalid_enum(field: &str, value: &str) -> Self {
        Self::InvalidEnumValue {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

/// One failed item of a batch sweep; collected, never raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemError {
    pub item_id: String,
    pub message: String,
}

impl BatchItemError {
    pub fn new(item_id: impl Into<String>, err: &impl std::fmt::Display) -> Self {
        Self {
            item_id: item_id.into(),
            message: err.to_string(),
        }
    }
}
