//! Late-fee engine errors

use finepay_store::StoreError;
use thiserror::Error;

/// Errors from the Late-Fee Accrual Engine
#[derive(Debug, Error)]
pub enum LateFeeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("{entity} {id} does not belong to government {government_id}")]
    CrossTenant {
        entity: String,
        id: String,
        government_id: String,
    },

    #[error("Store error: {0}")]
    Store(StoreError),
}

/// Result type for late-fee operations
pub type LateFeeResult<T> = Result<T, LateFeeError>;

impl From<StoreError> for LateFeeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => LateFeeError::NotFound { entity, id },
            other => LateFeeError::Store(other),
        }
    }
}

impl LateFeeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// Store failure that must abort the whole government batch
    pub fn is_fatal(&self) -> bool {
        matches!(self, LateFeeError::Store(e) if e.is_fatal())
    }
}
