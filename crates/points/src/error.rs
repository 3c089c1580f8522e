//! Point engine errors

use finepay_core::CoreError;
use finepay_store::StoreError;
use thiserror::Error;

pub use finepay_core::BatchItemError;

/// Errors from the Point Ledger Engine
#[derive(Debug, Error)]
pub enum PointsError {
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

    #[error("Demerit points for ticket {ticket_id} were already applied")]
    AlreadyApplied { ticket_id: String },

    #[error("Gave up on profile {profile_id} after {attempts} concurrent update conflicts")]
    Contention { profile_id: String, attempts: u32 },

    #[error("Invalid input: {0}")]
    Core(#[from] CoreError),

    #[error("Store error: {0}")]
    Store(StoreError),
}

/// Result type for point operations
pub type PointsResult<T> = Result<T, PointsError>;

impl From<StoreError> for PointsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => PointsError::NotFound { entity, id },
            other => PointsError::Store(other),
        }
    }
}

impl PointsError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn cross_tenant(entity: &str, id: &str, government_id: &str) -> Self {
        Self::CrossTenant {
            entity: entity.to_string(),
            id: id.to_string(),
            government_id: government_id.to_string(),
        }
    }

    /// Lost a compare-and-set race; the operation can be retried
    pub fn is_conflict(&self) -> bool {
        matches!(self, PointsError::Store(e) if e.is_conflict())
    }

    /// Store failure that aborted the unit of work
    pub fn is_fatal(&self) -> bool {
        matches!(self, PointsError::Store(e) if e.is_fatal())
    }
}
