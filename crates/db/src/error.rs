//! Storage error type shared by every store implementation.

use quill_core::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database could not be reached or the query failed. Callers
    /// treat this as transient and may retry.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped to a domain value.
    #[error("Corrupt {entity} row {id}: {reason}")]
    Corrupt {
        entity: &'static str,
        id: DbId,
        reason: String,
    },

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    /// Input rejected before reaching storage.
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// A status transition the state machine does not allow.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl From<validator::ValidationErrors> for StoreError {
    fn from(errors: validator::ValidationErrors) -> Self {
        StoreError::Invalid(errors.to_string())
    }
}

impl StoreError {
    pub(crate) fn corrupt(entity: &'static str, id: DbId, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            entity,
            id,
            reason: reason.into(),
        }
    }
}
