//! Engine error taxonomy.

use quill_core::error::CoreError;
use quill_core::types::DbId;
use quill_db::StoreError;

use crate::delivery::DispatchError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed event or subscription.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    /// Storage failure. `process_event` may be retried; dedup absorbs the
    /// items that were already created.
    #[error("Storage error: {0}")]
    TransientStorage(#[from] StoreError),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            other => EngineError::Validation(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        EngineError::Validation(errors.to_string())
    }
}
