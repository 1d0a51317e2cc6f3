//! Storage error types.

use statewise_core::{CoreError, DefinitionId, InstanceId, RepositoryError};
use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("definition not found: {0}")]
    DefinitionNotFound(DefinitionId),

    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("data corruption: {0}")]
    Corruption(String),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl From<StorageError> for RepositoryError {
    fn from(e: StorageError) -> Self {
        RepositoryError::Failure(e.to_string())
    }
}
