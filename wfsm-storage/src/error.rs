//! Storage error types.

use thiserror::Error;
use wfsm_core::StoreError;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("data corruption in {kind}/{entity_id}: {reason}")]
    Corruption {
        kind: String,
        entity_id: String,
        reason: String,
    },
}

impl StorageError {
    /// Returns the error code string.
    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::Io(_) => "IO_ERROR",
            StorageError::Json(_) => "JSON_ERROR",
            StorageError::Corruption { .. } => "DATA_CORRUPTION",
        }
    }

    /// Returns whether retrying the operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        if e.is_retryable() {
            return StoreError::Unavailable(e.to_string());
        }
        match e {
            StorageError::Corruption {
                kind,
                entity_id,
                reason,
            } => StoreError::Corrupt {
                kind,
                entity_id,
                reason,
            },
            other => StoreError::Backend(Box::new(other)),
        }
    }
}
