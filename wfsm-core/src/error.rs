//! Core error types.

use crate::store::StoreError;
use std::fmt;
use thiserror::Error;

/// Errors from the state machine engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid transition table '{table}': {reason}")]
    InvalidDefinition { table: String, reason: String },

    #[error("entity not found: {kind}/{entity_id}")]
    EntityNotFound { kind: String, entity_id: String },

    #[error("entity already exists: {kind}/{entity_id}")]
    EntityExists { kind: String, entity_id: String },

    #[error("entity has been deleted: {kind}/{entity_id}")]
    EntityDeleted { kind: String, entity_id: String },

    #[error("entity {entity_id} belongs to '{actual}', not '{expected}'")]
    KindMismatch {
        entity_id: String,
        expected: String,
        actual: String,
    },

    #[error("entity {entity_id} is in undeclared state '{state}'")]
    UnknownState { entity_id: String, state: String },

    #[error("unmatched event '{event}' for entity {entity_id} in state '{state}'")]
    UnmatchedEvent {
        entity_id: String,
        state: String,
        event: String,
    },

    #[error("{stage} hook failed for entity {entity_id}: {source}")]
    Hook {
        entity_id: String,
        stage: HookStage,
        #[source]
        source: HookError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CoreError {
    /// Returns whether this error indicates the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Store(e) if e.is_retryable())
    }

    /// Returns a stable error code suitable for logs and metrics labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            CoreError::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            CoreError::EntityExists { .. } => "ENTITY_EXISTS",
            CoreError::EntityDeleted { .. } => "ENTITY_DELETED",
            CoreError::KindMismatch { .. } => "KIND_MISMATCH",
            CoreError::UnknownState { .. } => "UNKNOWN_STATE",
            CoreError::UnmatchedEvent { .. } => "UNMATCHED_EVENT",
            CoreError::Hook { .. } => "HOOK_FAILED",
            CoreError::Store(_) => "STORE_ERROR",
        }
    }
}

/// Hook lists a failure can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Exit,
    Action,
    Entry,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookStage::Exit => f.write_str("exit"),
            HookStage::Action => f.write_str("action"),
            HookStage::Entry => f.write_str("entry"),
        }
    }
}

/// Error returned by a user-supplied hook.
#[derive(Debug)]
pub struct HookError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an underlying error with a message.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for HookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}
