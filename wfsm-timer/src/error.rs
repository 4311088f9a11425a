//! Timer error types.

use thiserror::Error;
use wfsm_core::StoreError;

/// Errors from the timer tasks.
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("store scan failed for {kind}: {source}")]
    Scan {
        kind: String,
        #[source]
        source: StoreError,
    },

    #[error("dispatch failed for entity {entity_id}: {reason}")]
    Dispatch { entity_id: String, reason: String },

    #[error("dispatch channel closed")]
    ChannelClosed,
}

impl TimerError {
    /// Returns the error code string.
    pub fn error_code(&self) -> &'static str {
        match self {
            TimerError::Scan { .. } => "SCAN_FAILED",
            TimerError::Dispatch { .. } => "DISPATCH_FAILED",
            TimerError::ChannelClosed => "CHANNEL_CLOSED",
        }
    }

    /// Returns whether the next tick may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TimerError::Scan { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let scan = TimerError::Scan {
            kind: "document".into(),
            source: StoreError::Unavailable("db down".into()),
        };
        assert_eq!(scan.error_code(), "SCAN_FAILED");
        assert!(scan.is_retryable());
        assert!(scan.to_string().contains("db down"));

        assert_eq!(TimerError::ChannelClosed.error_code(), "CHANNEL_CLOSED");
        assert!(!TimerError::ChannelClosed.is_retryable());
    }
}
