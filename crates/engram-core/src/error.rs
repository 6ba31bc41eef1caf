// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Engram memory middleware.

use std::time::Duration;

use thiserror::Error;

/// The primary error type used across all Engram adapters and pipeline stages.
#[derive(Debug, Error)]
pub enum EngramError {
    /// A native message carried a role the normalizer does not recognize.
    #[error("unsupported message kind: role `{role}`")]
    UnsupportedMessageKind { role: String },

    /// A turn was appended with a timestamp earlier than the last turn of its thread.
    #[error("out-of-order turn for thread {thread_id}: {attempted} precedes {last}")]
    OutOfOrderTurn {
        thread_id: String,
        last: chrono::DateTime<chrono::Utc>,
        attempted: chrono::DateTime<chrono::Utc>,
    },

    /// A bridged operation did not complete within its bound.
    #[error("bridged operation `{operation}` timed out after {duration:?}")]
    BridgeTimeout {
        operation: &'static str,
        duration: Duration,
    },

    /// The memory backend could not be reached or answered with a transport failure.
    #[error("backend {backend} unavailable: {source}")]
    BackendUnavailable {
        backend: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The backend could not guarantee that a thread's records were deleted.
    #[error("clear not confirmed by {backend} for thread {thread_id}: {reason}")]
    ClearNotConfirmed {
        backend: String,
        thread_id: String,
        reason: String,
    },

    /// A memory write kept failing after the adapter's retry budget.
    #[error("write to {backend} failed after {attempts} attempts: {source}")]
    WriteFailed {
        backend: String,
        attempts: u32,
        source: Box<EngramError>,
    },

    /// Configuration errors (invalid values, missing sections).
    #[error("configuration error: {0}")]
    Config(String),

    /// Local storage errors (SQLite open, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Language-model provider errors.
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// JSON encoding or decoding failures.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngramError {
    /// Shorthand for a [`EngramError::BackendUnavailable`] built from any error.
    pub fn unavailable(
        backend: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        EngramError::BackendUnavailable {
            backend: backend.into(),
            source: source.into(),
        }
    }

    /// Whether retrieval may absorb this error into a degraded result.
    ///
    /// Clear failures are never absorbed.
    pub fn is_degradable(&self) -> bool {
        !matches!(self, EngramError::ClearNotConfirmed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_wraps_string_source() {
        let err = EngramError::unavailable("vector", "connection refused");
        assert_eq!(
            err.to_string(),
            "backend vector unavailable: connection refused"
        );
    }

    #[test]
    fn clear_failures_are_not_degradable() {
        let clear = EngramError::ClearNotConfirmed {
            backend: "graph".into(),
            thread_id: "t1".into(),
            reason: "episodes remain".into(),
        };
        assert!(!clear.is_degradable());
        assert!(EngramError::Internal("x".into()).is_degradable());
    }

    #[test]
    fn write_failed_reports_attempts() {
        let err = EngramError::WriteFailed {
            backend: "vector".into(),
            attempts: 2,
            source: Box::new(EngramError::unavailable("vector", "reset")),
        };
        assert!(err.to_string().contains("after 2 attempts"));
    }
}
