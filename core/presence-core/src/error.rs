//! Error types for presence-core operations.
//!
//! Coordination is best-effort: the facade layer swallows these and degrades,
//! but the protocol layers report them explicitly so callers can apply the
//! retry/eviction policies.

use thiserror::Error;

/// All errors that can occur in presence-core operations.
#[derive(Debug, Error)]
pub enum PresenceError {
    // ─────────────────────────────────────────────────────────────────────
    // Shared Medium Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Shared medium rejected write to {key}: quota exceeded")]
    QuotaExceeded { key: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Filesystem watch error: {source}")]
    Watch {
        #[source]
        source: notify::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Serialization Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PresenceError {
    /// Wraps an I/O error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PresenceError::Io {
            context: context.into(),
            source,
        }
    }

    /// Wraps a JSON error with a short description of what was being encoded.
    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        PresenceError::Json {
            context: context.into(),
            source,
        }
    }

    /// Returns true if this error is the medium refusing a write for capacity.
    pub fn is_quota(&self) -> bool {
        matches!(self, PresenceError::QuotaExceeded { .. })
    }
}

/// Convenience type alias for Results using PresenceError.
pub type Result<T> = std::result::Result<T, PresenceError>;
