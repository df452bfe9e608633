//! Error taxonomy shared by every AcornDB component.
//!
//! All fallible core operations return [`Result`]. Absence is signalled
//! through `Option` return shapes (`get`, `load`) rather than errors;
//! [`AcornError::NotFound`] exists for surfaces that must report it as a
//! failure, such as the FFI shim and targeted history lookups.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, AcornError>;

/// Every failure mode the engine can surface to a caller.
#[derive(Debug, Error)]
pub enum AcornError {
    /// No record exists with the given id.
    #[error("no record with id `{0}`")]
    NotFound(String),

    /// An id was supplied or extracted but is empty or whitespace-only.
    #[error("invalid id: `{0}`")]
    InvalidId(String),

    /// The payload type has no resolvable id strategy.
    #[error("no id extraction strategy for type `{type_name}`")]
    IdExtractionUnavailable {
        /// Payload type the extractor was asked to resolve.
        type_name: &'static str,
    },

    /// A unique index would map one key value to two distinct ids.
    #[error("unique index `{index}` already maps {value} to id `{existing_id}`")]
    UniqueIndexViolation {
        /// Name of the violated index.
        index: String,
        /// Display form of the colliding key value.
        value: String,
        /// Id that already holds the value.
        existing_id: String,
    },

    /// A policy root rejected the operation.
    #[error("policy denied {operation}: {reason}")]
    PolicyDenied {
        /// Operation that was rejected (`write` or `read`).
        operation: &'static str,
        /// Reason reported by the policy engine.
        reason: String,
    },

    /// The operation is not offered by this backend.
    #[error("`{operation}` is not supported by the `{trunk_kind}` backend")]
    Unsupported {
        /// Operation that was requested.
        operation: &'static str,
        /// Capability tag of the refusing backend.
        trunk_kind: &'static str,
    },

    /// The target (peer, tangle, or collection) has been disposed.
    #[error("{0} is disposed")]
    Disposed(&'static str),

    /// An underlying read, write, or delete failed.
    #[error("backend I/O failure: {0}")]
    BackendIo(String),

    /// Reserved for unresolvable conflicts; the built-in judges never raise it.
    #[error("unresolvable conflict for id `{0}`")]
    Conflict(String),

    /// Decoding failed after the root pipeline was reversed.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// An operation exceeded its deadline (resilient wrapper only).
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The circuit breaker is open (resilient wrapper only).
    #[error("circuit breaker is open; backend calls are short-circuited")]
    CircuitOpen,
}

impl AcornError {
    /// Builds an [`AcornError::Unsupported`] for a backend operation.
    #[must_use]
    pub fn unsupported(operation: &'static str, trunk_kind: &'static str) -> Self {
        Self::Unsupported {
            operation,
            trunk_kind,
        }
    }

    /// True when retrying the same call might succeed.
    ///
    /// Used by the resilient backend wrapper to decide between retry and
    /// fail-fast: malformed data and contract violations never heal on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendIo(_) | Self::Timeout(_) | Self::CircuitOpen
        )
    }
}

impl From<std::io::Error> for AcornError {
    fn from(err: std::io::Error) -> Self {
        Self::BackendIo(err.to_string())
    }
}

impl From<serde_json::Error> for AcornError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_the_offending_id() {
        let err = AcornError::NotFound("acorn-7".to_string());
        assert_eq!(err.to_string(), "no record with id `acorn-7`");
    }

    #[test]
    fn unique_violation_names_index_and_holder() {
        let err = AcornError::UniqueIndexViolation {
            index: "IX_User_Email".to_string(),
            value: "\"a@x\"".to_string(),
            existing_id: "1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("IX_User_Email"));
        assert!(msg.contains("a@x"));
        assert!(msg.contains("id `1`"));
    }

    #[test]
    fn io_errors_map_to_backend_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: AcornError = io.into();
        assert!(matches!(err, AcornError::BackendIo(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn serde_errors_map_to_corrupt() {
        let bad = serde_json::from_str::<serde_json::Value>("{nope");
        let err: AcornError = bad.unwrap_err().into();
        assert!(matches!(err, AcornError::Corrupt(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn transience_classification() {
        assert!(AcornError::CircuitOpen.is_transient());
        assert!(AcornError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!AcornError::InvalidId(String::new()).is_transient());
        assert!(!AcornError::Disposed("tangle").is_transient());
    }
}
