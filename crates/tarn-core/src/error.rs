//! Error types and result aliases shared across Tarn.
//!
//! Every error surfaced to a caller carries one of the codes in
//! [`ErrorCode`]; per-key conflicts are always aggregated into a list rather
//! than failing on the first one.

use serde::{Deserialize, Serialize};

use crate::key::ContentKey;

/// The result type used throughout Tarn.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error codes surfaced on the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Reference, key, or content absent.
    NotFound,
    /// CAS retry exhausted, or a reference-level requirement was violated.
    ReferenceConflict,
    /// One or more per-key conflicts; see the conflicts list.
    ContentConflict,
    /// Create-only operation hit an existing entity.
    AlreadyExists,
    /// Malformed key, location outside the warehouse, or a bad update.
    InvalidArgument,
    /// Retryable backend failure.
    Unavailable,
    /// Programmer error, violated invariant, or codec failure.
    Internal,
    /// Caller-set deadline elapsed.
    DeadlineExceeded,
}

impl ErrorCode {
    /// Returns the HTTP-ish status associated with this code.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::ReferenceConflict | Self::ContentConflict | Self::AlreadyExists => 409,
            Self::InvalidArgument => 400,
            Self::Unavailable => 503,
            Self::Internal => 500,
            Self::DeadlineExceeded => 408,
        }
    }

    /// Returns the canonical reason string for this code.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::NotFound => "Not found",
            Self::ReferenceConflict => "Reference conflict",
            Self::ContentConflict => "Content conflict",
            Self::AlreadyExists => "Already exists",
            Self::InvalidArgument => "Invalid argument",
            Self::Unavailable => "Unavailable",
            Self::Internal => "Internal error",
            Self::DeadlineExceeded => "Deadline exceeded",
        }
    }
}

/// The kind of a per-key conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    /// The key's payload differs from what the operation required.
    PayloadDiffers,
    /// The key exists although the operation required it not to.
    KeyExists,
    /// The key does not exist although the operation required it to.
    KeyDoesNotExist,
}

/// A single keyed conflict collected during commit, merge, or transplant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// The key the conflict applies to, when key-specific.
    pub key: Option<ContentKey>,
    /// What kind of conflict this is.
    pub kind: ConflictKind,
    /// Human-readable description.
    pub message: String,
}

impl Conflict {
    /// Creates a keyed conflict.
    #[must_use]
    pub fn new(key: ContentKey, kind: ConflictKind, message: impl Into<String>) -> Self {
        Self {
            key: Some(key),
            kind,
            message: message.into(),
        }
    }
}

/// Errors that can occur in Tarn operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The requested reference, key, or content does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Description of what was looked up.
        message: String,
    },

    /// A reference could not be advanced: CAS retries were exhausted or a
    /// reference-level requirement was violated.
    #[error("reference conflict: {message}")]
    ReferenceConflict {
        /// Description of the conflicting update.
        message: String,
    },

    /// One or more keyed conflicts were detected.
    #[error("content conflict: {}", format_conflicts(.conflicts))]
    ContentConflict {
        /// Every conflict detected, in key order.
        conflicts: Vec<Conflict>,
    },

    /// A create-only operation hit an existing entity.
    #[error("already exists: {message}")]
    AlreadyExists {
        /// Description of the colliding entity.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of what made the input invalid.
        message: String,
    },

    /// A retryable backend failure survived the local retry budget.
    #[error("unavailable: {message}")]
    Unavailable {
        /// Description of the backend failure.
        message: String,
    },

    /// An internal error that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },

    /// A caller-supplied deadline elapsed before the operation finished.
    #[error("deadline exceeded: {message}")]
    DeadlineExceeded {
        /// Description of the timed-out operation.
        message: String,
    },
}

fn format_conflicts(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(|c| c.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a reference-conflict error.
    #[must_use]
    pub fn reference_conflict(message: impl Into<String>) -> Self {
        Self::ReferenceConflict {
            message: message.into(),
        }
    }

    /// Creates a content-conflict error from the collected conflicts.
    #[must_use]
    pub fn content_conflict(conflicts: Vec<Conflict>) -> Self {
        Self::ContentConflict { conflicts }
    }

    /// Creates an already-exists error.
    #[must_use]
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists {
            message: message.into(),
        }
    }

    /// Creates an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a deadline-exceeded error.
    #[must_use]
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            message: message.into(),
        }
    }

    /// Returns the stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::ReferenceConflict { .. } => ErrorCode::ReferenceConflict,
            Self::ContentConflict { .. } => ErrorCode::ContentConflict,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::Unavailable { .. } => ErrorCode::Unavailable,
            Self::Internal { .. } => ErrorCode::Internal,
            Self::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
        }
    }

    /// Returns the keyed conflicts carried by this error, if any.
    #[must_use]
    pub fn conflicts(&self) -> &[Conflict] {
        match self {
            Self::ContentConflict { conflicts } => conflicts,
            _ => &[],
        }
    }
}

/// The error shape rendered on the service boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable error code.
    pub error_code: ErrorCode,
    /// Canonical reason for the code.
    pub reason: String,
    /// HTTP-ish status.
    pub status: u16,
    /// Human-readable message.
    pub message: String,
    /// Keyed conflicts, when the error aggregates any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Conflict>,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        let code = err.code();
        Self {
            error_code: code,
            reason: code.reason().to_string(),
            status: code.status(),
            message: err.to_string(),
            conflicts: err.conflicts().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        assert_eq!(ErrorCode::NotFound.status(), 404);
        assert_eq!(ErrorCode::ReferenceConflict.status(), 409);
        assert_eq!(ErrorCode::InvalidArgument.status(), 400);
        assert_eq!(ErrorCode::Unavailable.status(), 503);
    }

    #[test]
    fn content_conflict_formats_all_entries() {
        let key = ContentKey::try_new(vec!["db".into(), "t1".into()]).unwrap();
        let err = Error::content_conflict(vec![
            Conflict::new(key.clone(), ConflictKind::KeyExists, "key db.t1 exists"),
            Conflict::new(key, ConflictKind::PayloadDiffers, "payload of db.t1 differs"),
        ]);
        let text = err.to_string();
        assert!(text.contains("key db.t1 exists"));
        assert!(text.contains("payload of db.t1 differs"));
        assert_eq!(err.conflicts().len(), 2);
    }

    #[test]
    fn error_response_carries_conflicts() {
        let key = ContentKey::try_new(vec!["a".into()]).unwrap();
        let err = Error::content_conflict(vec![Conflict::new(
            key,
            ConflictKind::KeyDoesNotExist,
            "key a does not exist",
        )]);
        let response = ErrorResponse::from(&err);
        assert_eq!(response.status, 409);
        assert_eq!(response.conflicts.len(), 1);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("CONTENT_CONFLICT"));
        assert!(json.contains("KEY_DOES_NOT_EXIST"));
    }
}
