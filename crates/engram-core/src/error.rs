//! Error types shared across the engine
//!
//! One crate-wide error enum: the surfaced kinds map 1:1 onto the
//! service's error contract, plus adapters for the store and JSON layers.

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A memory, relationship, or other record does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// Input failed validation before reaching the store
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Missing or unusable principal identity
    #[error("unauthorized")]
    Unauthorized,
    /// The principal exists but may not perform this operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Uniqueness violation (e.g. duplicate relationship edge)
    #[error("conflict: {0}")]
    Conflict(String),
    /// An upstream provider is unavailable or a circuit is open
    #[error("service degraded: {0}")]
    ServiceDegraded(String),
    /// Invariant violation or other unrecoverable state
    #[error("internal error: {0}")]
    Internal(String),
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable label for logs and wire responses
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::Unauthorized => "unauthorized",
            Error::PermissionDenied(_) => "permission_denied",
            Error::Conflict(_) => "conflict",
            Error::ServiceDegraded(_) => "service_degraded",
            Error::Internal(_) => "internal_error",
            Error::Database(_) | Error::Serde(_) | Error::Io(_) => "internal_error",
        }
    }

    /// Whether a retry against the same upstream could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ServiceDegraded(_) | Error::Io(_))
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(Error::NotFound("x".into()).kind(), "not_found");
        assert_eq!(Error::Conflict("dup".into()).kind(), "conflict");
        assert_eq!(Error::Internal("bad".into()).kind(), "internal_error");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::ServiceDegraded("open".into()).is_retryable());
        assert!(!Error::InvalidInput("empty".into()).is_retryable());
    }
}
