//! Error types for the BkApp operator.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// How the pipeline driver should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network, timeout or server-side failure. Retry the whole pass.
    Transient,
    /// Optimistic concurrency failure. Re-fetch and retry the whole pass.
    Conflict,
    /// The pass was cancelled before it could finish.
    Cancelled,
    /// Retrying without an external change will not help.
    Fatal,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::NotFound(_) | Error::Store(_) | Error::Timeout(_) => ErrorClass::Transient,
            Error::Conflict(_) => ErrorClass::Conflict,
            Error::Cancelled => ErrorClass::Cancelled,
            Error::InvalidObject(_) | Error::Internal(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() != ErrorClass::Fatal
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_retryable() {
        let err = Error::Conflict("resourceVersion changed".to_string());
        assert_eq!(err.class(), ErrorClass::Conflict);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invalid_object_is_fatal() {
        let err = Error::InvalidObject("missing namespace".to_string());
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_store_and_timeout_are_transient() {
        assert_eq!(
            Error::Store("connection reset".to_string()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            Error::Timeout("list pods".to_string()).class(),
            ErrorClass::Transient
        );
        assert!(Error::Cancelled.is_retryable());
    }
}
