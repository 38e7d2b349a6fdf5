//! Error types for the mock server.
//!
//! Covers every failure mode of the registry, the matching engine, the
//! rate limiter and template expansion. Only `Validation`, `NotFound`,
//! `RateLimitExceeded` and `Storage` ever reach a caller; template and
//! match-evaluation errors are recovered where they occur.

use thiserror::Error;

/// Result type alias using MockError
pub type Result<T> = std::result::Result<T, MockError>;

/// Error type for all mock server operations
#[derive(Error, Debug)]
pub enum MockError {
    /// Malformed create/update input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown id, unresolvable owner, or no matching mock
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller exceeded its request budget
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    /// Malformed template token arguments
    #[error("Template error: {0}")]
    Template(String),

    /// Malformed declared match rules on a candidate
    #[error("Match evaluation error: {0}")]
    MatchEvaluation(String),

    /// Backing store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl MockError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// HTTP status class this error surfaces as.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::RateLimitExceeded { .. } => 429,
            Self::Template(_) | Self::MatchEvaluation(_) | Self::Storage(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(MockError::validation("bad").status_code(), 400);
        assert_eq!(MockError::not_found("gone").status_code(), 404);
        assert_eq!(
            MockError::RateLimitExceeded { retry_after_secs: 60 }.status_code(),
            429
        );
        assert_eq!(MockError::storage("down").status_code(), 500);
    }

    #[test]
    fn test_display() {
        let err = MockError::validation("path must not be empty");
        assert_eq!(err.to_string(), "Validation error: path must not be empty");
    }
}
