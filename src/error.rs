//! Error types for index construction and queries.

use std::collections::TryReserveError;
use thiserror::Error;

/// Errors that can occur while building or querying an index.
///
/// All of them are detected before any traversal work starts; a failed call
/// never returns a partially filled result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AtriaError {
    /// A precondition on the arguments was violated.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of what is wrong with the argument
        message: String,
    },

    /// Fewer eligible points exist than neighbours were requested.
    #[error("Insufficient data: requested {requested} neighbours, only {available} eligible points")]
    InsufficientData {
        /// Number of neighbours requested
        requested: usize,
        /// Number of points not hidden by the exclusion window
        available: usize,
    },

    /// Memory for the point set or the tree could not be allocated.
    #[error("Resource exhausted: {message}")]
    ResourceExhausted {
        /// What could not be allocated
        message: String,
    },
}

impl AtriaError {
    /// Create an InvalidArgument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an InsufficientData error.
    pub fn insufficient_data(requested: usize, available: usize) -> Self {
        Self::InsufficientData {
            requested,
            available,
        }
    }

    /// Create a ResourceExhausted error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Wrap a failed `try_reserve` call.
    pub(crate) fn from_reserve(what: &str, err: TryReserveError) -> Self {
        Self::resource_exhausted(format!("{what}: {err}"))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AtriaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AtriaError::invalid_argument("k must be positive");
        assert_eq!(err.to_string(), "Invalid argument: k must be positive");

        let err = AtriaError::insufficient_data(10, 4);
        assert_eq!(
            err.to_string(),
            "Insufficient data: requested 10 neighbours, only 4 eligible points"
        );

        let err = AtriaError::resource_exhausted("tree arena");
        assert_eq!(err.to_string(), "Resource exhausted: tree arena");
    }

    #[test]
    fn test_from_reserve() {
        let mut v: Vec<u64> = Vec::new();
        let reserve_err = v.try_reserve(usize::MAX).unwrap_err();
        let err = AtriaError::from_reserve("point set", reserve_err);
        assert!(matches!(err, AtriaError::ResourceExhausted { .. }));
        assert!(err.to_string().starts_with("Resource exhausted: point set"));
    }
}
