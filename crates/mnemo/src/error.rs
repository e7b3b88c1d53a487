//! Error types for the memory lifecycle core
//!
//! Two failure families matter here: persistence failures surface to the
//! caller of the mutating operation, collaborator failures never do (each
//! call site recovers with its documented fallback).

use thiserror::Error;

/// Result alias used throughout the crate
pub type MnemoResult<T> = Result<T, MnemoError>;

/// Errors produced by the memory core
#[derive(Error, Debug)]
pub enum MnemoError {
    /// The backing medium could not be read or written
    #[error("Storage error during '{operation}': {source}")]
    Storage {
        /// The operation that failed (e.g. "save_fact_sheet")
        operation: String,
        /// Underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A collaborator (classifier, extractor, vector index) failed or
    /// returned malformed output
    #[error("Collaborator '{collaborator}' failed: {message}")]
    Collaborator {
        /// Which collaborator failed
        collaborator: String,
        /// What went wrong
        message: String,
    },

    /// Input failed an internal invariant check
    #[error("Validation failed for '{field}': expected {expected}, got {actual}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// What was expected
        expected: String,
        /// What was provided
        actual: String,
    },
}

impl MnemoError {
    /// Create a storage error
    pub fn storage(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a collaborator error
    pub fn collaborator(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Whether this error came from a collaborator rather than the core
    pub fn is_collaborator(&self) -> bool {
        matches!(self, Self::Collaborator { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MnemoError::storage(
            "save_fact_sheet",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert!(err.to_string().contains("save_fact_sheet"));
        assert!(!err.is_collaborator());

        let err = MnemoError::collaborator("classifier", "timeout");
        assert!(err.is_collaborator());
        assert!(err.to_string().contains("classifier"));
    }
}
