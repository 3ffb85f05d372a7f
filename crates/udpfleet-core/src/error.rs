//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors raised when validating input at the control-plane boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },

    /// Parse error for incoming data
    #[error("Failed to parse {field}: {reason}")]
    ParseError { field: String, reason: String },
}

impl DomainError {
    pub(crate) fn invalid(field: &str, value: impl Into<String>, expected: &str) -> Self {
        Self::InvalidFieldValue {
            field: field.to_string(),
            value: value.into(),
            expected: expected.to_string(),
        }
    }

    pub(crate) fn parse(field: &str, reason: impl Into<String>) -> Self {
        Self::ParseError {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
