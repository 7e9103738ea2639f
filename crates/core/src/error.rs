//! Framework error model.

use thiserror::Error;

/// Result type used across the framework's foundation layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic validation failure on a framework primitive.
///
/// Infrastructure concerns (storage, locking, transactions) have their own
/// error types; this one stays focused on malformed values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
