//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Identity was empty after trimming
    #[error("Identity must not be empty")]
    EmptyIdentity,

    /// Identity exceeded the length limit
    #[error("Identity too long: {len} bytes (max: {max})")]
    IdentityTooLong { len: usize, max: usize },

    /// Identity contained a control character
    #[error("Identity contains control characters: {0:?}")]
    InvalidIdentity(String),

    /// Unknown routing mode name
    #[error("Unknown routing mode: {0} (expected \"direct\" or \"broadcast\")")]
    UnknownMode(String),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
