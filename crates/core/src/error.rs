//! Domain error model.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic business failures. Storage and provider failures have their
/// own types in the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Rejected input: empty file reference, non-positive amount, unknown status.
    #[error("validation failed: {0}")]
    Validation(String),

    /// State that must never exist, e.g. a ledger entry breaking the balance chain.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Missing, or owned by another account. Both read the same to callers.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The entity is not in a state that allows the requested transition.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        assert_eq!(DomainError::NotFound("payment").to_string(), "payment not found");
        assert_eq!(
            DomainError::conflict("transcription already completed").to_string(),
            "conflict: transcription already completed"
        );
    }
}
