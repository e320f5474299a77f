use creditscribe_core::{DomainError, PaymentId};
use creditscribe_payments::SignatureError;

use crate::providers::ProviderError;

/// Persistence failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Compare-and-set on `pending` lost: someone resolved the payment first.
    #[error("payment {0} already resolved")]
    AlreadyResolved(PaymentId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn not_found(what: impl core::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}

/// Error taxonomy surfaced by services to their callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Malformed input, unknown package, or a rejected value.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing, or not owned by the caller.
    #[error("{0} not found")]
    NotFound(String),

    /// Wrong state for the requested transition.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("authenticity check failed: {0}")]
    Authenticity(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl ServiceError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Provider(_) | ServiceError::Persistence(_))
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => ServiceError::Validation(msg),
            DomainError::NotFound(what) => ServiceError::NotFound(what.to_string()),
            DomainError::Conflict(msg) => ServiceError::Conflict(msg),
            DomainError::InvariantViolation(msg) => ServiceError::Persistence(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ServiceError::NotFound(what),
            StoreError::AlreadyExists(what) => ServiceError::Conflict(format!("{what} already exists")),
            StoreError::AlreadyResolved(id) => ServiceError::Conflict(format!("payment {id} already resolved")),
            StoreError::Domain(err) => err.into(),
            StoreError::Storage(msg) => ServiceError::Persistence(msg),
        }
    }
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        ServiceError::Provider(err.to_string())
    }
}

impl From<SignatureError> for ServiceError {
    fn from(err: SignatureError) -> Self {
        ServiceError::Authenticity(err.to_string())
    }
}
