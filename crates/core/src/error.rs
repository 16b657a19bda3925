//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, supply rules). Storage faults belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (malformed or out-of-range input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The referenced listing does not exist.
    #[error("not found")]
    NotFound,

    /// The actor lacks the role or ownership required for the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Not enough shares remain to satisfy a purchase.
    #[error("insufficient supply: requested {requested} shares, {available} available")]
    InsufficientSupply { requested: i64, available: i64 },

    /// The operation would violate the share-accounting invariant.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The operation conflicts with existing state (e.g. immutable ledger entries).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn insufficient_supply(requested: i64, available: i64) -> Self {
        Self::InsufficientSupply {
            requested,
            available,
        }
    }
}
