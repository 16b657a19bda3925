use thiserror::Error;

use shareledger_auth::AuthzError;
use shareledger_core::DomainError;

use crate::store::StoreError;

/// Coarse classification of a [`LedgerError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Forbidden,
    InsufficientSupply,
    InvalidState,
    Conflict,
    TransactionFailed,
}

/// Error surfaced by [`ShareLedger`](crate::service::ShareLedger) operations.
///
/// Only `TransactionFailed` is retryable, and only when the failed transaction
/// is known to have rolled back; every other kind repeats the same rejection
/// when replayed.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("listing not found")]
    NotFound,

    #[error("{0}")]
    Forbidden(String),

    #[error("insufficient supply: requested {requested} shares, {available} available")]
    InsufficientSupply { requested: i64, available: i64 },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transaction failed after {attempts} attempt(s): {source}")]
    TransactionFailed {
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LedgerError::NotFound => ErrorKind::NotFound,
            LedgerError::Forbidden(_) => ErrorKind::Forbidden,
            LedgerError::InsufficientSupply { .. } => ErrorKind::InsufficientSupply,
            LedgerError::InvalidState(_) => ErrorKind::InvalidState,
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::TransactionFailed { .. } => ErrorKind::TransactionFailed,
        }
    }

    /// Whether the caller may safely replay the whole call.
    ///
    /// A transaction whose commit outcome is unknown is not: the first
    /// attempt may already be durable.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::TransactionFailed { source, .. } => source.is_rolled_back(),
            _ => false,
        }
    }

    /// HTTP-equivalent status for the calling layer.
    ///
    /// Successful creates and purchases map to 201, everything else to 200.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidArgument | ErrorKind::InsufficientSupply => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidState | ErrorKind::Conflict => 409,
            ErrorKind::TransactionFailed => 503,
        }
    }

    /// Final error for a storage failure after `attempts` tries.
    pub(crate) fn from_store(err: StoreError, attempts: u32) -> Self {
        match err {
            StoreError::Referenced(n) if n > 0 => {
                LedgerError::Conflict(format!("listing has {n} ledger entries and cannot be deleted"))
            }
            StoreError::Referenced(_) => {
                LedgerError::Conflict("listing has ledger entries and cannot be deleted".to_string())
            }
            StoreError::Duplicate(msg) => LedgerError::Conflict(msg),
            source => LedgerError::TransactionFailed { attempts, source },
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                LedgerError::InvalidArgument(msg)
            }
            DomainError::NotFound => LedgerError::NotFound,
            DomainError::Forbidden(msg) => LedgerError::Forbidden(msg),
            DomainError::InsufficientSupply {
                requested,
                available,
            } => LedgerError::InsufficientSupply {
                requested,
                available,
            },
            DomainError::InvariantViolation(msg) => LedgerError::InvalidState(msg),
            DomainError::Conflict(msg) => LedgerError::Conflict(msg),
        }
    }
}

impl From<AuthzError> for LedgerError {
    fn from(value: AuthzError) -> Self {
        LedgerError::Forbidden(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shareledger_auth::Role;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(LedgerError::InvalidArgument("x".into()).status_code(), 400);
        assert_eq!(LedgerError::NotFound.status_code(), 404);
        assert_eq!(LedgerError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(
            LedgerError::InsufficientSupply { requested: 2, available: 1 }.status_code(),
            400
        );
        assert_eq!(LedgerError::InvalidState("x".into()).status_code(), 409);
        assert_eq!(LedgerError::Conflict("x".into()).status_code(), 409);

        let failed = LedgerError::from_store(StoreError::Conflict("lock timeout".into()), 5);
        assert_eq!(failed.status_code(), 503);
        assert!(failed.is_retryable());
        assert_eq!(failed.to_string(), "transaction failed after 5 attempt(s): write conflict: lock timeout");
    }

    #[test]
    fn unknown_commit_outcome_is_not_safe_to_replay() {
        let err = LedgerError::from_store(StoreError::CommitUnknown("socket closed".into()), 1);
        assert_eq!(err.kind(), ErrorKind::TransactionFailed);
        assert_eq!(err.status_code(), 503);
        assert!(!err.is_retryable());
    }

    #[test]
    fn referenced_listing_is_a_conflict() {
        let err = LedgerError::from_store(StoreError::Referenced(3), 1);
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!err.is_retryable());
    }

    #[test]
    fn domain_errors_map_onto_taxonomy() {
        assert_eq!(
            LedgerError::from(DomainError::validation("bad")).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            LedgerError::from(DomainError::invariant("under-allocated")).kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            LedgerError::from(DomainError::insufficient_supply(5, 1)).kind(),
            ErrorKind::InsufficientSupply
        );

        let authz = AuthzError::Forbidden {
            role: Role::Buyer,
            action: "approve listings",
        };
        assert_eq!(LedgerError::from(authz).kind(), ErrorKind::Forbidden);
    }
}
