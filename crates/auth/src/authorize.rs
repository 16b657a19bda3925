use thiserror::Error;

use shareledger_core::{DomainError, UserId};

use crate::{Principal, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: {role} may not {action}")]
    Forbidden { role: Role, action: &'static str },
}

impl From<AuthzError> for DomainError {
    fn from(value: AuthzError) -> Self {
        DomainError::forbidden(value.to_string())
    }
}

/// Sellers list properties; admins may list on anyone's behalf.
pub fn can_create_listing(principal: &Principal) -> bool {
    matches!(principal.role, Role::Seller | Role::Admin)
}

/// Only the owning seller or an admin may edit or delete a listing.
pub fn can_edit_listing(principal: &Principal, owner: UserId) -> bool {
    principal.is_admin() || (principal.role == Role::Seller && principal.id == owner)
}

pub fn can_approve(principal: &Principal) -> bool {
    principal.is_admin()
}

pub fn can_review_pending(principal: &Principal) -> bool {
    principal.is_admin()
}

pub fn can_purchase(principal: &Principal) -> bool {
    matches!(principal.role, Role::Buyer | Role::Admin)
}

pub fn can_view_wallet(principal: &Principal) -> bool {
    matches!(principal.role, Role::Buyer | Role::Admin)
}

pub fn can_view_holdings(principal: &Principal) -> bool {
    matches!(principal.role, Role::Seller | Role::Admin)
}

/// Pending listings are visible to their owner and to admins only.
pub fn can_view_listing(viewer: Option<&Principal>, owner: UserId, approved: bool) -> bool {
    approved || viewer.is_some_and(|p| can_edit_listing(p, owner))
}

/// Turn a capability predicate result into an authorization decision.
///
/// - No IO
/// - No panics
pub fn require(principal: &Principal, allowed: bool, action: &'static str) -> Result<(), AuthzError> {
    if allowed {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            role: principal.role,
            action,
        })
    }
}
