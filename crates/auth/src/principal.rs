use serde::{Deserialize, Serialize};

use shareledger_core::UserId;

use crate::Role;

/// An authenticated actor: identity plus its single platform role.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn buyer(id: UserId) -> Self {
        Self::new(id, Role::Buyer)
    }

    pub fn seller(id: UserId) -> Self {
        Self::new(id, Role::Seller)
    }

    pub fn admin(id: UserId) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}
