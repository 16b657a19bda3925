//! Approval state machine.
//!
//! ```text
//!   create / owner edit           admin approve
//!  ───────────────────▶ pending ──────────────▶ approved
//!                          ▲                       │
//!                          └──── owner edit ───────┘
//! ```
//!
//! There is no terminal state: a listing cycles between the two as long as it
//! exists. Admin edits keep whatever state the listing is in.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use shareledger_auth::Role;
use shareledger_core::DomainError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    #[default]
    Pending,
    Approved,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Pending => "pending",
            ListingStatus::Approved => "approved",
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ListingStatus::Approved)
    }

    /// Status after an edit performed by an actor with `editor` role.
    pub fn after_edit(self, editor: Role) -> ListingStatus {
        if editor.is_admin() {
            self
        } else {
            ListingStatus::Pending
        }
    }

    /// Approval is accepted from either state and always lands on `Approved`.
    pub fn after_approve(self) -> ListingStatus {
        ListingStatus::Approved
    }
}

impl core::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ListingStatus::Pending),
            "approved" => Ok(ListingStatus::Approved),
            other => Err(DomainError::validation(format!(
                "unknown listing status '{other}'"
            ))),
        }
    }
}
