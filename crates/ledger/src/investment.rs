use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shareledger_core::{ListingId, UserId};
use shareledger_listings::SharesPurchased;

/// Ledger sequence number, assigned by the store on append (starts at 1).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvestmentId(pub u64);

impl core::fmt::Display for InvestmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A ledger entry ready to be appended (not yet assigned a sequence id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvestment {
    pub buyer_id: UserId,
    pub listing_id: ListingId,
    pub shares: i64,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<&SharesPurchased> for NewInvestment {
    fn from(e: &SharesPurchased) -> Self {
        Self {
            buyer_id: e.buyer_id,
            listing_id: e.listing_id,
            shares: e.shares,
            amount: e.amount,
            created_at: e.occurred_at,
        }
    }
}

/// One completed purchase.
///
/// `amount` preserves the historical price paid; it is not affected by later
/// listing edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investment {
    pub id: InvestmentId,
    pub buyer_id: UserId,
    pub listing_id: ListingId,
    pub shares: i64,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Investment {
    pub fn from_new(id: InvestmentId, new: NewInvestment) -> Self {
        Self {
            id,
            buyer_id: new.buyer_id,
            listing_id: new.listing_id,
            shares: new.shares,
            amount: new.amount,
            created_at: new.created_at,
        }
    }
}
