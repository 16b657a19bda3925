//! Valuation views.
//!
//! Both views are recomputed on every call from ledger entries plus the
//! current listing rows:
//! - **Buyer wallet**: shares held per listing, valued at the listing's
//!   *current* price per share.
//! - **Seller holdings**: one row per (listing, buyer) pair with summed shares
//!   and historical amount; listings without investors still appear.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shareledger_core::{DomainError, DomainResult, ListingId, UserId};
use shareledger_listings::{ListingRecord, ListingStatus, price_per_share, purchase_amount};

use crate::Investment;

/// A buyer's position in one listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletPosition {
    pub listing_id: ListingId,
    pub title: String,
    /// Sum of shares across all of the buyer's purchases of this listing.
    pub shares: i64,
    /// Current `total_price / total_shares` of the listing.
    pub price_per_share: Decimal,
    /// `price_per_share * shares` at the current price.
    pub current_value: Decimal,
    /// Sum of historical purchase amounts.
    pub invested_amount: Decimal,
    pub last_purchased_at: DateTime<Utc>,
}

/// Buyer wallet: positions plus their total current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub buyer_id: UserId,
    /// Most recently purchased first.
    pub positions: Vec<WalletPosition>,
    pub total_value: Decimal,
    pub total_invested: Decimal,
}

/// One (listing, buyer) row of a seller's holdings report.
///
/// `buyer_id` is `None` (with zero shares and amount) for listings nobody has
/// invested in yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingRow {
    pub listing_id: ListingId,
    pub title: String,
    pub status: ListingStatus,
    pub buyer_id: Option<UserId>,
    pub shares: i64,
    pub amount: Decimal,
}

fn overflow() -> DomainError {
    DomainError::validation("valuation exceeds supported decimal range")
}

#[derive(Default)]
struct Position {
    shares: i64,
    invested: Decimal,
    last_purchased_at: Option<DateTime<Utc>>,
}

/// Compute the wallet of `buyer_id`.
///
/// Entries of other buyers are ignored. Entries whose listing is absent from
/// `listings` are skipped; the ledger restricts listing deletion, so this only
/// happens when the caller passes a partial listing snapshot.
pub fn wallet_for(
    buyer_id: UserId,
    investments: &[Investment],
    listings: &[ListingRecord],
) -> DomainResult<Wallet> {
    let mut grouped: HashMap<ListingId, Position> = HashMap::new();
    for inv in investments.iter().filter(|i| i.buyer_id == buyer_id) {
        let position = grouped.entry(inv.listing_id).or_default();
        position.shares += inv.shares;
        position.invested = position
            .invested
            .checked_add(inv.amount)
            .ok_or_else(overflow)?;
        position.last_purchased_at = position.last_purchased_at.max(Some(inv.created_at));
    }

    let by_id: HashMap<ListingId, &ListingRecord> = listings.iter().map(|l| (l.id, l)).collect();

    let mut positions = Vec::with_capacity(grouped.len());
    let mut total_value = Decimal::ZERO;
    let mut total_invested = Decimal::ZERO;
    for (listing_id, position) in grouped {
        let Some(listing) = by_id.get(&listing_id) else {
            continue;
        };
        let (Some(last_purchased_at), shares) = (position.last_purchased_at, position.shares) else {
            continue;
        };

        let current_value = purchase_amount(listing.total_price, listing.total_shares, shares)?;
        total_value = total_value.checked_add(current_value).ok_or_else(overflow)?;
        total_invested = total_invested
            .checked_add(position.invested)
            .ok_or_else(overflow)?;

        positions.push(WalletPosition {
            listing_id,
            title: listing.title.clone(),
            shares,
            price_per_share: price_per_share(listing.total_price, listing.total_shares)?,
            current_value,
            invested_amount: position.invested,
            last_purchased_at,
        });
    }

    positions.sort_by(|a, b| {
        b.last_purchased_at
            .cmp(&a.last_purchased_at)
            .then_with(|| a.listing_id.cmp(&b.listing_id))
    });

    Ok(Wallet {
        buyer_id,
        positions,
        total_value,
        total_invested,
    })
}

/// Compute the holdings report of `seller_id`.
///
/// Listings are ordered newest first; buyers within a listing by id.
pub fn holdings_for(
    seller_id: UserId,
    listings: &[ListingRecord],
    investments: &[Investment],
) -> DomainResult<Vec<HoldingRow>> {
    let mut owned: Vec<&ListingRecord> = listings.iter().filter(|l| l.seller_id == seller_id).collect();
    owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut per_listing: HashMap<ListingId, BTreeMap<UserId, (i64, Decimal)>> = HashMap::new();
    for inv in investments {
        let buyers = per_listing.entry(inv.listing_id).or_default();
        let (shares, amount) = buyers.entry(inv.buyer_id).or_insert((0, Decimal::ZERO));
        *shares += inv.shares;
        *amount = amount.checked_add(inv.amount).ok_or_else(overflow)?;
    }

    let mut rows = Vec::new();
    for listing in owned {
        match per_listing.get(&listing.id) {
            Some(buyers) if !buyers.is_empty() => {
                for (buyer_id, (shares, amount)) in buyers {
                    rows.push(HoldingRow {
                        listing_id: listing.id,
                        title: listing.title.clone(),
                        status: listing.status,
                        buyer_id: Some(*buyer_id),
                        shares: *shares,
                        amount: *amount,
                    });
                }
            }
            _ => rows.push(HoldingRow {
                listing_id: listing.id,
                title: listing.title.clone(),
                status: listing.status,
                buyer_id: None,
                shares: 0,
                amount: Decimal::ZERO,
            }),
        }
    }
    Ok(rows)
}
