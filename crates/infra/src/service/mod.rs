//! Share ledger service: the purchase transaction engine plus listing
//! management and valuation queries.
//!
//! ## Mutation Flow
//!
//! ```text
//! command
//!   ↓
//! 1. Lock the listing row (MarketStore::lock_listing)
//!   ↓
//! 2. Restore the aggregate from the locked row
//!   ↓
//! 3. Handle command (pure decision, produces events)
//!   ↓
//! 4. Apply events, commit row + ledger entry atomically (ListingTx::commit)
//! ```
//!
//! A domain rejection at step 3 drops the row lock without writing anything.
//! Retryable storage failures (lock timeouts, deadlocks, lost connections)
//! replay the whole flow under [`RetryPolicy`](crate::retry::RetryPolicy);
//! since nothing is written unless step 4 commits, a replay can never
//! double-apply a purchase.
//!
//! Reads are unlocked snapshots and may trail an in-flight purchase.

mod error;

pub use error::{ErrorKind, LedgerError};

use std::collections::BTreeSet;
use std::future::Future;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use shareledger_auth::{
    Principal, can_review_pending, can_view_holdings, can_view_listing, can_view_wallet, require,
};
use shareledger_core::{
    Aggregate, AggregateRoot, DomainError, Event, ExpectedVersion, ListingId, UserId,
};
use shareledger_ledger::{self as ledger, HoldingRow, Investment, NewInvestment, Wallet};
use shareledger_listings::{
    ApproveListing, CreateListing, DeleteListing, EditListing, Listing, ListingCommand,
    ListingEvent, ListingRecord, ListingStatus, ListingView, PurchaseShares,
};

use crate::config::LedgerConfig;
use crate::store::{ListingFilter, ListingWrite, MarketStore, StoreError};

/// Caller-supplied listing terms for create and edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingTerms {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub total_price: Decimal,
    pub total_shares: i64,
}

/// Result of a successful purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    /// Listing as committed, with recomputed derived values.
    pub listing: ListingView,
    /// `price_per_share * shares` at purchase time.
    pub amount: Decimal,
    pub investment: Investment,
}

/// Failure of a single attempt.
enum Failure {
    Domain(DomainError),
    Store(StoreError),
}

impl From<DomainError> for Failure {
    fn from(value: DomainError) -> Self {
        Failure::Domain(value)
    }
}

impl From<StoreError> for Failure {
    fn from(value: StoreError) -> Self {
        Failure::Store(value)
    }
}

/// Outcome of one committed listing transaction.
///
/// `view` is computed before the commit and is `None` once the listing was
/// deleted.
struct Applied {
    view: Option<ListingView>,
    investment: Option<Investment>,
}

impl Applied {
    fn into_view(self) -> Result<ListingView, LedgerError> {
        self.view
            .ok_or_else(|| LedgerError::InvalidState("listing was deleted".to_string()))
    }
}

/// Share-inventory ledger over a [`MarketStore`].
#[derive(Debug, Clone)]
pub struct ShareLedger<S> {
    store: S,
    config: LedgerConfig,
}

impl<S> ShareLedger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> ShareLedger<S>
where
    S: MarketStore,
{
    /// Create a listing in `pending` state owned by `actor`.
    #[instrument(skip(self, actor, terms), fields(actor_id = %actor.id, total_shares = terms.total_shares))]
    pub async fn create_listing(
        &self,
        actor: &Principal,
        terms: ListingTerms,
    ) -> Result<ListingView, LedgerError> {
        let listing_id = ListingId::new();
        let command = ListingCommand::Create(CreateListing {
            listing_id,
            seller: *actor,
            title: terms.title,
            description: terms.description,
            total_price: terms.total_price,
            total_shares: terms.total_shares,
            occurred_at: Utc::now(),
        });

        let mut listing = Listing::empty(listing_id);
        let (record, view) = decide(&mut listing, &command)
            .and_then(|_| listing.record())
            .and_then(|record| record.view().map(|view| (record, view)))
            .map_err(|e| rejected("create_listing", e))?;

        let record = &record;
        self.with_retry("create_listing", || self.store.insert_listing(record))
            .await?;

        info!(listing_id = %listing_id, "listing created");
        Ok(view)
    }

    /// Replace a listing's terms, reconciling available shares against the
    /// new share count. Non-admin edits send the listing back to review.
    #[instrument(skip(self, actor, terms), fields(listing_id = %listing_id, actor_id = %actor.id, total_shares = terms.total_shares))]
    pub async fn edit_listing(
        &self,
        actor: &Principal,
        listing_id: ListingId,
        terms: ListingTerms,
    ) -> Result<ListingView, LedgerError> {
        let command = ListingCommand::Edit(EditListing {
            listing_id,
            actor: *actor,
            title: terms.title,
            description: terms.description,
            total_price: terms.total_price,
            total_shares: terms.total_shares,
            occurred_at: Utc::now(),
        });

        let view = self
            .execute("edit_listing", listing_id, &command)
            .await?
            .into_view()?;
        info!(
            available_shares = view.available_shares,
            status = %view.status,
            "listing edited"
        );
        Ok(view)
    }

    /// Admin approval; re-approving an approved listing is accepted.
    #[instrument(skip(self, actor), fields(listing_id = %listing_id, actor_id = %actor.id))]
    pub async fn approve(
        &self,
        actor: &Principal,
        listing_id: ListingId,
    ) -> Result<ListingView, LedgerError> {
        let command = ListingCommand::Approve(ApproveListing {
            listing_id,
            actor: *actor,
            occurred_at: Utc::now(),
        });

        let view = self
            .execute("approve", listing_id, &command)
            .await?
            .into_view()?;
        info!("listing approved");
        Ok(view)
    }

    /// Purchase `shares` of a listing on behalf of `buyer`.
    ///
    /// Validation order: share count, listing existence, buyer role, approval
    /// policy, remaining supply. The amount is computed from the row as read
    /// under the lock, and the decrement and ledger append commit together.
    #[instrument(skip(self, buyer), fields(listing_id = %listing_id, buyer_id = %buyer.id))]
    pub async fn purchase(
        &self,
        buyer: &Principal,
        listing_id: ListingId,
        shares: i64,
    ) -> Result<PurchaseReceipt, LedgerError> {
        let command = ListingCommand::Purchase(PurchaseShares {
            listing_id,
            buyer: *buyer,
            shares,
            require_approved: !self.config.purchase.allow_unapproved_listings,
            occurred_at: Utc::now(),
        });

        let Applied { view, investment } = self.execute("purchase", listing_id, &command).await?;
        let (Some(listing), Some(investment)) = (view, investment) else {
            return Err(LedgerError::from_store(
                StoreError::Backend("purchase committed without a ledger entry".to_string()),
                1,
            ));
        };

        info!(
            investment_id = %investment.id,
            amount = %investment.amount,
            available_shares = listing.available_shares,
            "shares purchased"
        );
        Ok(PurchaseReceipt {
            amount: investment.amount,
            listing,
            investment,
        })
    }

    /// Delete a listing nobody has invested in.
    #[instrument(skip(self, actor), fields(listing_id = %listing_id, actor_id = %actor.id))]
    pub async fn delete_listing(
        &self,
        actor: &Principal,
        listing_id: ListingId,
    ) -> Result<(), LedgerError> {
        let command = ListingCommand::Delete(DeleteListing {
            listing_id,
            actor: *actor,
            occurred_at: Utc::now(),
        });

        self.execute("delete_listing", listing_id, &command).await?;
        info!("listing deleted");
        Ok(())
    }

    /// Buyer-facing catalogue: approved listings, newest first.
    pub async fn browse_approved(&self) -> Result<Vec<ListingView>, LedgerError> {
        let rows = self
            .with_retry("browse_approved", || {
                self.store
                    .list_listings(ListingFilter::Status(ListingStatus::Approved))
            })
            .await?;
        views(&rows)
    }

    /// Admin review queue: pending listings, newest first.
    pub async fn pending_listings(&self, actor: &Principal) -> Result<Vec<ListingView>, LedgerError> {
        require(actor, can_review_pending(actor), "review pending listings")?;
        let rows = self
            .with_retry("pending_listings", || {
                self.store
                    .list_listings(ListingFilter::Status(ListingStatus::Pending))
            })
            .await?;
        views(&rows)
    }

    /// The actor's own listings in every status, newest first.
    pub async fn seller_listings(&self, actor: &Principal) -> Result<Vec<ListingView>, LedgerError> {
        require(actor, can_view_holdings(actor), "view seller listings")?;
        let rows = self
            .with_retry("seller_listings", || {
                self.store.list_listings(ListingFilter::Seller(actor.id))
            })
            .await?;
        views(&rows)
    }

    /// Single listing. Pending listings are reported missing to anyone but
    /// their owner and admins.
    pub async fn get_listing(
        &self,
        viewer: Option<&Principal>,
        listing_id: ListingId,
    ) -> Result<ListingView, LedgerError> {
        let record = self
            .with_retry("get_listing", || self.store.load_listing(listing_id))
            .await?
            .ok_or(LedgerError::NotFound)?;

        if !can_view_listing(viewer, record.seller_id, record.status.is_approved()) {
            return Err(LedgerError::NotFound);
        }
        Ok(record.view()?)
    }

    /// Wallet of the calling buyer.
    pub async fn wallet(&self, actor: &Principal) -> Result<Wallet, LedgerError> {
        require(actor, can_view_wallet(actor), "view a wallet")?;
        self.wallet_for(actor.id).await
    }

    /// Wallet of `buyer_id`, valued at current listing prices.
    #[instrument(skip(self), fields(buyer_id = %buyer_id))]
    pub async fn wallet_for(&self, buyer_id: UserId) -> Result<Wallet, LedgerError> {
        let investments = self
            .with_retry("wallet_for", || self.store.investments_for_buyer(buyer_id))
            .await?;

        let ids: Vec<ListingId> = investments
            .iter()
            .map(|i| i.listing_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let listings = if ids.is_empty() {
            Vec::new()
        } else {
            let filter = &ListingFilter::Ids(ids);
            self.with_retry("wallet_for", || self.store.list_listings(filter.clone()))
                .await?
        };

        let wallet = ledger::wallet_for(buyer_id, &investments, &listings)?;
        debug!(positions = wallet.positions.len(), total_value = %wallet.total_value, "wallet computed");
        Ok(wallet)
    }

    /// Holdings report of the calling seller.
    pub async fn holdings(&self, actor: &Principal) -> Result<Vec<HoldingRow>, LedgerError> {
        require(actor, can_view_holdings(actor), "view holdings")?;
        self.holdings_for(actor.id).await
    }

    /// Per-(listing, buyer) holdings of every listing owned by `seller_id`.
    #[instrument(skip(self), fields(seller_id = %seller_id))]
    pub async fn holdings_for(&self, seller_id: UserId) -> Result<Vec<HoldingRow>, LedgerError> {
        let listings = self
            .with_retry("holdings_for", || {
                self.store.list_listings(ListingFilter::Seller(seller_id))
            })
            .await?;

        let ids: Vec<ListingId> = listings.iter().map(|l| l.id).collect();
        let ids = &ids;
        let investments = self
            .with_retry("holdings_for", || self.store.investments_for_listings(ids))
            .await?;

        Ok(ledger::holdings_for(seller_id, &listings, &investments)?)
    }

    /// Run a listing command under the row lock, retrying retryable storage
    /// failures.
    async fn execute(
        &self,
        op: &'static str,
        listing_id: ListingId,
        command: &ListingCommand,
    ) -> Result<Applied, LedgerError> {
        self.with_retry(op, || self.execute_once(listing_id, command))
            .await
    }

    async fn execute_once(
        &self,
        listing_id: ListingId,
        command: &ListingCommand,
    ) -> Result<Applied, Failure> {
        let Some(tx) = self.store.lock_listing(listing_id).await? else {
            // Input validation still takes precedence over existence.
            let mut probe = Listing::empty(listing_id);
            decide(&mut probe, command)?;
            return Err(DomainError::not_found().into());
        };

        let mut listing = Listing::restore(tx.listing().clone());
        let expected_version = ExpectedVersion::Exact(listing.version());
        let events = decide(&mut listing, command)?;

        if listing.is_deleted() {
            tx.delete().await?;
            return Ok(Applied {
                view: None,
                investment: None,
            });
        }

        let investment = events.iter().find_map(|e| match e {
            ListingEvent::SharesPurchased(p) => Some(NewInvestment::from(p)),
            _ => None,
        });
        // Everything fallible on the domain side runs before the commit.
        let record = listing.record()?;
        let view = record.view()?;
        let investment = tx
            .commit(ListingWrite {
                record,
                expected_version,
                investment,
            })
            .await?;

        Ok(Applied {
            view: Some(view),
            investment,
        })
    }

    /// Replay `attempt` while it fails with a retryable storage error and the
    /// retry policy allows another try.
    async fn with_retry<T, E, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Failure>,
    {
        let policy = &self.config.retry;
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match attempt().await.map_err(Into::<Failure>::into) {
                Ok(value) => return Ok(value),
                Err(Failure::Domain(e)) => return Err(rejected(op, e)),
                Err(Failure::Store(e)) if e.is_retryable() && policy.should_retry(attempts) => {
                    let delay = policy.delay_for_attempt(attempts);
                    warn!(op, attempts, delay_ms = delay.as_millis() as u64, error = %e, "retrying after storage conflict");
                    tokio::time::sleep(delay).await;
                }
                Err(Failure::Store(e)) => {
                    let err = LedgerError::from_store(e, attempts);
                    if err.kind() == ErrorKind::TransactionFailed {
                        warn!(op, attempts, retryable = err.is_retryable(), error = %err, "storage transaction failed");
                    } else {
                        debug!(op, error = %err, "operation rejected");
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Handle `command` against `listing` and apply the resulting events.
fn decide(listing: &mut Listing, command: &ListingCommand) -> Result<Vec<ListingEvent>, DomainError> {
    let events = listing.handle(command)?;
    for event in &events {
        debug!(event = event.event_type(), at = %event.occurred_at(), "applying event");
        listing.apply(event);
    }
    Ok(events)
}

fn rejected(op: &'static str, err: DomainError) -> LedgerError {
    let err = LedgerError::from(err);
    debug!(op, kind = ?err.kind(), error = %err, "operation rejected");
    err
}

fn views(rows: &[ListingRecord]) -> Result<Vec<ListingView>, LedgerError> {
    Ok(rows
        .iter()
        .map(ListingRecord::view)
        .collect::<Result<Vec<_>, _>>()?)
}
