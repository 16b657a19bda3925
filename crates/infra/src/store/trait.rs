use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use shareledger_core::{ExpectedVersion, ListingId, UserId};
use shareledger_ledger::{Investment, NewInvestment};
use shareledger_listings::{ListingRecord, ListingStatus};

/// Storage operation error.
///
/// These are **infrastructure errors** (locking, connectivity, corrupt rows) as
/// opposed to domain errors (validation, supply rules).
///
/// ## Error Categories
///
/// - **Conflict**: lock timeout, deadlock, serialization failure or a stale
///   row version. Retryable: the whole operation can be replayed.
/// - **Unavailable**: the backend could not be reached. Retryable.
/// - **Referenced**: the listing still has ledger entries and cannot be
///   deleted. Terminal.
/// - **CommitUnknown**: the commit was sent but its acknowledgement was lost,
///   so the write may or may not be durable. Terminal: replaying could apply
///   the operation twice.
/// - **Duplicate** / **Backend** / **Corrupt**: terminal storage faults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("listing is referenced by {0} ledger entries")]
    Referenced(u64),

    #[error("commit outcome unknown: {0}")]
    CommitUnknown(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether replaying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }

    /// Whether the failed operation certainly left no trace.
    pub fn is_rolled_back(&self) -> bool {
        !matches!(self, StoreError::CommitUnknown(_))
    }
}

/// Which listing rows a snapshot read returns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ListingFilter {
    #[default]
    All,
    Status(ListingStatus),
    Seller(UserId),
    Ids(Vec<ListingId>),
}

impl ListingFilter {
    pub fn matches(&self, record: &ListingRecord) -> bool {
        match self {
            ListingFilter::All => true,
            ListingFilter::Status(status) => record.status == *status,
            ListingFilter::Seller(seller_id) => record.seller_id == *seller_id,
            ListingFilter::Ids(ids) => ids.contains(&record.id),
        }
    }
}

/// New state of a locked listing row, plus the ledger entry to append with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingWrite {
    pub record: ListingRecord,
    /// Version of the row the decision was computed from.
    pub expected_version: ExpectedVersion,
    pub investment: Option<NewInvestment>,
}

/// An exclusively locked listing row.
///
/// Holding a `ListingTx` is the only way to mutate a listing. The lock is held
/// until the transaction is committed, deleted or dropped; dropping it rolls
/// back without any visible effect.
#[async_trait]
pub trait ListingTx: Send {
    /// The row as read under the lock.
    fn listing(&self) -> &ListingRecord;

    /// Atomically write the new row state and append the ledger entry (if any).
    ///
    /// Either both effects become visible or neither does.
    async fn commit(self: Box<Self>, write: ListingWrite) -> Result<Option<Investment>, StoreError>;

    /// Atomically delete the row unless the ledger references it
    /// (`StoreError::Referenced`).
    async fn delete(self: Box<Self>) -> Result<(), StoreError>;
}

/// Listing rows plus the append-only investment ledger.
///
/// ## Consistency
///
/// - `lock_listing` is the sole serialization point: concurrent purchases of
///   the same listing queue on its row lock.
/// - Snapshot reads never take row locks and may trail an in-flight purchase.
/// - Ledger entries are only ever appended through [`ListingTx::commit`];
///   there is no API to update or remove them.
#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn insert_listing(&self, record: &ListingRecord) -> Result<(), StoreError>;

    /// Unlocked snapshot read.
    async fn load_listing(&self, id: ListingId) -> Result<Option<ListingRecord>, StoreError>;

    /// Unlocked snapshot read, newest listing first.
    async fn list_listings(&self, filter: ListingFilter) -> Result<Vec<ListingRecord>, StoreError>;

    /// Acquire the exclusive lock on a listing row; `None` if it does not exist.
    async fn lock_listing(&self, id: ListingId) -> Result<Option<Box<dyn ListingTx>>, StoreError>;

    /// Ledger entries of one buyer, oldest first.
    async fn investments_for_buyer(&self, buyer_id: UserId) -> Result<Vec<Investment>, StoreError>;

    /// Ledger entries referencing any of `listing_ids`, oldest first.
    async fn investments_for_listings(
        &self,
        listing_ids: &[ListingId],
    ) -> Result<Vec<Investment>, StoreError>;
}

#[async_trait]
impl<S> MarketStore for Arc<S>
where
    S: MarketStore + ?Sized,
{
    async fn insert_listing(&self, record: &ListingRecord) -> Result<(), StoreError> {
        (**self).insert_listing(record).await
    }

    async fn load_listing(&self, id: ListingId) -> Result<Option<ListingRecord>, StoreError> {
        (**self).load_listing(id).await
    }

    async fn list_listings(&self, filter: ListingFilter) -> Result<Vec<ListingRecord>, StoreError> {
        (**self).list_listings(filter).await
    }

    async fn lock_listing(&self, id: ListingId) -> Result<Option<Box<dyn ListingTx>>, StoreError> {
        (**self).lock_listing(id).await
    }

    async fn investments_for_buyer(&self, buyer_id: UserId) -> Result<Vec<Investment>, StoreError> {
        (**self).investments_for_buyer(buyer_id).await
    }

    async fn investments_for_listings(
        &self,
        listing_ids: &[ListingId],
    ) -> Result<Vec<Investment>, StoreError> {
        (**self).investments_for_listings(listing_ids).await
    }
}
