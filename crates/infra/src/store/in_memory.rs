use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

use shareledger_core::{ListingId, UserId};
use shareledger_ledger::{Investment, InvestmentId};
use shareledger_listings::ListingRecord;

use super::r#trait::{ListingFilter, ListingTx, ListingWrite, MarketStore, StoreError};

#[derive(Debug, Default)]
struct State {
    listings: HashMap<ListingId, ListingRecord>,
    ledger: Vec<Investment>,
    ledger_refs: HashMap<ListingId, u64>,
}

#[derive(Debug, Default)]
struct Inner {
    state: RwLock<State>,
    /// One async mutex per listing row.
    row_locks: Mutex<HashMap<ListingId, Arc<RowMutex<()>>>>,
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// In-memory listing rows + append-only ledger.
///
/// Intended for tests/dev. Row writes and ledger appends happen under a single
/// state lock, so a committed purchase is observed either completely or not at
/// all.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMarketStore {
    inner: Arc<Inner>,
}

impl InMemoryMarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger entries (all listings).
    pub fn ledger_len(&self) -> Result<usize, StoreError> {
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        Ok(state.ledger.len())
    }

    /// Number of per-row lock entries currently held in the lock table.
    pub fn lock_table_len(&self) -> Result<usize, StoreError> {
        let locks = self.inner.row_locks.lock().map_err(|_| poisoned())?;
        Ok(locks.len())
    }

    fn row_lock(&self, id: ListingId) -> Result<Arc<RowMutex<()>>, StoreError> {
        let mut locks = self.inner.row_locks.lock().map_err(|_| poisoned())?;
        Ok(locks.entry(id).or_default().clone())
    }

    /// Drop the lock entry of a missing row unless another task still holds
    /// or awaits it. The table entry plus `row` account for two references.
    fn release_unused_lock(&self, id: ListingId, row: &Arc<RowMutex<()>>) -> Result<(), StoreError> {
        let mut locks = self.inner.row_locks.lock().map_err(|_| poisoned())?;
        let unused = locks
            .get(&id)
            .is_some_and(|entry| Arc::ptr_eq(entry, row) && Arc::strong_count(row) == 2);
        if unused {
            locks.remove(&id);
        }
        Ok(())
    }
}

#[async_trait]
impl MarketStore for InMemoryMarketStore {
    async fn insert_listing(&self, record: &ListingRecord) -> Result<(), StoreError> {
        let mut state = self.inner.state.write().map_err(|_| poisoned())?;
        if state.listings.contains_key(&record.id) {
            return Err(StoreError::Duplicate(format!("listing {}", record.id)));
        }
        state.listings.insert(record.id, record.clone());
        Ok(())
    }

    async fn load_listing(&self, id: ListingId) -> Result<Option<ListingRecord>, StoreError> {
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        Ok(state.listings.get(&id).cloned())
    }

    async fn list_listings(&self, filter: ListingFilter) -> Result<Vec<ListingRecord>, StoreError> {
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        let mut rows: Vec<ListingRecord> = state
            .listings
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn lock_listing(&self, id: ListingId) -> Result<Option<Box<dyn ListingTx>>, StoreError> {
        let row = self.row_lock(id)?;
        let guard = row.clone().lock_owned().await;

        let listing = {
            let state = self.inner.state.read().map_err(|_| poisoned())?;
            state.listings.get(&id).cloned()
        };

        let Some(listing) = listing else {
            drop(guard);
            self.release_unused_lock(id, &row)?;
            return Ok(None);
        };

        Ok(Some(Box::new(InMemoryListingTx {
            inner: self.inner.clone(),
            listing,
            _guard: guard,
        }) as Box<dyn ListingTx>))
    }

    async fn investments_for_buyer(&self, buyer_id: UserId) -> Result<Vec<Investment>, StoreError> {
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        Ok(state
            .ledger
            .iter()
            .filter(|i| i.buyer_id == buyer_id)
            .cloned()
            .collect())
    }

    async fn investments_for_listings(
        &self,
        listing_ids: &[ListingId],
    ) -> Result<Vec<Investment>, StoreError> {
        let state = self.inner.state.read().map_err(|_| poisoned())?;
        Ok(state
            .ledger
            .iter()
            .filter(|i| listing_ids.contains(&i.listing_id))
            .cloned()
            .collect())
    }
}

struct InMemoryListingTx {
    inner: Arc<Inner>,
    listing: ListingRecord,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl ListingTx for InMemoryListingTx {
    fn listing(&self) -> &ListingRecord {
        &self.listing
    }

    async fn commit(self: Box<Self>, write: ListingWrite) -> Result<Option<Investment>, StoreError> {
        if write.record.id != self.listing.id {
            return Err(StoreError::Backend(format!(
                "write for listing {} issued on lock of {}",
                write.record.id, self.listing.id
            )));
        }

        let mut state = self.inner.state.write().map_err(|_| poisoned())?;
        let current = state
            .listings
            .get(&write.record.id)
            .map(|r| r.version)
            .ok_or_else(|| StoreError::Conflict(format!("listing {} vanished", write.record.id)))?;
        if !write.expected_version.matches(current) {
            return Err(StoreError::Conflict(format!(
                "expected {:?}, found version {current}",
                write.expected_version
            )));
        }

        let investment = write.investment.map(|new| {
            let id = InvestmentId(state.ledger.len() as u64 + 1);
            Investment::from_new(id, new)
        });

        state.listings.insert(write.record.id, write.record);
        if let Some(inv) = &investment {
            *state.ledger_refs.entry(inv.listing_id).or_default() += 1;
            state.ledger.push(inv.clone());
        }

        Ok(investment)
    }

    async fn delete(self: Box<Self>) -> Result<(), StoreError> {
        let id = self.listing.id;
        {
            let mut state = self.inner.state.write().map_err(|_| poisoned())?;
            let refs = state.ledger_refs.get(&id).copied().unwrap_or(0);
            if refs > 0 {
                return Err(StoreError::Referenced(refs));
            }
            state.listings.remove(&id);
        }

        let mut locks = self.inner.row_locks.lock().map_err(|_| poisoned())?;
        locks.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use shareledger_core::ExpectedVersion;
    use shareledger_ledger::NewInvestment;
    use shareledger_listings::ListingStatus;

    fn record(created_offset_secs: i64) -> ListingRecord {
        let at = Utc::now() + chrono::Duration::seconds(created_offset_secs);
        ListingRecord {
            id: ListingId::new(),
            seller_id: UserId::new(),
            title: "Loft".to_string(),
            description: String::new(),
            total_price: Decimal::from(100),
            total_shares: 10,
            available_shares: 10,
            status: ListingStatus::Pending,
            created_at: at,
            updated_at: at,
            version: 1,
        }
    }

    fn purchase_write(r: &ListingRecord, shares: i64, expected: ExpectedVersion) -> ListingWrite {
        let mut next = r.clone();
        next.available_shares -= shares;
        next.version += 1;
        ListingWrite {
            record: next,
            expected_version: expected,
            investment: Some(NewInvestment {
                buyer_id: UserId::new(),
                listing_id: r.id,
                shares,
                amount: Decimal::from(10 * shares),
                created_at: Utc::now(),
            }),
        }
    }

    #[tokio::test]
    async fn commit_writes_row_and_appends_ledger_together() {
        let store = InMemoryMarketStore::new();
        let r = record(0);
        store.insert_listing(&r).await.unwrap();

        let tx = store.lock_listing(r.id).await.unwrap().unwrap();
        let inv = tx
            .commit(purchase_write(&r, 3, ExpectedVersion::Exact(1)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(inv.id, InvestmentId(1));
        assert_eq!(store.load_listing(r.id).await.unwrap().unwrap().available_shares, 7);
        assert_eq!(store.investments_for_listings(&[r.id]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict_and_writes_nothing() {
        let store = InMemoryMarketStore::new();
        let r = record(0);
        store.insert_listing(&r).await.unwrap();

        let tx = store.lock_listing(r.id).await.unwrap().unwrap();
        let err = tx
            .commit(purchase_write(&r, 3, ExpectedVersion::Exact(7)))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(err.is_retryable());
        assert_eq!(store.load_listing(r.id).await.unwrap().unwrap(), r);
        assert_eq!(store.ledger_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn dropping_tx_releases_lock_without_effect() {
        let store = InMemoryMarketStore::new();
        let r = record(0);
        store.insert_listing(&r).await.unwrap();

        let tx = store.lock_listing(r.id).await.unwrap().unwrap();
        drop(tx);

        let again = tokio::time::timeout(std::time::Duration::from_secs(1), store.lock_listing(r.id))
            .await
            .expect("row lock released on drop")
            .unwrap();
        assert!(again.is_some());
        assert_eq!(store.load_listing(r.id).await.unwrap().unwrap(), r);
    }

    #[tokio::test]
    async fn locking_missing_rows_leaves_no_lock_entries() {
        let store = InMemoryMarketStore::new();
        for _ in 0..1_000 {
            assert!(store.lock_listing(ListingId::new()).await.unwrap().is_none());
        }
        assert_eq!(store.lock_table_len().unwrap(), 0);

        let r = record(0);
        store.insert_listing(&r).await.unwrap();
        let tx = store.lock_listing(r.id).await.unwrap().unwrap();
        assert_eq!(store.lock_table_len().unwrap(), 1);
        tx.delete().await.unwrap();
        assert_eq!(store.lock_table_len().unwrap(), 0);
        assert!(store.lock_listing(r.id).await.unwrap().is_none());
        assert_eq!(store.lock_table_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_refused_while_ledger_references_listing() {
        let store = InMemoryMarketStore::new();
        let sold = record(0);
        let unsold = record(1);
        store.insert_listing(&sold).await.unwrap();
        store.insert_listing(&unsold).await.unwrap();

        let tx = store.lock_listing(sold.id).await.unwrap().unwrap();
        tx.commit(purchase_write(&sold, 1, ExpectedVersion::Exact(1)))
            .await
            .unwrap();

        let tx = store.lock_listing(sold.id).await.unwrap().unwrap();
        assert!(matches!(tx.delete().await, Err(StoreError::Referenced(1))));
        assert!(store.load_listing(sold.id).await.unwrap().is_some());

        let tx = store.lock_listing(unsold.id).await.unwrap().unwrap();
        tx.delete().await.unwrap();
        assert!(store.load_listing(unsold.id).await.unwrap().is_none());
        assert!(store.lock_listing(unsold.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_filtered() {
        let store = InMemoryMarketStore::new();
        let old = record(-10);
        let mut new = record(0);
        new.status = ListingStatus::Approved;
        store.insert_listing(&old).await.unwrap();
        store.insert_listing(&new).await.unwrap();

        let all = store.list_listings(ListingFilter::All).await.unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![new.id, old.id]);

        let approved = store
            .list_listings(ListingFilter::Status(ListingStatus::Approved))
            .await
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id, new.id);

        assert!(matches!(
            store.insert_listing(&old).await,
            Err(StoreError::Duplicate(_))
        ));
    }
}
