//! Postgres-backed market store.
//!
//! Listing rows live in `listings`, ledger entries in `investments`. Purchases
//! run inside one transaction holding `SELECT … FOR UPDATE` on the listing row,
//! so concurrent buyers of the same listing queue on the row lock.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database | `40001` | `Conflict` | Serialization failure |
//! | Database | `40P01` | `Conflict` | Deadlock detected |
//! | Database | `55P03` | `Conflict` | `lock_timeout` expired waiting for the row |
//! | Database | `23505` | `Duplicate` | Listing id already exists |
//! | Database | `23503` | `Referenced` | Delete blocked by ledger entries |
//! | Database (other) | Any other | `Backend` | Constraint or trigger rejection |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `Unavailable` | Connection-level failure |
//! | Non-database error during `COMMIT` | N/A | `CommitUnknown` | Acknowledgement lost, outcome unknown |
//! | Other | N/A | `Backend` | Anything else |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use shareledger_core::{ExpectedVersion, ListingId, UserId};
use shareledger_ledger::{Investment, InvestmentId};
use shareledger_listings::{ListingRecord, ListingStatus};

use super::r#trait::{ListingFilter, ListingTx, ListingWrite, MarketStore, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS listings (
    id               UUID PRIMARY KEY,
    seller_id        UUID NOT NULL,
    title            TEXT NOT NULL,
    description      TEXT NOT NULL DEFAULT '',
    total_price      NUMERIC NOT NULL CHECK (total_price > 0),
    total_shares     BIGINT NOT NULL CHECK (total_shares > 0),
    available_shares BIGINT NOT NULL CHECK (available_shares >= 0 AND available_shares <= total_shares),
    status           TEXT NOT NULL CHECK (status IN ('pending', 'approved')),
    created_at       TIMESTAMPTZ NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL,
    version          BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS listings_status_idx ON listings (status, created_at DESC);
CREATE INDEX IF NOT EXISTS listings_seller_idx ON listings (seller_id, created_at DESC);

CREATE TABLE IF NOT EXISTS investments (
    id         BIGSERIAL PRIMARY KEY,
    buyer_id   UUID NOT NULL,
    listing_id UUID NOT NULL REFERENCES listings (id) ON DELETE RESTRICT,
    shares     BIGINT NOT NULL CHECK (shares > 0),
    amount     NUMERIC NOT NULL CHECK (amount >= 0),
    created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS investments_buyer_idx ON investments (buyer_id, id);
CREATE INDEX IF NOT EXISTS investments_listing_idx ON investments (listing_id, id);

CREATE OR REPLACE FUNCTION investments_append_only() RETURNS trigger AS $$
BEGIN
    RAISE EXCEPTION 'investments are append-only';
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS investments_append_only ON investments;
CREATE TRIGGER investments_append_only
    BEFORE UPDATE OR DELETE ON investments
    FOR EACH ROW EXECUTE FUNCTION investments_append_only();
"#;

const LISTING_COLUMNS: &str = "id, seller_id, title, description, total_price, total_shares, \
     available_shares, status, created_at, updated_at, version";

/// Postgres-backed listing rows + append-only ledger.
///
/// `Send + Sync`; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct PostgresMarketStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresMarketStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout: Duration::from_secs(2),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// How long a purchase waits for a contended row before failing with
    /// `StoreError::Conflict`.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Create tables, indexes and the append-only trigger if missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl MarketStore for PostgresMarketStore {
    #[instrument(skip(self, record), fields(listing_id = %record.id), err)]
    async fn insert_listing(&self, record: &ListingRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO listings (
                id, seller_id, title, description, total_price, total_shares,
                available_shares, status, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.seller_id.as_uuid())
        .bind(&record.title)
        .bind(&record.description)
        .bind(record.total_price)
        .bind(record.total_shares)
        .bind(record.available_shares)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(version_to_db(record.version)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_listing", e))?;
        Ok(())
    }

    async fn load_listing(&self, id: ListingId) -> Result<Option<ListingRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_listing", e))?;

        row.map(|r| decode_listing(&r)).transpose()
    }

    async fn list_listings(&self, filter: ListingFilter) -> Result<Vec<ListingRecord>, StoreError> {
        let order = "ORDER BY created_at DESC, id DESC";
        let query = match &filter {
            ListingFilter::All => format!("SELECT {LISTING_COLUMNS} FROM listings {order}"),
            ListingFilter::Status(_) => {
                format!("SELECT {LISTING_COLUMNS} FROM listings WHERE status = $1 {order}")
            }
            ListingFilter::Seller(_) => {
                format!("SELECT {LISTING_COLUMNS} FROM listings WHERE seller_id = $1 {order}")
            }
            ListingFilter::Ids(_) => {
                format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = ANY($1) {order}")
            }
        };

        let q = sqlx::query(&query);
        let q = match filter {
            ListingFilter::All => q,
            ListingFilter::Status(status) => q.bind(status.as_str()),
            ListingFilter::Seller(seller_id) => q.bind(*seller_id.as_uuid()),
            ListingFilter::Ids(ids) => q.bind(ids.iter().map(|id| *id.as_uuid()).collect::<Vec<Uuid>>()),
        };

        let rows = q
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_listings", e))?;
        rows.iter().map(decode_listing).collect()
    }

    #[instrument(skip(self), fields(listing_id = %id), err)]
    async fn lock_listing(&self, id: ListingId) -> Result<Option<Box<dyn ListingTx>>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // SET does not accept bind parameters.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        let row = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_listing", e))?;

        match row {
            Some(row) => {
                let listing = decode_listing(&row)?;
                Ok(Some(Box::new(PgListingTx { tx, listing }) as Box<dyn ListingTx>))
            }
            None => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                Ok(None)
            }
        }
    }

    async fn investments_for_buyer(&self, buyer_id: UserId) -> Result<Vec<Investment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, buyer_id, listing_id, shares, amount, created_at
            FROM investments
            WHERE buyer_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(buyer_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("investments_for_buyer", e))?;

        rows.iter().map(decode_investment).collect()
    }

    async fn investments_for_listings(
        &self,
        listing_ids: &[ListingId],
    ) -> Result<Vec<Investment>, StoreError> {
        if listing_ids.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<Uuid> = listing_ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, buyer_id, listing_id, shares, amount, created_at
            FROM investments
            WHERE listing_id = ANY($1)
            ORDER BY id ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("investments_for_listings", e))?;

        rows.iter().map(decode_investment).collect()
    }
}

/// Open transaction holding `FOR UPDATE` on one listing row.
///
/// Dropping it without committing rolls the transaction back.
struct PgListingTx {
    tx: Transaction<'static, Postgres>,
    listing: ListingRecord,
}

#[async_trait]
impl ListingTx for PgListingTx {
    fn listing(&self) -> &ListingRecord {
        &self.listing
    }

    #[instrument(
        skip(self, write),
        fields(listing_id = %write.record.id, expected_version = ?write.expected_version),
        err
    )]
    async fn commit(self: Box<Self>, write: ListingWrite) -> Result<Option<Investment>, StoreError> {
        let PgListingTx { mut tx, listing } = *self;
        if write.record.id != listing.id {
            return Err(StoreError::Backend(format!(
                "write for listing {} issued on lock of {}",
                write.record.id, listing.id
            )));
        }

        let expected = match write.expected_version {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(version_to_db(v)?),
        };
        let record = &write.record;

        let updated = sqlx::query(
            r#"
            UPDATE listings
            SET title = $2,
                description = $3,
                total_price = $4,
                total_shares = $5,
                available_shares = $6,
                status = $7,
                updated_at = $8,
                version = $9
            WHERE id = $1 AND ($10::BIGINT IS NULL OR version = $10)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.title)
        .bind(&record.description)
        .bind(record.total_price)
        .bind(record.total_shares)
        .bind(record.available_shares)
        .bind(record.status.as_str())
        .bind(record.updated_at)
        .bind(version_to_db(record.version)?)
        .bind(expected)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_listing", e))?;

        if updated.rows_affected() != 1 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Conflict(format!(
                "optimistic concurrency check failed: expected {:?}",
                write.expected_version
            )));
        }

        let investment = match write.investment {
            Some(new) => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO investments (buyer_id, listing_id, shares, amount, created_at)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING id
                    "#,
                )
                .bind(new.buyer_id.as_uuid())
                .bind(new.listing_id.as_uuid())
                .bind(new.shares)
                .bind(new.amount)
                .bind(new.created_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_investment", e))?;

                let id: i64 = row
                    .try_get("id")
                    .map_err(|e| StoreError::Corrupt(format!("failed to read investment id: {e}")))?;
                Some(Investment::from_new(InvestmentId(id_from_db(id)?), new))
            }
            None => None,
        };

        tx.commit().await.map_err(map_commit_error)?;

        Ok(investment)
    }

    #[instrument(skip(self), fields(listing_id = %self.listing.id), err)]
    async fn delete(self: Box<Self>) -> Result<(), StoreError> {
        let PgListingTx { mut tx, listing } = *self;

        let row = sqlx::query("SELECT COUNT(*) AS refs FROM investments WHERE listing_id = $1")
            .bind(listing.id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("count_investments", e))?;
        let refs: i64 = row
            .try_get("refs")
            .map_err(|e| StoreError::Corrupt(format!("failed to read ledger count: {e}")))?;
        if refs > 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Referenced(refs as u64));
        }

        sqlx::query("DELETE FROM listings WHERE id = $1")
            .bind(listing.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_listing", e))?;

        tx.commit().await.map_err(map_commit_error)?;
        Ok(())
    }
}

/// Row representation of `listings`.
struct ListingRow {
    id: Uuid,
    seller_id: Uuid,
    title: String,
    description: String,
    total_price: Decimal,
    total_shares: i64,
    available_shares: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ListingRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ListingRow {
            id: row.try_get("id")?,
            seller_id: row.try_get("seller_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            total_price: row.try_get("total_price")?,
            total_shares: row.try_get("total_shares")?,
            available_shares: row.try_get("available_shares")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<ListingRow> for ListingRecord {
    type Error = StoreError;

    fn try_from(row: ListingRow) -> Result<Self, Self::Error> {
        let status: ListingStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("listing {}: {e}", row.id)))?;
        Ok(ListingRecord {
            id: ListingId::from_uuid(row.id),
            seller_id: UserId::from_uuid(row.seller_id),
            title: row.title,
            description: row.description,
            total_price: row.total_price,
            total_shares: row.total_shares,
            available_shares: row.available_shares,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: u64::try_from(row.version)
                .map_err(|_| StoreError::Corrupt(format!("listing {}: negative version", row.id)))?,
        })
    }
}

/// Row representation of `investments`.
struct InvestmentRow {
    id: i64,
    buyer_id: Uuid,
    listing_id: Uuid,
    shares: i64,
    amount: Decimal,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for InvestmentRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(InvestmentRow {
            id: row.try_get("id")?,
            buyer_id: row.try_get("buyer_id")?,
            listing_id: row.try_get("listing_id")?,
            shares: row.try_get("shares")?,
            amount: row.try_get("amount")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn decode_listing(row: &sqlx::postgres::PgRow) -> Result<ListingRecord, StoreError> {
    ListingRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to deserialize listing row: {e}")))?
        .try_into()
}

fn decode_investment(row: &sqlx::postgres::PgRow) -> Result<Investment, StoreError> {
    let r = InvestmentRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to deserialize investment row: {e}")))?;
    Ok(Investment {
        id: InvestmentId(id_from_db(r.id)?),
        buyer_id: UserId::from_uuid(r.buyer_id),
        listing_id: ListingId::from_uuid(r.listing_id),
        shares: r.shares,
        amount: r.amount,
        created_at: r.created_at,
    })
}

fn version_to_db(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Backend(format!("version {version} out of range")))
}

fn id_from_db(id: i64) -> Result<u64, StoreError> {
    u64::try_from(id).map_err(|_| StoreError::Corrupt(format!("negative investment id {id}")))
}

/// Map a failed `COMMIT`.
///
/// A database error means the server answered and rolled the transaction
/// back. Anything else (a dropped socket, a TLS failure) may have happened
/// after the server made the commit durable.
fn map_commit_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(_) => map_sqlx_error("commit_transaction", err),
        other => StoreError::CommitUnknown(format!("commit_transaction: {other}")),
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                // serialization_failure, deadlock_detected, lock_not_available
                Some("40001") | Some("40P01") | Some("55P03") => StoreError::Conflict(msg),
                Some("23505") => StoreError::Duplicate(msg),
                // foreign_key_violation: ON DELETE RESTRICT from investments
                Some("23503") => StoreError::Referenced(0),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {operation}: {e}")),
        sqlx::Error::RowNotFound => {
            StoreError::Backend(format!("unexpected row not found in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shareledger_ledger::NewInvestment;

    #[test]
    fn lost_commit_acknowledgement_is_not_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let err = map_commit_error(sqlx::Error::Io(io));
        assert!(matches!(err, StoreError::CommitUnknown(_)));
        assert!(!err.is_retryable());
        assert!(!err.is_rolled_back());

        // Before COMMIT the same failure leaves nothing behind and is replayed.
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let err = map_sqlx_error("update_listing", sqlx::Error::Io(io));
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(err.is_retryable());
    }

    async fn store() -> PostgresMarketStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres tests");
        let store = PostgresMarketStore::connect(&url).await.unwrap();
        store.ensure_schema().await.unwrap();
        store
    }

    fn record() -> ListingRecord {
        let now = Utc::now();
        ListingRecord {
            id: ListingId::new(),
            seller_id: UserId::new(),
            title: "Dockside flat".to_string(),
            description: String::new(),
            total_price: Decimal::from(1000),
            total_shares: 100,
            available_shares: 100,
            status: ListingStatus::Approved,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn purchase_commit_updates_row_and_ledger() {
        let store = store().await;
        let r = record();
        store.insert_listing(&r).await.unwrap();

        let tx = store.lock_listing(r.id).await.unwrap().unwrap();
        let mut next = tx.listing().clone();
        next.available_shares -= 30;
        next.version += 1;
        let buyer_id = UserId::new();
        let inv = tx
            .commit(ListingWrite {
                record: next,
                expected_version: ExpectedVersion::Exact(1),
                investment: Some(NewInvestment {
                    buyer_id,
                    listing_id: r.id,
                    shares: 30,
                    amount: Decimal::from(300),
                    created_at: Utc::now(),
                }),
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(inv.amount, Decimal::from(300));
        let stored = store.load_listing(r.id).await.unwrap().unwrap();
        assert_eq!(stored.available_shares, 70);
        assert_eq!(stored.version, 2);
        assert_eq!(store.investments_for_buyer(buyer_id).await.unwrap(), vec![inv]);

        let tx = store.lock_listing(r.id).await.unwrap().unwrap();
        assert!(matches!(tx.delete().await, Err(StoreError::Referenced(1))));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn contended_row_times_out_as_conflict() {
        let store = store().await.with_lock_timeout(Duration::from_millis(50));
        let r = record();
        store.insert_listing(&r).await.unwrap();

        let held = store.lock_listing(r.id).await.unwrap().unwrap();
        let err = match store.lock_listing(r.id).await {
            Err(e) => e,
            Ok(_) => panic!("second lock should time out"),
        };
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(err.is_retryable());
        drop(held);

        let tx = store.lock_listing(r.id).await.unwrap().unwrap();
        tx.delete().await.unwrap();
        assert!(store.load_listing(r.id).await.unwrap().is_none());
    }
}
