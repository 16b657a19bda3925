//! Listing rows and investment ledger storage boundary.
//!
//! The service never mutates a listing without first taking its row lock
//! through [`MarketStore::lock_listing`]; the returned [`ListingTx`] writes the
//! row and appends the ledger entry as one atomic unit.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryMarketStore;
pub use postgres::PostgresMarketStore;
pub use r#trait::{ListingFilter, ListingTx, ListingWrite, MarketStore, StoreError};
