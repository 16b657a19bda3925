//! Infrastructure layer: storage adapters, the purchase transaction engine,
//! retry policy and configuration.

pub mod config;
pub mod retry;
pub mod service;
pub mod store;


pub use config::{ConfigError, LedgerConfig, PurchasePolicy};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use service::{ErrorKind, LedgerError, ListingTerms, PurchaseReceipt, ShareLedger};
pub use store::{
    InMemoryMarketStore, ListingFilter, ListingTx, ListingWrite, MarketStore, PostgresMarketStore,
    StoreError,
};
