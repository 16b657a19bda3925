//! Investment ledger and valuation views.
//!
//! The ledger is the append-only audit trail of completed purchases. Its
//! entries are never updated or deleted; the views in [`valuation`] are pure
//! functions over ledger entries and the current listing rows and hold no
//! state of their own.

pub mod investment;
pub mod valuation;

pub use investment::{Investment, InvestmentId, NewInvestment};
pub use valuation::{HoldingRow, Wallet, WalletPosition, holdings_for, wallet_for};
