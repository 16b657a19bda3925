//! Listing domain module.
//!
//! Business rules for a property divided into tradeable shares: the approval
//! state machine, price-per-share arithmetic and the share-accounting
//! invariant. Implemented purely as deterministic domain logic (no IO, no
//! storage).

pub mod listing;
pub mod pricing;
pub mod status;

pub use listing::{
    ApproveListing, CreateListing, DeleteListing, EditListing, Listing, ListingApproved,
    ListingCommand, ListingCreated, ListingDeleted, ListingEdited, ListingEvent, ListingRecord,
    ListingView, PurchaseShares, SharesPurchased,
};
pub use pricing::{ensure_representable, price_per_share, purchase_amount, reconcile_available, value_remaining};
pub use status::ListingStatus;
