//! `shareledger-auth`: pure authorization boundary.
//!
//! Authentication and session handling live outside this workspace; callers
//! hand in an already-authenticated [`Principal`]. This crate only decides
//! what that principal may do.

pub mod authorize;
pub mod principal;
pub mod roles;

pub use authorize::{
    AuthzError, can_approve, can_create_listing, can_edit_listing, can_purchase,
    can_review_pending, can_view_holdings, can_view_listing, can_view_wallet, require,
};
pub use principal::Principal;
pub use roles::{Role, UnknownRole};
