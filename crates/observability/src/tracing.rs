//! Tracing/logging initialization.
//!
//! JSON lines with timestamps, filtered through `RUST_LOG`. Ledger spans carry
//! `listing_id`, `actor_id`/`buyer_id` and share counts, so one purchase can be
//! followed from lock to commit by filtering on its listing.

use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Build the filter from `RUST_LOG`, falling back to `default_directive`.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_default(DEFAULT_DIRECTIVE);
}

/// Like [`init`], with a caller-chosen fallback filter (e.g.
/// `"shareledger_infra=debug,info"` to surface rejected purchases).
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_with_default(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_current_span(true)
        .try_init()
        .is_ok()
}
