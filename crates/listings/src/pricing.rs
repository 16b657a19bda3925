//! Share pricing and share-count reconciliation.
//!
//! Price per share is never stored; it is always `total_price / total_shares`
//! of the current listing row. Products are computed as
//! `total_price * n / total_shares` so that buying out a listing costs
//! exactly its total price even when the per-share price does not terminate.

use rust_decimal::Decimal;

use shareledger_core::{DomainError, DomainResult};

fn ensure_share_count(total_shares: i64) -> DomainResult<()> {
    if total_shares <= 0 {
        return Err(DomainError::validation("total shares must be a positive integer"));
    }
    Ok(())
}

fn overflow() -> DomainError {
    DomainError::validation("amount exceeds supported decimal range")
}

/// Rejects terms whose gross product `total_price * total_shares` is not
/// representable. Purchase amounts and remaining value of valid terms are
/// bounded by that product.
pub fn ensure_representable(total_price: Decimal, total_shares: i64) -> DomainResult<()> {
    ensure_share_count(total_shares)?;
    total_price
        .checked_mul(Decimal::from(total_shares))
        .map(|_| ())
        .ok_or_else(|| DomainError::validation("total price is too large for the share count"))
}

/// `total_price / total_shares`.
pub fn price_per_share(total_price: Decimal, total_shares: i64) -> DomainResult<Decimal> {
    ensure_share_count(total_shares)?;
    total_price
        .checked_div(Decimal::from(total_shares))
        .ok_or_else(overflow)
}

/// Value of `shares` shares at the listing's current price.
pub fn purchase_amount(total_price: Decimal, total_shares: i64, shares: i64) -> DomainResult<Decimal> {
    ensure_share_count(total_shares)?;
    total_price
        .checked_mul(Decimal::from(shares))
        .and_then(|gross| gross.checked_div(Decimal::from(total_shares)))
        .ok_or_else(overflow)
}

/// Value of the shares still available for purchase.
pub fn value_remaining(
    total_price: Decimal,
    total_shares: i64,
    available_shares: i64,
) -> DomainResult<Decimal> {
    purchase_amount(total_price, total_shares, available_shares)
}

/// Available shares after resizing a listing from `old_total` to `new_total`.
///
/// Keeps the count of already-sold shares (`old_total - old_available`)
/// constant. A resize below the sold count is rejected, never clamped.
pub fn reconcile_available(old_total: i64, old_available: i64, new_total: i64) -> DomainResult<i64> {
    ensure_share_count(new_total)?;
    let delta = new_total - old_total;
    let new_available = old_available + delta;
    if new_available < 0 {
        let sold = old_total - old_available;
        return Err(DomainError::invariant(format!(
            "total shares {new_total} would under-allocate {sold} already-sold shares"
        )));
    }
    Ok(new_available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn price_per_share_divides_total_price() {
        let pps = price_per_share(Decimal::from(1000), 100).unwrap();
        assert_eq!(pps, Decimal::from(10));
    }

    #[test]
    fn buying_out_costs_exactly_total_price() {
        let total = Decimal::from(1000);
        assert_eq!(purchase_amount(total, 3, 3).unwrap(), total);
        assert_eq!(value_remaining(total, 3, 3).unwrap(), total);
    }

    #[test]
    fn zero_share_count_is_rejected() {
        assert!(matches!(
            price_per_share(Decimal::ONE, 0),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn shrinking_below_sold_shares_is_rejected() {
        // 100 total, 30 sold, 70 available.
        assert_eq!(reconcile_available(100, 70, 50).unwrap(), 20);
        assert_eq!(reconcile_available(100, 70, 30).unwrap(), 0);
        match reconcile_available(100, 70, 20) {
            Err(DomainError::InvariantViolation(msg)) => assert!(msg.contains("30 already-sold")),
            other => panic!("expected invariant violation, got {other:?}"),
        }
    }

    #[test]
    fn oversized_terms_are_rejected() {
        let huge = Decimal::from_i128_with_scale(10_i128.pow(27), 0);
        assert!(matches!(
            ensure_representable(huge, 100),
            Err(DomainError::Validation(_))
        ));
        assert!(ensure_representable(huge, 1).is_ok());
        assert!(ensure_representable(Decimal::from(1000), 100).is_ok());
    }

    proptest! {
        #[test]
        fn resize_preserves_sold_count(
            total in 1i64..100_000,
            sold_ratio in 0.0f64..=1.0,
            new_total in 1i64..100_000,
        ) {
            let sold = ((total as f64) * sold_ratio) as i64;
            let available = total - sold;
            match reconcile_available(total, available, new_total) {
                Ok(new_available) => {
                    prop_assert!(new_available >= 0);
                    prop_assert_eq!(new_total - new_available, sold);
                }
                Err(_) => prop_assert!(new_total < sold),
            }
        }

        #[test]
        fn unchanged_total_leaves_available_unchanged(total in 1i64..100_000, available_seed in 0i64..100_000) {
            let available = available_seed % (total + 1);
            prop_assert_eq!(reconcile_available(total, available, total).unwrap(), available);
        }
    }
}
