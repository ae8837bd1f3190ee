//! # Loyalty Rules
//!
//! Customers earn one point per [`LOYALTY_POINT_THRESHOLD`] shillings of sale
//! total and may redeem points against a sale. Redemption is all-or-nothing
//! with the sale: if the balance cannot cover it, the whole sale aborts.
//!
//! ```text
//! balance_after = balance + points_earned(total) - redeemed
//!                 └─ only when balance >= redeemed, else InsufficientLoyaltyPoints
//! ```

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::LOYALTY_POINT_THRESHOLD;

/// Points earned for a sale total: `floor(total / 100)`, never negative.
///
/// ## Example
/// ```rust
/// use duka_core::loyalty::points_earned;
/// use duka_core::Money;
///
/// assert_eq!(points_earned(Money::from_minor(1_250)), 12);
/// assert_eq!(points_earned(Money::from_minor(99)), 0);
/// ```
pub fn points_earned(total: Money) -> i64 {
    if total.is_negative() {
        return 0;
    }
    total.minor() / LOYALTY_POINT_THRESHOLD
}

/// Checks that a redemption can be covered by the current balance.
pub fn check_redemption(balance: i64, redeemed: i64) -> CoreResult<()> {
    if redeemed > balance {
        return Err(CoreError::InsufficientLoyaltyPoints {
            balance,
            requested: redeemed,
        });
    }
    Ok(())
}

/// The balance after a sale: accrual plus redemption, checked.
pub fn balance_after_sale(balance: i64, total: Money, redeemed: i64) -> CoreResult<i64> {
    check_redemption(balance, redeemed)?;
    Ok(balance - redeemed + points_earned(total))
}
