//! # Money Module
//!
//! Provides the `Money` type and the sale arithmetic built on it.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  OUR SOLUTION: Whole shillings in an i64                                │
//! │    The provider settles integer amounts only, so the smallest unit      │
//! │    we store is the unit it pays out. Nothing is ever rounded twice.     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## The Sale Total Rule
//! ```text
//!   total = max(0, subtotal + tax - discount - loyalty_discount)
//!   change_due = max(0, amount_paid - total)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::types::TaxRate;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest settled currency unit (whole shillings).
///
/// ## Where Money is Used
/// ```text
/// NewSaleItem.unit_price × quantity - discount ──► SaleItem.subtotal
///                                                        │
///                              Σ line subtotals ──► Sale.subtotal
///                                                        │
///                     + tax - discount - loyalty ──► Sale.total ──► STK push
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from the smallest unit.
    ///
    /// ## Example
    /// ```rust
    /// use duka_core::money::Money;
    ///
    /// let price = Money::from_minor(250);
    /// assert_eq!(price.minor(), 250);
    /// ```
    #[inline]
    pub const fn from_minor(amount: i64) -> Self {
        Money(amount)
    }

    /// Returns the value in the smallest unit.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Clamps negative values to zero.
    ///
    /// ## Example
    /// ```rust
    /// use duka_core::money::Money;
    ///
    /// assert_eq!(Money::from_minor(-40).non_negative(), Money::zero());
    /// assert_eq!(Money::from_minor(40).non_negative().minor(), 40);
    /// ```
    #[inline]
    pub const fn non_negative(self) -> Self {
        if self.0 < 0 {
            Money(0)
        } else {
            self
        }
    }

    /// Calculates tax on this amount, rounding half up.
    ///
    /// ## Formula
    /// ```text
    /// tax = (amount × bps + 5000) / 10000
    /// ```
    /// The multiplication happens in i128 so large wholesale invoices
    /// cannot overflow.
    ///
    /// ## Example
    /// ```rust
    /// use duka_core::money::Money;
    /// use duka_core::types::TaxRate;
    ///
    /// let subtotal = Money::from_minor(1_000);
    /// let vat = TaxRate::from_bps(1600); // 16% VAT
    /// assert_eq!(subtotal.calculate_tax(vat).minor(), 160);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        let amount = self.0 as i128;
        let bps = rate.bps() as i128;
        let tax = (amount * bps + 5000) / 10000;
        Money(tax as i64)
    }

    /// Multiplies a unit price by a quantity.
    ///
    /// Callers pass values already bounded by validation; use
    /// [`Money::checked_multiply_quantity`] on raw input.
    #[inline]
    pub fn multiply_quantity(&self, qty: i64) -> Money {
        Money(self.0 * qty)
    }

    /// `None` when the product does not fit in `i64`.
    #[inline]
    pub fn checked_multiply_quantity(&self, qty: i64) -> Option<Money> {
        self.0.checked_mul(qty).map(Money)
    }
}

// =============================================================================
// Sale Arithmetic
// =============================================================================

/// Subtotal of one sale line: `quantity × unit_price - discount`.
pub fn line_subtotal(quantity: i64, unit_price: Money, discount: Money) -> Money {
    unit_price.multiply_quantity(quantity) - discount
}

/// The sale total invariant: `max(0, subtotal + tax - discount - loyalty_discount)`.
pub fn sale_total(subtotal: Money, tax: Money, discount: Money, loyalty_discount: Money) -> Money {
    (subtotal + tax - discount - loyalty_discount).non_negative()
}

/// Change handed back to the customer: `max(0, amount_paid - total)`.
pub fn change_due(amount_paid: Money, total: Money) -> Money {
    (amount_paid - total).non_negative()
}

/// Balance still owed on a sale: `max(0, total - amount_paid)`.
pub fn balance_due(total: Money, amount_paid: Money) -> Money {
    (total - amount_paid).non_negative()
}

// =============================================================================
// Display Implementation
// =============================================================================

impl fmt::Display for Money {
    /// Formats as `KES 1250` (negative: `-KES 40`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            write!(f, "-KES {}", self.0.unsigned_abs())
        } else {
            write!(f, "KES {}", self.0)
        }
    }
}

// =============================================================================
// Arithmetic Operations
// =============================================================================

impl Add for Money {
    type Output = Money;

    #[inline]
    fn add(self, other: Money) -> Money {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Money) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Money;

    #[inline]
    fn sub(self, other: Money) -> Money {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Money) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Money;

    #[inline]
    fn mul(self, qty: i64) -> Money {
        Money(self.0 * qty)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), Add::add)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
