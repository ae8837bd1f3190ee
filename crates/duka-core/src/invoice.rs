//! # Invoice Numbers
//!
//! Invoices are numbered per calendar day: `INV-<YYYYMMDD>-<NNNN>`.
//!
//! The sequence part is zero-padded to four digits and simply grows wider
//! past 9999, so the ledger orders candidates by length first and text
//! second when it looks up the highest number of the day.

use chrono::NaiveDate;

/// `INV-20261019-`
pub fn invoice_prefix(date: NaiveDate) -> String {
    format!("INV-{}-", date.format("%Y%m%d"))
}

/// `INV-20261019-0007`
pub fn format_invoice_number(date: NaiveDate, sequence: u32) -> String {
    format!("{}{:04}", invoice_prefix(date), sequence)
}

/// Parses the sequence part of an invoice number for the given day.
///
/// Returns `None` when the number belongs to another day or is malformed.
pub fn parse_sequence(date: NaiveDate, invoice_number: &str) -> Option<u32> {
    invoice_number
        .strip_prefix(&invoice_prefix(date))
        .and_then(|seq| seq.parse::<u32>().ok())
}

/// The number following `last` (the highest issued today), or `0001`.
///
/// ## Example
/// ```rust
/// use chrono::NaiveDate;
/// use duka_core::invoice::next_invoice_number;
///
/// let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
/// assert_eq!(next_invoice_number(day, None), "INV-20261019-0001");
/// assert_eq!(
///     next_invoice_number(day, Some("INV-20261019-0041")),
///     "INV-20261019-0042"
/// );
/// ```
pub fn next_invoice_number(date: NaiveDate, last: Option<&str>) -> String {
    let next = last
        .and_then(|n| parse_sequence(date, n))
        .map(|seq| seq + 1)
        .unwrap_or(1);
    format_invoice_number(date, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn test_prefix_and_format() {
        assert_eq!(invoice_prefix(day()), "INV-20261019-");
        assert_eq!(format_invoice_number(day(), 7), "INV-20261019-0007");
        assert_eq!(format_invoice_number(day(), 12345), "INV-20261019-12345");
    }

    #[test]
    fn test_next_after_wide_sequence() {
        assert_eq!(
            next_invoice_number(day(), Some("INV-20261019-9999")),
            "INV-20261019-10000"
        );
    }

    #[test]
    fn test_other_day_or_garbage_restarts() {
        assert_eq!(
            next_invoice_number(day(), Some("INV-20261018-0050")),
            "INV-20261019-0001"
        );
        assert_eq!(
            next_invoice_number(day(), Some("INV-20261019-abcd")),
            "INV-20261019-0001"
        );
    }
}
