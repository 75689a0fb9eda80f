//! Order number formatting: `YYYYMMDD-DD-NNNN`.
//!
//! The sequence comes from the per-tenant daily counter in upline-db
//! (`SequenceRepository::next_value` with scope [`ORDER_SCOPE`] and the
//! period from [`daily_period`]); this module only renders it.

use chrono::NaiveDate;

/// Counter scope for order numbers.
pub const ORDER_SCOPE: &str = "order";

/// Counter period key for a calendar day.
pub fn daily_period(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Formats an order number.
///
/// `device_code` is the last two characters of the device id, `00` when the
/// id is shorter. Sequences above 9999 widen the last segment.
///
/// ## Example
/// ```rust
/// use chrono::NaiveDate;
/// use upline_core::order_number::format_order_number;
///
/// let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
/// assert_eq!(format_order_number(date, "pos-terminal-07", 42), "20260307-07-0042");
/// ```
pub fn format_order_number(date: NaiveDate, device_id: &str, sequence: u64) -> String {
    let chars: Vec<char> = device_id.chars().collect();
    let device_code: String = if chars.len() < 2 {
        "00".to_string()
    } else {
        chars[chars.len() - 2..].iter().collect()
    };

    format!("{}-{}-{:04}", daily_period(date), device_code, sequence)
}
