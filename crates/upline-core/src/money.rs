//! # Money Module
//!
//! Lossless conversion between decimal major-unit amounts and integer minor
//! units, plus the single rounding rule used by every commission calculation.
//!
//! ## Why Minor Units?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE ROUNDING PROBLEM                                                   │
//! │                                                                         │
//! │  Floating point:  1000.00 × 0.07 = 70.00000000000001  ❌               │
//! │  Mixed rules:     one module rounds half-even, another half-up,        │
//! │                   a retry produces a different cent  ❌                 │
//! │                                                                         │
//! │  OUR SOLUTION                                                           │
//! │    1. Convert the transaction amount to minor units ONCE               │
//! │    2. Rates are exact decimals (rust_decimal), never f64               │
//! │    3. Every product is rounded with round_half_up, nothing else         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use rust_decimal::Decimal;
//! use upline_core::money::{from_minor_units, to_minor_units, Currency};
//!
//! let usd = Currency::from_code("USD").unwrap();
//! let minor = to_minor_units(Decimal::new(1005, 3), &usd).unwrap(); // 1.005
//! assert_eq!(minor.minor(), 101); // half-up
//! assert_eq!(from_minor_units(minor, &usd), Decimal::new(101, 2));
//! ```

use std::ops::{Add, AddAssign, Sub, SubAssign};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;

/// Currencies settled without a minor unit.
const ZERO_EXPONENT_CURRENCIES: &[&str] = &["JPY", "KRW", "VND", "CLP", "ISK", "UGX", "XAF", "XOF"];

/// Currencies settled in thousandths.
const THREE_EXPONENT_CURRENCIES: &[&str] = &["BHD", "KWD", "OMR", "JOD", "TND", "IQD", "LYD"];

/// Maximum number of decimal places a commission rate may carry.
///
/// Keeps `amount_minor × rate` inside the 96-bit decimal mantissa, so the
/// product is exact before rounding.
pub const MAX_RATE_SCALE: u32 = 9;

// =============================================================================
// Rounding
// =============================================================================

/// Rounds to the nearest integer, ties toward positive infinity.
///
/// This is the ONE rounding rule of the engine. `2.5 → 3`, `2.4 → 2`,
/// `-2.5 → -2`.
pub fn round_half_up(value: Decimal) -> Decimal {
    (value + Decimal::new(5, 1)).floor()
}

// =============================================================================
// Currency
// =============================================================================

/// An ISO-4217 currency with its minor-unit exponent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
    code: String,
    exponent: u32,
}

impl Currency {
    /// Parses a three-letter currency code.
    ///
    /// ## Example
    /// ```rust
    /// use upline_core::money::Currency;
    ///
    /// assert_eq!(Currency::from_code("usd").unwrap().exponent(), 2);
    /// assert_eq!(Currency::from_code("JPY").unwrap().exponent(), 0);
    /// assert_eq!(Currency::from_code("KWD").unwrap().exponent(), 3);
    /// assert!(Currency::from_code("US").is_err());
    /// ```
    pub fn from_code(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim().to_ascii_uppercase();

        if code.is_empty() {
            return Err(ValidationError::Required {
                field: "currency".to_string(),
            });
        }

        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ValidationError::InvalidFormat {
                field: "currency".to_string(),
                reason: format!("'{}' is not a three-letter ISO-4217 code", code),
            });
        }

        let exponent = if ZERO_EXPONENT_CURRENCIES.contains(&code.as_str()) {
            0
        } else if THREE_EXPONENT_CURRENCIES.contains(&code.as_str()) {
            3
        } else {
            2
        };

        Ok(Currency { code, exponent })
    }

    /// The upper-case ISO code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Number of minor-unit digits (2 for USD cents).
    pub fn exponent(&self) -> u32 {
        self.exponent
    }

    fn scale_factor(&self) -> Decimal {
        Decimal::from(10i64.pow(self.exponent))
    }
}

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// The currency travels next to the value (on the transaction and on each
/// commission record); `Money` itself is only the integer count.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Returns the value in minor units.
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

    /// Multiplies by a commission rate and rounds half-up.
    ///
    /// ## Example
    /// ```rust
    /// use rust_decimal::Decimal;
    /// use upline_core::{CommissionRate, Money};
    ///
    /// let amount = Money::from_minor(1005); // 10.05
    /// let rate = CommissionRate::new(Decimal::new(5, 1)).unwrap(); // 50%
    /// assert_eq!(amount.apply_rate(rate).minor(), 503); // 502.5 → 503
    /// ```
    pub fn apply_rate(&self, rate: CommissionRate) -> Money {
        // |self| ≤ 2^63 and rate has at most MAX_RATE_SCALE digits, so the
        // product fits the decimal mantissa without rescaling.
        let product = Decimal::from(self.0) * rate.value();
        match round_half_up(product).to_i64() {
            Some(minor) => Money(minor),
            None => unreachable!("a rate within [0, 1] keeps the product within i64"),
        }
    }

    /// Renders the amount in major units followed by the currency code.
    pub fn format(&self, currency: &Currency) -> String {
        format!("{} {}", from_minor_units(*self, currency), currency.code())
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

// =============================================================================
// Commission Rate
// =============================================================================

/// Why a decimal could not become a [`CommissionRate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateError {
    /// Below 0 or above 1.
    OutOfRange,
    /// More than [`MAX_RATE_SCALE`] decimal places.
    TooPrecise,
}

/// A commission percentage expressed as an exact fraction in `[0, 1]`.
///
/// `0.1` means 10%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommissionRate(Decimal);

impl CommissionRate {
    /// Validates and wraps a rate.
    pub fn new(value: Decimal) -> Result<Self, RateError> {
        if value < Decimal::ZERO || value > Decimal::ONE {
            return Err(RateError::OutOfRange);
        }

        let value = value.normalize();
        if value.scale() > MAX_RATE_SCALE {
            return Err(RateError::TooPrecise);
        }

        Ok(CommissionRate(value))
    }

    /// Zero rate.
    pub fn zero() -> Self {
        CommissionRate(Decimal::ZERO)
    }

    /// The rate as a decimal fraction.
    #[inline]
    pub fn value(&self) -> Decimal {
        self.0
    }
}

// =============================================================================
// Conversions
// =============================================================================

/// Converts a major-unit decimal into minor units, rounding half-up.
///
/// ## Errors
/// `ValidationError::Overflow` when the value does not fit an `i64` of
/// minor units.
pub fn to_minor_units(amount: Decimal, currency: &Currency) -> Result<Money, ValidationError> {
    let overflow = || ValidationError::Overflow {
        field: "amount".to_string(),
    };

    let scaled = amount
        .checked_mul(currency.scale_factor())
        .ok_or_else(overflow)?;
    let rounded = scaled
        .checked_add(Decimal::new(5, 1))
        .map(|d| d.floor())
        .ok_or_else(overflow)?;

    rounded.to_i64().map(Money).ok_or_else(overflow)
}

/// Converts minor units back to a major-unit decimal. Exact, no rounding.
pub fn from_minor_units(money: Money, currency: &Currency) -> Decimal {
    Decimal::new(money.minor(), currency.exponent())
}

/// Sanity check for externally supplied totals at system boundaries.
///
/// Not used inside the engine: commission math compares minor units exactly.
pub fn approx_equal(a: Decimal, b: Decimal, tolerance_major_units: Decimal) -> bool {
    (a - b).abs() <= tolerance_major_units.abs()
}

// =============================================================================
// Unit Tests
// =============================================================================
