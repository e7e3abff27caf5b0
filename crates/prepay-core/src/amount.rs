//! Fixed-point monetary amounts.
//!
//! Balances accumulate across thousands of micro-charges, so amounts are
//! scaled integers with six fractional digits rather than binary floats.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A signed USD amount with six fractional digits, stored as a scaled `i64`.
///
/// `Amount` serializes as a decimal string (`"25.000000"`) and parses any
/// decimal with up to six fractional digits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(i64);

/// Number of scaled units per dollar.
const SCALE: i64 = 1_000_000;

/// Number of fractional digits carried by [`Amount`].
const FRACTIONAL_DIGITS: u32 = 6;

impl Amount {
    /// The zero amount.
    pub const ZERO: Self = Self(0);

    /// Create an amount from raw micro-dollar units.
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Create an amount from a whole number of dollars.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::Overflow`] if the value does not fit.
    pub fn from_dollars(dollars: i64) -> Result<Self, AmountError> {
        dollars
            .checked_mul(SCALE)
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    /// Return the raw micro-dollar units.
    #[must_use]
    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// Whether the amount is strictly negative.
    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Whether the amount is strictly positive.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Whether the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::Overflow`] if the sum does not fit.
    pub fn checked_add(self, rhs: Self) -> Result<Self, AmountError> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    /// Checked subtraction.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::Overflow`] if the difference does not fit.
    pub fn checked_sub(self, rhs: Self) -> Result<Self, AmountError> {
        self.0
            .checked_sub(rhs.0)
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    /// The absolute value.
    #[must_use]
    pub const fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// The negated amount.
    #[must_use]
    pub const fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / SCALE.unsigned_abs();
        let frac = abs % SCALE.unsigned_abs();
        write!(f, "{sign}{whole}.{frac:06}")
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (whole_str, frac_str) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole_str.is_empty() && frac_str.is_empty() {
            return Err(AmountError::Invalid(s.to_string()));
        }
        if frac_str.len() > FRACTIONAL_DIGITS as usize {
            return Err(AmountError::Invalid(s.to_string()));
        }
        if !whole_str.chars().all(|c| c.is_ascii_digit())
            || !frac_str.chars().all(|c| c.is_ascii_digit())
        {
            return Err(AmountError::Invalid(s.to_string()));
        }

        let whole: i64 = if whole_str.is_empty() {
            0
        } else {
            whole_str
                .parse()
                .map_err(|_| AmountError::Invalid(s.to_string()))?
        };

        // Right-pad the fractional part to six digits.
        let mut frac: i64 = 0;
        if !frac_str.is_empty() {
            frac = frac_str
                .parse()
                .map_err(|_| AmountError::Invalid(s.to_string()))?;
            for _ in 0..(FRACTIONAL_DIGITS as usize - frac_str.len()) {
                frac *= 10;
            }
        }

        let micros = whole
            .checked_mul(SCALE)
            .and_then(|w| w.checked_add(frac))
            .ok_or(AmountError::Overflow)?;

        Ok(Self(if negative { -micros } else { micros }))
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

/// Errors that can occur constructing or combining amounts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    /// The input is not a decimal with at most six fractional digits.
    #[error("invalid amount: {0}")]
    Invalid(String),

    /// The value does not fit in the scaled integer range.
    #[error("amount out of range")]
    Overflow,
}
