use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const CREDITS_SYMBOL: &str = "cr";

/// Number of stored units in one whole credit.
const SCALE: i64 = 100;

//--------------------------------------      Credits        ---------------------------------------------------------
/// A signed amount of account credits, stored as an integer number of hundredths of a credit.
///
/// Credits are what users buy with real money and spend on verifications. Keeping them in fixed-point form means
/// ledger sums are exact: the balance of an account is always the plain integer sum of its transactions.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct Credits(i64);

op!(binary Credits, Add, add);
op!(binary Credits, Sub, sub);
op!(inplace Credits, SubAssign, sub_assign);
op!(inplace Credits, AddAssign, add_assign);
op!(unary Credits, Neg, neg);

impl Mul<i64> for Credits {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Sum for Credits {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in credits: {0}")]
pub struct CreditsConversionError(String);

impl From<i64> for Credits {
    /// Interprets the value as hundredths of a credit.
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Credits {
    pub const ZERO: Credits = Credits(0);

    /// The raw value, in hundredths of a credit.
    pub fn value(&self) -> i64 {
        self.0
    }

    /// Creates an amount from a raw number of hundredths of a credit.
    pub const fn new(hundredths: i64) -> Self {
        Self(hundredths)
    }

    pub const fn from_whole(credits: i64) -> Self {
        Self(credits * SCALE)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Converts this amount into minor units of another currency, given the number of minor units one whole credit
    /// is worth. Fractions of a minor unit are rounded down.
    pub fn to_minor_units(&self, minor_per_credit: i64) -> i64 {
        self.0 * minor_per_credit / SCALE
    }
}

impl Display for Credits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{sign}{}.{:02}{CREDITS_SYMBOL}", abs / SCALE, abs % SCALE)
    }
}

impl FromStr for Credits {
    type Err = CreditsConversionError;

    /// Parses amounts such as `3`, `3.5`, `-1.25` or `2.00cr`. At most two decimal places are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || CreditsConversionError(s.to_string());
        let trimmed = s.trim();
        let trimmed = trimmed.strip_suffix(CREDITS_SYMBOL).unwrap_or(trimmed).trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() || frac.len() > 2 || !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        let whole = whole.parse::<i64>().map_err(|_| err())?;
        let frac = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| err())? * 10,
            _ => frac.parse::<i64>().map_err(|_| err())?,
        };
        let value = whole.checked_mul(SCALE).and_then(|w| w.checked_add(frac)).ok_or_else(err)?;
        Ok(Self(if negative { -value } else { value }))
    }
}
