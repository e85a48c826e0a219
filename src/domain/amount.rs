use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use super::error::DomainError;

/// Monetary amount with two decimal places, stored as whole cents.
///
/// Amounts are never negative; a balance change that would go below zero is
/// expressed as a failed [`Amount::checked_apply`], not a negative value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    /// Number of cents per unit
    pub const SCALE: i64 = 100;

    /// Maximum fractional digits accepted by the parser
    pub const FRACTION_DIGITS: usize = 2;

    /// Create from an unsigned cent count; every `u32` fits
    pub const fn from_cents(cents: u32) -> Self {
        Self(cents as i64)
    }

    /// Create from a cent count read back from storage
    pub fn try_from_cents(cents: i64) -> Result<Self, DomainError> {
        if cents < 0 {
            return Err(DomainError::NegativeAmount);
        }
        Ok(Self(cents))
    }

    /// Get raw cent value
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Zero value
    pub const fn zero() -> Self {
        Self(0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse from a decimal string (e.g. "50", "50.5", "50.25")
    pub fn from_decimal_str(s: &str) -> Result<Self, DomainError> {
        let s = s.trim();

        if s.starts_with('-') {
            return Err(DomainError::NegativeAmount);
        }

        let parts: Vec<&str> = s.split('.').collect();

        let (integer_part, decimal_part) = match parts.len() {
            1 => (parts[0], ""),
            2 => (parts[0], parts[1]),
            _ => return Err(DomainError::InvalidAmount),
        };

        if decimal_part.len() > Self::FRACTION_DIGITS {
            return Err(DomainError::TooManyFractionDigits);
        }

        if integer_part.is_empty() || !integer_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::InvalidAmount);
        }
        if !decimal_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::InvalidAmount);
        }

        let integer: i64 = integer_part.parse().map_err(|_| DomainError::Overflow)?;

        let decimal_str = format!("{:0<2}", decimal_part);
        let decimal: i64 = decimal_str
            .parse()
            .map_err(|_| DomainError::InvalidAmount)?;

        integer
            .checked_mul(Self::SCALE)
            .and_then(|v| v.checked_add(decimal))
            .map(Self)
            .ok_or(DomainError::Overflow)
    }

    /// Format with exactly two decimal places
    pub fn to_decimal_string(&self) -> String {
        format!("{}.{:02}", self.0 / Self::SCALE, self.0 % Self::SCALE)
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0
            .checked_sub(other.0)
            .filter(|v| *v >= 0)
            .map(Self)
    }

    /// Apply a signed delta, returning the new amount.
    ///
    /// Fails with [`DomainError::InsufficientFunds`] when the result would be
    /// negative and [`DomainError::Overflow`] when it does not fit.
    pub fn checked_apply(&self, delta: SignedDelta) -> Result<Self, DomainError> {
        let next = self.0.checked_add(delta.0).ok_or(DomainError::Overflow)?;
        if next < 0 {
            return Err(DomainError::InsufficientFunds);
        }
        Ok(Self(next))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

impl FromStr for Amount {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_decimal_str(s)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_decimal_string())
    }
}

/// Signed balance change in cents: positive for credits, negative for debits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedDelta(i64);

impl SignedDelta {
    pub fn credit(amount: Amount) -> Self {
        Self(amount.cents())
    }

    pub fn debit(amount: Amount) -> Self {
        Self(-amount.cents())
    }

    pub fn cents(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for SignedDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "+" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}
