//! Domain value types: account identifiers and money.

use eventkeep_core::key::EntityKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unique identifier for a bank account.
///
/// Doubles as the entity key of the account's event stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Creates an `AccountId` from any string-like value
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The entity key this account is stored and routed under
    #[must_use]
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(self.0.as_str())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&EntityKey> for AccountId {
    fn from(key: &EntityKey) -> Self {
        Self(key.as_str().to_string())
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Errors from parsing or computing with [`Money`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// The input was empty.
    #[error("amount is empty")]
    Empty,

    /// The input is not a decimal number.
    #[error("invalid amount: {0:?}")]
    Invalid(String),

    /// The input has more than two fractional digits.
    #[error("amount {0:?} has more than two decimal places")]
    TooPrecise(String),

    /// The result does not fit.
    #[error("amount overflow")]
    Overflow,
}

/// Signed money amount in cents (avoids floating point issues).
///
/// Parses from decimal strings with at most two fractional digits and
/// displays as dollars:
///
/// ```
/// use accounts::Money;
///
/// let amount: Money = "200.05".parse().unwrap();
/// assert_eq!(amount.cents(), 20_005);
/// assert_eq!(amount.to_string(), "$200.05");
/// assert_eq!(Money::from_cents(-100).to_string(), "-$1.00");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// No money at all
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` amount from cents
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` amount from whole dollars, saturating at the bounds
    #[must_use]
    pub const fn from_dollars(dollars: i64) -> Self {
        Self(dollars.saturating_mul(100))
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Checks if this amount is zero
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checks if this amount is below zero
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Adds two amounts.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Overflow`] if the sum does not fit.
    pub const fn checked_add(self, other: Self) -> Result<Self, MoneyError> {
        match self.0.checked_add(other.0) {
            Some(cents) => Ok(Self(cents)),
            None => Err(MoneyError::Overflow),
        }
    }

    /// Subtracts `other` from this amount.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Overflow`] if the difference does not fit.
    pub const fn checked_sub(self, other: Self) -> Result<Self, MoneyError> {
        match self.0.checked_sub(other.0) {
            Some(cents) => Ok(Self(cents)),
            None => Err(MoneyError::Overflow),
        }
    }

    /// Adds two amounts, clamping at the bounds
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Subtracts `other`, clamping at the bounds
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// The same amount with the opposite sign, clamping at the bounds
    #[must_use]
    pub const fn saturating_neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let cents = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", cents / 100, cents % 100)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(MoneyError::Empty);
        }

        let (negative, unsigned) = match input.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, input.strip_prefix('+').unwrap_or(input)),
        };
        let (whole, fraction) = match unsigned.split_once('.') {
            Some((whole, fraction)) => (whole, Some(fraction)),
            None => (unsigned, None),
        };

        let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(whole) || fraction.is_some_and(|fraction| !all_digits(fraction)) {
            return Err(MoneyError::Invalid(input.to_string()));
        }

        let fraction = fraction.unwrap_or("");
        if fraction.len() > 2 {
            return Err(MoneyError::TooPrecise(input.to_string()));
        }

        let whole: i64 = whole.parse().map_err(|_| MoneyError::Overflow)?;
        // "5" is 50 cents, "05" is 5 cents.
        let fraction_cents = match fraction.len() {
            0 => 0,
            1 => i64::from(fraction.as_bytes()[0] - b'0') * 10,
            _ => fraction.parse::<i64>().map_err(|_| MoneyError::Invalid(input.to_string()))?,
        };

        let cents = whole
            .checked_mul(100)
            .and_then(|cents| cents.checked_add(fraction_cents))
            .ok_or(MoneyError::Overflow)?;

        Ok(Self(if negative { -cents } else { cents }))
    }
}
