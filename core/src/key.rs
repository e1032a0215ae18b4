//! Entity identification and sequencing types.
//!
//! [`EntityKey`] names one entity for its whole lifetime. It is the stream key
//! in the event log, the snapshot key and the lookup key in a router.
//! [`SequenceNr`] orders the events of a single entity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `EntityKey` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid entity key: {0}")]
pub struct ParseEntityKeyError(String);

/// Opaque identifier of a single entity.
///
/// Keys are plain strings such as `"100"` or `"account-42"`. Two keys are the
/// same entity if and only if their strings are equal.
///
/// # Validation
///
/// - `FromStr::from_str()`: rejects empty strings
/// - `From::from()` and `new()`: no validation (trusted input)
///
/// # Examples
///
/// ```
/// use eventkeep_core::key::EntityKey;
///
/// let key = EntityKey::new("100");
/// assert_eq!(key.as_str(), "100");
///
/// let parsed: EntityKey = "200".parse().unwrap();
/// assert_eq!(parsed, EntityKey::new("200"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey(String);

impl EntityKey {
    /// Create a new `EntityKey` from a string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the key into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityKey {
    type Err = ParseEntityKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseEntityKeyError("entity key cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for EntityKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for EntityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Position of an event within one entity's stream.
///
/// `SequenceNr::INITIAL` (0) means "no events yet". The first persisted event
/// of an entity has sequence number 1 and every following event increments
/// it by one. Appends carry the expected current value for optimistic
/// concurrency.
///
/// # Examples
///
/// ```
/// use eventkeep_core::key::SequenceNr;
///
/// let first = SequenceNr::INITIAL.next();
/// assert_eq!(first, SequenceNr::new(1));
/// assert!(first > SequenceNr::INITIAL);
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNr(u64);

impl SequenceNr {
    /// The sequence number of an entity without events.
    pub const INITIAL: Self = Self(0);

    /// Create a new `SequenceNr` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The sequence number following this one.
    ///
    /// Saturates at `u64::MAX`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Check whether this is [`SequenceNr::INITIAL`].
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SequenceNr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SequenceNr {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SequenceNr> for u64 {
    fn from(sequence_nr: SequenceNr) -> Self {
        sequence_nr.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod entity_key_tests {
        use super::*;

        #[test]
        fn new_and_as_str() {
            let key = EntityKey::new("100");
            assert_eq!(key.as_str(), "100");
            assert_eq!(key.as_ref(), "100");
        }

        #[test]
        #[allow(clippy::expect_used)] // Panics: Test will fail if parse fails
        fn parse_from_str() {
            let key: EntityKey = "account-7".parse().expect("parse should succeed");
            assert_eq!(key, EntityKey::from("account-7"));
        }

        #[test]
        fn parse_empty_string_fails() {
            assert!("".parse::<EntityKey>().is_err());
        }

        #[test]
        fn display_is_the_raw_key() {
            assert_eq!(EntityKey::new("300").to_string(), "300");
        }

        #[test]
        fn into_inner_returns_string() {
            assert_eq!(EntityKey::from("400".to_string()).into_inner(), "400");
        }

        proptest::proptest! {
            #[test]
            fn any_non_empty_string_parses_to_itself(raw in ".{1,32}") {
                let key: EntityKey = raw.parse().unwrap_or_else(|_| EntityKey::new(""));
                proptest::prop_assert_eq!(key.as_str(), raw.as_str());
            }
        }
    }

    mod sequence_nr_tests {
        use super::*;

        #[test]
        fn initial_is_zero() {
            assert_eq!(SequenceNr::INITIAL, SequenceNr::new(0));
            assert!(SequenceNr::INITIAL.is_initial());
            assert!(!SequenceNr::new(3).is_initial());
        }

        #[test]
        fn next_increments() {
            assert_eq!(SequenceNr::new(4).next(), SequenceNr::new(5));
        }

        #[test]
        fn next_saturates() {
            assert_eq!(SequenceNr::new(u64::MAX).next(), SequenceNr::new(u64::MAX));
        }

        #[test]
        fn ordering_follows_value() {
            assert!(SequenceNr::new(1) < SequenceNr::new(2));
            let raw: u64 = SequenceNr::from(9_u64).into();
            assert_eq!(raw, 9);
        }
    }
}
