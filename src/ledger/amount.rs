//! Fixed-point money.
//!
//! Balances are counted in hundredths and stored as `u64`, so a negative
//! balance is unrepresentable. Text input is parsed from decimal strings
//! with at most two fractional digits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minor units per whole currency unit.
pub const MINOR_PER_UNIT: u64 = 100;

/// Maximum fractional digits accepted from user input.
pub const MAX_FRACTION_DIGITS: usize = 2;

/// Non-negative amount in minor units (hundredths).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_minor(minor: u64) -> Self {
        Amount(minor)
    }

    pub const fn from_units(units: u64) -> Self {
        Amount(units * MINOR_PER_UNIT)
    }

    pub const fn minor(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02}",
            self.0 / MINOR_PER_UNIT,
            self.0 % MINOR_PER_UNIT
        )
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        Amount(iter.map(|a| a.0).fold(0u64, u64::saturating_add))
    }
}

/// Reasons a decimal string is not a valid amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountParseError {
    #[error("not a number")]
    NotNumeric,

    #[error("amount cannot be negative")]
    Negative,

    #[error("maximum 2 decimal places allowed")]
    TooPrecise,

    #[error("amount is too large")]
    Overflow,
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('-') {
            // "-0" is still a sign the user meant something negative
            return Err(AmountParseError::Negative);
        }
        let s = s.strip_prefix('+').unwrap_or(s);

        let (whole, fraction) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(AmountParseError::NotNumeric);
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(AmountParseError::NotNumeric);
        }
        if fraction.len() > MAX_FRACTION_DIGITS {
            return Err(AmountParseError::TooPrecise);
        }

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| AmountParseError::Overflow)?
        };
        let mut minor_fraction: u64 = if fraction.is_empty() {
            0
        } else {
            fraction.parse().map_err(|_| AmountParseError::NotNumeric)?
        };
        for _ in fraction.len()..MAX_FRACTION_DIGITS {
            minor_fraction *= 10;
        }

        whole
            .checked_mul(MINOR_PER_UNIT)
            .and_then(|m| m.checked_add(minor_fraction))
            .map(Amount)
            .ok_or(AmountParseError::Overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_and_fractional() {
        assert_eq!("5".parse::<Amount>(), Ok(Amount::from_minor(500)));
        assert_eq!("5.5".parse::<Amount>(), Ok(Amount::from_minor(550)));
        assert_eq!("5.05".parse::<Amount>(), Ok(Amount::from_minor(505)));
        assert_eq!(".75".parse::<Amount>(), Ok(Amount::from_minor(75)));
        assert_eq!(" 10.00 ".parse::<Amount>(), Ok(Amount::from_units(10)));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!("abc".parse::<Amount>(), Err(AmountParseError::NotNumeric));
        assert_eq!("".parse::<Amount>(), Err(AmountParseError::NotNumeric));
        assert_eq!(".".parse::<Amount>(), Err(AmountParseError::NotNumeric));
        assert_eq!("1e3".parse::<Amount>(), Err(AmountParseError::NotNumeric));
        assert_eq!("-2".parse::<Amount>(), Err(AmountParseError::Negative));
        assert_eq!("1.234".parse::<Amount>(), Err(AmountParseError::TooPrecise));
        assert_eq!(
            "99999999999999999999".parse::<Amount>(),
            Err(AmountParseError::Overflow)
        );
    }

    #[test]
    fn test_display_pads_fraction() {
        assert_eq!(Amount::from_minor(500).to_string(), "5.00");
        assert_eq!(Amount::from_minor(7).to_string(), "0.07");
        assert_eq!(Amount::ZERO.to_string(), "0.00");
    }

    #[test]
    fn test_checked_sub_never_goes_negative() {
        let five = Amount::from_units(5);
        let ten = Amount::from_units(10);
        assert_eq!(five.checked_sub(ten), None);
        assert_eq!(ten.checked_sub(five), Some(five));
        assert_eq!(five.saturating_sub(ten), Amount::ZERO);
    }
}
