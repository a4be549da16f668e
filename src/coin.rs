//! Exact fixed-point price/quantity arithmetic.
//!
//! All prices and quantities in the engine are `Coin` values. NEVER use f64
//! for financial math: comparisons in the order lifecycle (stray matching,
//! ticker fill inference, slippage walks) must be exact.
//!
//! A `Coin` is a `rust_decimal::Decimal` normalized to 8 decimal places. The
//! canonical string form always carries exactly 8 fraction digits
//! (`"0.00100000"`), which the anti-typo precision check in order validation
//! relies on.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{Error, Result};

/// Number of fraction digits carried by every `Coin`.
pub const COIN_SCALE: u32 = 8;

/// One satoshi: the smallest representable price/quantity step.
pub const SATOSHI: Coin = Coin(dec!(0.00000001));

/// One whole coin.
pub const COIN: Coin = Coin(dec!(1));

/// Sentinel larger than any sane price; used as an initial minimum.
pub const A_LOT: Coin = Coin(dec!(100000000000));

/// Fixed-point amount with exact equality and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Coin(Decimal);

impl Coin {
    /// Zero.
    pub const ZERO: Coin = Coin(Decimal::ZERO);

    /// Parse a decimal string, truncating anything beyond 8 places.
    ///
    /// Returns `Coin::ZERO` on unparseable input, matching the permissive
    /// construction the engine expects; strict rejection happens at the
    /// validation layer via the canonical-form length check.
    pub fn parse(s: &str) -> Coin {
        match Decimal::from_str(s.trim()) {
            Ok(d) => Coin(d.round_dp_with_strategy(COIN_SCALE, RoundingStrategy::ToZero)),
            Err(_) => Coin::ZERO,
        }
    }

    /// Strict parse for config and saved-index files.
    pub fn try_parse(s: &str) -> Result<Coin> {
        Decimal::from_str(s.trim())
            .map(|d| Coin(d.round_dp_with_strategy(COIN_SCALE, RoundingStrategy::ToZero)))
            .map_err(|e| Error::parse(format!("bad coin amount {s:?}: {e}")))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_zero_or_less(&self) -> bool {
        self.0 <= Decimal::ZERO
    }

    pub fn is_greater_than_zero(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Multiply by a ratio, rounding half-away-from-zero to 8 places.
    pub fn ratio(&self, r: f64) -> Coin {
        let factor = Decimal::from_f64(r).unwrap_or_default();
        Coin(
            (self.0 * factor)
                .round_dp_with_strategy(COIN_SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Truncate down to a multiple of `ticksize`. A non-positive ticksize
    /// leaves the value unchanged.
    pub fn truncated_by_ticksize(&self, ticksize: Coin) -> Coin {
        if ticksize.is_zero_or_less() {
            return *self;
        }
        let steps = (self.0 / ticksize.0).trunc();
        Coin((steps * ticksize.0).round_dp_with_strategy(COIN_SCALE, RoundingStrategy::ToZero))
    }

    /// Absolute value.
    pub fn abs(&self) -> Coin {
        Coin(self.0.abs())
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = self.0;
        d.rescale(COIN_SCALE);
        write!(f, "{d}")
    }
}

impl FromStr for Coin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Coin> {
        Coin::try_parse(s)
    }
}

impl From<u32> for Coin {
    fn from(v: u32) -> Coin {
        Coin(Decimal::from(v))
    }
}

impl Add for Coin {
    type Output = Coin;
    fn add(self, rhs: Coin) -> Coin {
        Coin(self.0 + rhs.0)
    }
}

impl AddAssign for Coin {
    fn add_assign(&mut self, rhs: Coin) {
        self.0 += rhs.0;
    }
}

impl Sub for Coin {
    type Output = Coin;
    fn sub(self, rhs: Coin) -> Coin {
        Coin(self.0 - rhs.0)
    }
}

impl SubAssign for Coin {
    fn sub_assign(&mut self, rhs: Coin) {
        self.0 -= rhs.0;
    }
}

impl Mul for Coin {
    type Output = Coin;
    fn mul(self, rhs: Coin) -> Coin {
        Coin((self.0 * rhs.0).round_dp_with_strategy(COIN_SCALE, RoundingStrategy::ToZero))
    }
}

impl Div for Coin {
    type Output = Coin;
    fn div(self, rhs: Coin) -> Coin {
        if rhs.0.is_zero() {
            return Coin::ZERO;
        }
        Coin((self.0 / rhs.0).round_dp_with_strategy(COIN_SCALE, RoundingStrategy::ToZero))
    }
}

impl Neg for Coin {
    type Output = Coin;
    fn neg(self) -> Coin {
        Coin(-self.0)
    }
}

impl Sum for Coin {
    fn sum<I: Iterator<Item = Coin>>(iter: I) -> Coin {
        iter.fold(Coin::ZERO, |acc, c| acc + c)
    }
}

impl Serialize for Coin {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Coin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Coin, D::Error> {
        let s = String::deserialize(deserializer)?;
        Coin::try_parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_has_eight_places() {
        assert_eq!(Coin::parse("0.001").to_string(), "0.00100000");
        assert_eq!(Coin::parse("1").to_string(), "1.00000000");
        assert_eq!(Coin::parse("123.45678901").to_string(), "123.45678901");
    }

    #[test]
    fn parse_truncates_excess_precision() {
        // 10 decimals in, 8 out
        assert_eq!(Coin::parse("0.0000000199"), Coin::parse("0.00000001"));
    }

    #[test]
    fn exact_equality_ignores_scale() {
        assert_eq!(Coin::parse("1.0"), Coin::parse("1.00000000"));
        assert!(Coin::parse("0.00000002") > Coin::parse("0.00000001"));
    }

    #[test]
    fn ratio_rounds_half_away_from_zero() {
        let c = Coin::parse("100");
        assert_eq!(c.ratio(0.9), Coin::parse("90"));
        assert_eq!(Coin::parse("0.00000001").ratio(1.5), Coin::parse("0.00000002"));
    }

    #[test]
    fn ticksize_truncation() {
        let tick = Coin::parse("0.05");
        assert_eq!(Coin::parse("1.23").truncated_by_ticksize(tick), Coin::parse("1.20"));
        assert_eq!(Coin::parse("1.20").truncated_by_ticksize(tick), Coin::parse("1.20"));
        // zero ticksize is a no-op
        assert_eq!(Coin::parse("1.23").truncated_by_ticksize(Coin::ZERO), Coin::parse("1.23"));
    }

    #[test]
    fn division_truncates() {
        // 1 / 3 = 0.33333333 (truncated, not rounded up)
        assert_eq!(COIN / Coin::parse("3"), Coin::parse("0.33333333"));
    }

    #[test]
    fn string_round_trip() {
        let c = Coin::parse("42.00000123");
        assert_eq!(Coin::parse(&c.to_string()), c);
    }

    #[test]
    fn satoshi_and_a_lot_ordering() {
        assert!(SATOSHI.is_greater_than_zero());
        assert!(A_LOT > Coin::parse("99999999999"));
    }
}
