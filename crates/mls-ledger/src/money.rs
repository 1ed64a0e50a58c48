//! Fixed-point money type.
//!
//! # Scale
//!
//! All monetary values (order value, payments, commission accumulators,
//! wallet balances) are `i64` at 1e-8 scale: 1 unit = `Money(100_000_000)`.
//! Eight decimals is the rounding contract of every distribution rule, so
//! once a value is a `Money` it is already rounded; the only places rounding
//! happens are [`Money::mul_rate`] and [`Money::split_even`].
//!
//! # Rounding
//!
//! Half away from zero, computed on `i128` intermediates so `value * bps`
//! cannot overflow for any `i64` value. Even splits truncate instead, so the
//! shares of a pool never add up to more than the pool.
//!
//! # Construction
//!
//! There is intentionally no `From<i64>`: use [`Money::new`] for a raw
//! scaled integer, [`Money::from_units`] for whole currency units, or
//! [`Money::parse_decimal`] for operator input.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Raw units per whole currency unit.
pub const MONEY_SCALE: i64 = 100_000_000;

const MONEY_DECIMALS: usize = 8;

/// Basis points in 100%.
pub const BPS_SCALE: u32 = 10_000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Input string was empty after trimming.
    Empty,
    /// Input is not a plain decimal (`123`, `-4.5`, `0.00000001`).
    Invalid { input: String },
    /// More than eight fractional digits.
    TooPrecise { input: String },
    /// Value does not fit the 1e-8 `i64` range.
    Overflow { input: String },
}

impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "money: empty amount"),
            Self::Invalid { input } => write!(f, "money: invalid decimal '{input}'"),
            Self::TooPrecise { input } => {
                write!(f, "money: '{input}' has more than {MONEY_DECIMALS} decimals")
            }
            Self::Overflow { input } => write!(f, "money: '{input}' is out of range"),
        }
    }
}

impl std::error::Error for MoneyError {}

// ---------------------------------------------------------------------------
// Rate
// ---------------------------------------------------------------------------

/// A proportional rate in basis points (1% = 100 bps).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rate(u32);

impl Rate {
    pub const ZERO: Rate = Rate(0);
    pub const FULL: Rate = Rate(BPS_SCALE);

    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        Rate(bps)
    }

    #[inline]
    pub const fn percent(pct: u32) -> Self {
        Rate(pct * 100)
    }

    #[inline]
    pub const fn bps(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / 100;
        let frac = self.0 % 100;
        if frac == 0 {
            write!(f, "{whole}%")
        } else if frac % 10 == 0 {
            write!(f, "{whole}.{}%", frac / 10)
        } else {
            write!(f, "{whole}.{frac:02}%")
        }
    }
}

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// A fixed-point monetary amount at 1e-8 scale.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);
    pub const MAX: Money = Money(i64::MAX);

    /// Construct from a raw 1e-8 scaled integer (e.g. a `BIGINT` column).
    #[inline]
    pub const fn new(raw: i64) -> Self {
        Money(raw)
    }

    /// Construct from whole currency units. Overflows like `i64` multiplication.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Money(units * MONEY_SCALE)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn saturating_add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0))
    }

    /// `self - rhs`, floored at zero. Used for cap headroom.
    #[inline]
    pub fn headroom_below(self, cap: Money) -> Money {
        if cap.0 > self.0 {
            Money(cap.0 - self.0)
        } else {
            Money::ZERO
        }
    }

    /// `self × rate`, rounded half away from zero to 8 decimals.
    /// Saturates at the `i64` bounds.
    pub fn mul_rate(self, rate: Rate) -> Money {
        let num = i128::from(self.0) * i128::from(rate.0);
        Money(saturate(div_round(num, i128::from(BPS_SCALE))))
    }

    /// `self × k` for an integer multiplier (cap coefficients).
    #[inline]
    pub fn checked_mul_int(self, k: i64) -> Option<Money> {
        self.0.checked_mul(k).map(Money)
    }

    /// `self / n`, truncated toward zero so `n` shares never exceed
    /// `self`. `None` when `n == 0`.
    pub fn split_even(self, n: usize) -> Option<Money> {
        if n == 0 {
            return None;
        }
        let den = i128::try_from(n).ok()?;
        Some(Money(saturate(i128::from(self.0) / den)))
    }

    /// Parse a plain decimal string with at most eight fractional digits.
    pub fn parse_decimal(input: &str) -> Result<Money, MoneyError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(MoneyError::Empty);
        }
        let invalid = || MoneyError::Invalid {
            input: s.to_string(),
        };
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        if frac.len() > MONEY_DECIMALS {
            return Err(MoneyError::TooPrecise {
                input: s.to_string(),
            });
        }

        let overflow = || MoneyError::Overflow {
            input: s.to_string(),
        };
        let whole_val: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        let mut frac_val: i64 = 0;
        if !frac.is_empty() {
            frac_val = frac.parse().map_err(|_| invalid())?;
            frac_val *= 10_i64.pow((MONEY_DECIMALS - frac.len()) as u32);
        }
        let raw = whole_val
            .checked_mul(MONEY_SCALE)
            .and_then(|w| w.checked_add(frac_val))
            .ok_or_else(overflow)?;
        Ok(Money(if negative { -raw } else { raw }))
    }
}

fn div_round(num: i128, den: i128) -> i128 {
    let half = den / 2;
    if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    }
}

fn saturate(v: i128) -> i64 {
    i64::try_from(v).unwrap_or(if v < 0 { i64::MIN } else { i64::MAX })
}

// ---------------------------------------------------------------------------
// Arithmetic operators (closed over Money)
// ---------------------------------------------------------------------------

impl Add for Money {
    type Output = Money;
    #[inline]
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    #[inline]
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;
    #[inline]
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

/// Saturates at the `i64` bounds: network-wide totals can exceed what a
/// single order amount can hold.
impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Money::saturating_add)
    }
}

// ---------------------------------------------------------------------------
// Display / serde (decimal string, never a float)
// ---------------------------------------------------------------------------

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / MONEY_SCALE;
        let frac = (self.0 % MONEY_SCALE).abs();
        if self.0 < 0 && whole == 0 {
            write!(f, "-{whole}.{frac:08}")
        } else {
            write!(f, "{whole}.{frac:08}")
        }
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Money::parse_decimal(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_units_scales_by_1e8() {
        assert_eq!(Money::from_units(3).raw(), 300_000_000);
    }

    #[test]
    fn mul_rate_fifteen_percent() {
        let v = Money::from_units(1_000_000);
        assert_eq!(v.mul_rate(Rate::percent(15)), Money::from_units(150_000));
    }

    #[test]
    fn mul_rate_rounds_half_away_from_zero() {
        // 0.00000005 * 10% = 0.000000005 -> rounds to 0.00000001
        assert_eq!(Money::new(5).mul_rate(Rate::percent(10)), Money::new(1));
        assert_eq!(Money::new(-5).mul_rate(Rate::percent(10)), Money::new(-1));
        // 0.00000004 * 10% = 0.000000004 -> rounds to 0
        assert_eq!(Money::new(4).mul_rate(Rate::percent(10)), Money::ZERO);
    }

    #[test]
    fn mul_rate_does_not_overflow_on_large_values() {
        let big = Money::new(i64::MAX / 2);
        assert_eq!(big.mul_rate(Rate::FULL), big);
    }

    #[test]
    fn split_even_truncates_to_eight_decimals() {
        // 150000 / 7 = 21428.571428571428... -> 21428.57142857
        let share = Money::from_units(150_000).split_even(7).unwrap();
        assert_eq!(share, Money::new(2_142_857_142_857));
        assert_eq!(Money::from_units(1).split_even(0), None);
    }

    #[test]
    fn split_even_shares_never_exceed_the_pool() {
        // 150000 / 9 = 16666.6666666666... rounding up would overpay by 3e-8.
        let pool = Money::from_units(150_000);
        let share = pool.split_even(9).unwrap();
        assert_eq!(share, Money::new(1_666_666_666_666));
        let total: Money = std::iter::repeat(share).take(9).sum();
        assert!(total <= pool);
        assert_eq!(pool - total, Money::new(6));
    }

    #[test]
    fn sum_saturates_instead_of_overflowing() {
        let big = Money::from_units(1_000_000_000);
        let total: Money = std::iter::repeat(big).take(93).sum();
        assert_eq!(total, Money::new(i64::MAX));
    }

    #[test]
    fn headroom_floors_at_zero() {
        let cap = Money::from_units(10);
        assert_eq!(Money::from_units(4).headroom_below(cap), Money::from_units(6));
        assert_eq!(Money::from_units(12).headroom_below(cap), Money::ZERO);
    }

    #[test]
    fn parse_decimal_accepts_plain_forms() {
        assert_eq!(Money::parse_decimal("12").unwrap(), Money::from_units(12));
        assert_eq!(Money::parse_decimal("0.5").unwrap(), Money::new(50_000_000));
        assert_eq!(Money::parse_decimal(".00000001").unwrap(), Money::new(1));
        assert_eq!(Money::parse_decimal("-2.25").unwrap(), Money::new(-225_000_000));
        assert_eq!(Money::parse_decimal(" 7. ").unwrap(), Money::from_units(7));
    }

    #[test]
    fn parse_decimal_rejects_garbage() {
        assert_eq!(Money::parse_decimal("  "), Err(MoneyError::Empty));
        assert!(matches!(
            Money::parse_decimal("1e5"),
            Err(MoneyError::Invalid { .. })
        ));
        assert!(matches!(
            Money::parse_decimal("."),
            Err(MoneyError::Invalid { .. })
        ));
        assert!(matches!(
            Money::parse_decimal("0.000000001"),
            Err(MoneyError::TooPrecise { .. })
        ));
        assert!(matches!(
            Money::parse_decimal("999999999999999"),
            Err(MoneyError::Overflow { .. })
        ));
    }

    #[test]
    fn display_formats_with_eight_decimal_places() {
        assert_eq!(Money::new(150_000_000).to_string(), "1.50000000");
        assert_eq!(Money::new(-25_000_000).to_string(), "-0.25000000");
    }

    #[test]
    fn serde_uses_decimal_strings() {
        let m = Money::parse_decimal("11500").unwrap();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "\"11500.00000000\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn rate_display() {
        assert_eq!(Rate::percent(15).to_string(), "15%");
        assert_eq!(Rate::from_bps(9_050).to_string(), "90.5%");
        assert_eq!(Rate::from_bps(1).to_string(), "0.01%");
    }
}
