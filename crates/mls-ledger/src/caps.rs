//! Cap and overflow arithmetic for per-order commission accumulators.
//!
//! Every function here works on already-rounded [`Money`] values, so a
//! clipped amount added to its accumulator can never land above the cap.

use crate::money::{Money, Rate};

/// Clip `amount` to the headroom left between `current` and `cap`.
#[inline]
pub fn clip_to_cap(amount: Money, current: Money, cap: Money) -> Money {
    if !amount.is_positive() {
        return Money::ZERO;
    }
    amount.min(current.headroom_below(cap))
}

/// The soft boundary applied to rank holders (`max × rate`).
#[inline]
pub fn soft_cap(max: Money, rate: Rate) -> Money {
    max.mul_rate(rate)
}

/// How a sale-tier credit lands on the beneficiary's order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleSplit {
    /// Credited to the rule's own tier (Sale1 or Sale2).
    pub primary: Money,
    /// Redirected to Sale3 as combo conversion.
    pub overflow: Money,
    /// Lost because the hard cap was already reached.
    pub dropped: Money,
}

impl SaleSplit {
    /// Aggregate sale accumulator after both parts are applied.
    pub fn sale_after(&self, sale: Money) -> Money {
        sale + self.primary + self.overflow
    }

    /// True when the overflow part brings the aggregate to exactly `max`.
    pub fn reaches_cap(&self, sale: Money, max: Money) -> bool {
        self.overflow.is_positive() && self.sale_after(sale) == max
    }
}

/// Split `amount` against an order whose aggregate sale accumulator is
/// `sale` out of `max`. `soft` is the rank holder's boundary; `None` for
/// members without a qualifying rank.
pub fn split_sale_credit(amount: Money, sale: Money, max: Money, soft: Option<Money>) -> SaleSplit {
    let amount = if amount.is_positive() {
        amount
    } else {
        Money::ZERO
    };
    let hard_room = sale.headroom_below(max);

    if hard_room.is_zero() {
        return SaleSplit {
            primary: Money::ZERO,
            overflow: Money::ZERO,
            dropped: amount,
        };
    }

    let (primary, overflow) = match soft {
        None => (amount.min(hard_room), Money::ZERO),
        Some(soft) if sale >= soft => (Money::ZERO, amount.min(hard_room)),
        Some(soft) => {
            let primary = amount.min(sale.headroom_below(soft));
            let overflow = (amount - primary).min(hard_room - primary);
            (primary, overflow)
        }
    };

    SaleSplit {
        primary,
        overflow,
        dropped: amount - primary - overflow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(units: i64) -> Money {
        Money::from_units(units)
    }

    #[test]
    fn clip_respects_headroom() {
        assert_eq!(clip_to_cap(m(50), m(0), m(100)), m(50));
        assert_eq!(clip_to_cap(m(50), m(80), m(100)), m(20));
        assert_eq!(clip_to_cap(m(50), m(100), m(100)), Money::ZERO);
        assert_eq!(clip_to_cap(m(-5), m(0), m(100)), Money::ZERO);
    }

    #[test]
    fn unranked_member_fills_to_hard_cap() {
        let s = split_sale_credit(m(40_000), m(9_980_000), m(10_000_000), None);
        assert_eq!(s.primary, m(20_000));
        assert_eq!(s.overflow, Money::ZERO);
        assert_eq!(s.dropped, m(20_000));
    }

    #[test]
    fn ranked_member_above_soft_cap_overflows_entirely() {
        let max = m(10_000_000);
        let soft = soft_cap(max, Rate::percent(90));
        let s = split_sale_credit(m(40_000), m(9_500_000), max, Some(soft));
        assert_eq!(s.primary, Money::ZERO);
        assert_eq!(s.overflow, m(40_000));
        assert_eq!(s.dropped, Money::ZERO);
        assert!(!s.reaches_cap(m(9_500_000), max));
    }

    #[test]
    fn ranked_member_straddling_soft_cap_splits() {
        let max = m(10_000_000);
        let soft = soft_cap(max, Rate::percent(90));
        let s = split_sale_credit(m(40_000), m(8_980_000), max, Some(soft));
        assert_eq!(s.primary, m(20_000));
        assert_eq!(s.overflow, m(20_000));
        assert_eq!(s.dropped, Money::ZERO);
    }

    #[test]
    fn overflow_reaching_hard_cap_exactly_is_flagged() {
        let max = m(10_000_000);
        let soft = soft_cap(max, Rate::percent(90));
        let sale = m(9_990_000);
        let s = split_sale_credit(m(40_000), sale, max, Some(soft));
        assert_eq!(s.overflow, m(10_000));
        assert_eq!(s.dropped, m(30_000));
        assert!(s.reaches_cap(sale, max));
    }

    #[test]
    fn capped_order_drops_everything() {
        let max = m(100);
        let s = split_sale_credit(m(7), max, max, Some(m(90)));
        assert_eq!(s.dropped, m(7));
        assert_eq!(s.primary + s.overflow, Money::ZERO);
    }
}
