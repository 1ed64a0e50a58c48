//! Tree arithmetic: binary placement positions, gratitude pool split and the
//! rank ladder. Traversal itself lives with the store; this module only
//! answers "given these counts, what is the outcome".

use crate::money::Money;
use crate::types::Rank;

// ---------------------------------------------------------------------------
// Binary placement
// ---------------------------------------------------------------------------

/// 1-indexed position of the parent for a new placement, given how many
/// placements already exist. `None` means the new placement is the root.
///
/// Placement `n` has parent `n / 2`; the new placement is `existing + 1`.
pub fn binary_parent_position(existing: u64) -> Option<u64> {
    if existing == 0 {
        None
    } else {
        Some((existing + 1) / 2)
    }
}

// ---------------------------------------------------------------------------
// Gratitude
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GratitudeSplit {
    pub per_level: Money,
    /// `per_level × visited`.
    pub paid_out: Money,
    /// What the house wallet receives.
    pub remainder: Money,
}

/// Split a fixed gratitude `pool` across `visited` ancestors out of a
/// ceiling of `max_levels`. `visited` is clamped to `max_levels`.
pub fn gratitude_split(pool: Money, max_levels: u32, visited: u32) -> GratitudeSplit {
    let per_level = pool.split_even(max_levels as usize).unwrap_or(Money::ZERO);
    let visited = visited.min(max_levels);
    let paid_out = per_level
        .checked_mul_int(i64::from(visited))
        .unwrap_or(pool)
        .min(pool);
    GratitudeSplit {
        per_level,
        paid_out,
        remainder: paid_out.headroom_below(pool),
    }
}

// ---------------------------------------------------------------------------
// Rank ladder
// ---------------------------------------------------------------------------

/// A ladder rung: `target` needs enough children whose best subtree rank is
/// at least `min_child_rank`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankRule {
    pub target: Rank,
    pub min_child_rank: Rank,
}

/// Highest rung first.
pub const RANK_LADDER: [RankRule; 5] = [
    RankRule {
        target: Rank::V5,
        min_child_rank: Rank::V4,
    },
    RankRule {
        target: Rank::V4,
        min_child_rank: Rank::V3,
    },
    RankRule {
        target: Rank::V3,
        min_child_rank: Rank::V2,
    },
    RankRule {
        target: Rank::V2,
        min_child_rank: Rank::V1,
    },
    RankRule {
        target: Rank::V1,
        min_child_rank: Rank::V,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LadderOutcome {
    pub target: Rank,
    pub qualifying_children: usize,
}

/// Highest rung for which at least `min_children` entries of `child_best`
/// qualify. `child_best` holds the best subtree rank of each direct child.
pub fn eligible_rank(child_best: &[Rank], min_children: usize) -> Option<LadderOutcome> {
    RANK_LADDER.iter().find_map(|rule| {
        let qualifying = child_best
            .iter()
            .filter(|r| **r >= rule.min_child_rank)
            .count();
        (qualifying >= min_children.max(1)).then_some(LadderOutcome {
            target: rule.target,
            qualifying_children: qualifying,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_positions_fill_breadth_first() {
        assert_eq!(binary_parent_position(0), None);
        // positions 2,3 -> 1; 4,5 -> 2; 6,7 -> 3
        let parents: Vec<u64> = (1..=6).filter_map(binary_parent_position).collect();
        assert_eq!(parents, vec![1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn gratitude_defaults_pay_11500_per_level() {
        let pool = Money::from_units(241_500);
        let s = gratitude_split(pool, 21, 3);
        assert_eq!(s.per_level, Money::from_units(11_500));
        assert_eq!(s.paid_out, Money::from_units(34_500));
        assert_eq!(s.remainder, Money::from_units(207_000));
    }

    #[test]
    fn gratitude_full_depth_leaves_nothing() {
        let pool = Money::from_units(241_500);
        let s = gratitude_split(pool, 21, 30);
        assert_eq!(s.paid_out, pool);
        assert_eq!(s.remainder, Money::ZERO);
    }

    #[test]
    fn ladder_picks_highest_rung() {
        let kids = [Rank::V3, Rank::V4, Rank::V3, Rank::None];
        let out = eligible_rank(&kids, 3).unwrap();
        assert_eq!(out.target, Rank::V4);
        assert_eq!(out.qualifying_children, 3);
    }

    #[test]
    fn ladder_entry_rung_needs_v_children() {
        let kids = [Rank::V, Rank::V, Rank::None, Rank::V];
        assert_eq!(eligible_rank(&kids, 3).unwrap().target, Rank::V1);
        let kids = [Rank::V, Rank::None, Rank::None];
        assert_eq!(eligible_rank(&kids, 3), None);
    }
}
