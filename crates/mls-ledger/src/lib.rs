//! mls-ledger
//!
//! Pure settlement arithmetic for the referral network:
//! - fixed-point money at 1e-8 with explicit rounding
//! - ranks, wallet types and per-order commission buckets
//! - cap / soft-cap / overflow splitting of sale credits
//! - binary placement positions, gratitude split, rank ladder
//!
//! No IO, no clock, no storage.

mod caps;
mod money;
mod network;
mod types;

pub use caps::{clip_to_cap, soft_cap, split_sale_credit, SaleSplit};
pub use money::{Money, MoneyError, Rate, BPS_SCALE, MONEY_SCALE};
pub use network::{
    binary_parent_position, eligible_rank, gratitude_split, GratitudeSplit, LadderOutcome,
    RankRule, RANK_LADDER,
};
pub use types::{username_for, Aggregate, CommissionBucket, Rank, UnknownVariant, WalletType};
