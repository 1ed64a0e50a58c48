//! mls-settlement
//!
//! Commission settlement for completed orders and the Sale3 payback path.
//!
//! A sweep ([`run_settlement_sweep`]) settles completed orders one
//! transaction at a time:
//! 1) customer pool (equal split, clipped to each order's customer cap)
//! 2) binary placement (breadth-first append)
//! 3) gratitude cascade (fixed per level, remainder to the house member)
//! 4) unilevel and rank-pool sale commissions (soft cap, Sale3 overflow,
//!    automatic reorder when the cap is reached)
//! 5) rank promotion of the buyer's lineage
//!
//! then flips the order's settled flag and commits. The first failure halts
//! the sweep; nothing of the failing order is written.

mod context;
mod customer_pool;
mod sales;

pub mod payback;
pub mod policy;
pub mod promotion;
pub mod sweep;
pub mod wallet;

pub use context::SettlementContext;
pub use customer_pool::PoolPayout;
pub use payback::{
    manual_payback, pay_back, PaybackOutcome, PaybackRejection, PaybackRequest, PAYMENT_NOTE,
};
pub use policy::{GratitudePolicy, PromotionPolicy, SettlementPolicy};
pub use promotion::{RankChange, RankUpdates};
pub use sweep::{
    run_settlement_sweep, settle_order, SettleFailure, SettleStage, SettledOrder, SweepHalt,
    SweepReport,
};
pub use wallet::DebitOutcome;
