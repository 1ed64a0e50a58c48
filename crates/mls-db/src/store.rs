//! Ledger Store contract.
//!
//! Everything the settlement engine reads or writes goes through
//! [`LedgerTx`], one transaction per unit of work. Mutations that can race
//! are single-statement conditional updates: a guard that fails returns
//! `Ok(None)` (business signal) or `Err` (broken invariant), as documented
//! per method. Implementations: [`crate::PgStore`] for Postgres and the
//! in-memory store in `mls-testkit`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use mls_ledger::{CommissionBucket, Money, Rank, WalletType};

use crate::rows::{
    MemberRow, NewOrder, NewOrderDetail, NewOrderPay, NewWalletDetail, OrderRow, PlacementRow,
    ProductRow, WalletRow,
};

#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx;

    /// Open a READ COMMITTED (or stronger) transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Completed, unsettled orders ordered by `completed_at`, then `id`.
    async fn list_sweep_candidates(&self) -> Result<Vec<i64>>;
}

#[async_trait::async_trait]
pub trait LedgerTx: Send {
    async fn commit(self) -> Result<()>;
    async fn rollback(self) -> Result<()>;

    // --- member directory -------------------------------------------------

    async fn fetch_member(&mut self, member_id: i64) -> Result<Option<MemberRow>>;
    async fn fetch_member_by_username(&mut self, username: &str) -> Result<Option<MemberRow>>;
    /// Rows for the given ids, ordered by id. Unknown ids are skipped.
    async fn fetch_members(&mut self, ids: &[i64]) -> Result<Vec<MemberRow>>;
    /// Direct referral children, ordered by id.
    async fn list_children(&mut self, parent_id: i64) -> Result<Vec<MemberRow>>;
    /// Members whose rank is `>= rank`, ordered by id.
    async fn list_members_with_rank_at_least(&mut self, rank: Rank) -> Result<Vec<MemberRow>>;
    async fn update_member_rank(&mut self, member_id: i64, rank: Rank) -> Result<()>;

    /// Every member reachable from `root` through the referral-parent edge,
    /// `root` included, ordered by id. Terminates on cyclic data.
    async fn descendant_ids(&mut self, root: i64) -> Result<Vec<i64>>;

    // --- order directory --------------------------------------------------

    async fn fetch_order(&mut self, order_id: i64) -> Result<Option<OrderRow>>;
    /// Settled orders whose customer accumulator is below its cap, by id.
    async fn list_customer_pool_orders(&mut self) -> Result<Vec<OrderRow>>;
    /// Most recent completed order of a member (by `created_at`, then `id`).
    /// With `settled_only`, unsettled orders are ignored.
    async fn latest_order_for_member(
        &mut self,
        member_id: i64,
        settled_only: bool,
    ) -> Result<Option<OrderRow>>;
    /// Most recent open (`completed_at` null, `pending > 0`) order for a
    /// (member, product) pair.
    async fn find_open_order(&mut self, member_id: i64, product_id: i64)
        -> Result<Option<OrderRow>>;
    async fn insert_order(&mut self, order: &NewOrder) -> Result<OrderRow>;

    /// Add `amount` to a bucket and its aggregate. The cap guard runs inside
    /// the statement; a rejected guard is `Err` because callers clip first.
    async fn apply_commission(
        &mut self,
        order_id: i64,
        bucket: CommissionBucket,
        amount: Money,
    ) -> Result<OrderRow>;
    /// Set `commission_sale_max`. Fails if it would drop below `commission_sale`.
    async fn set_order_sale_cap(&mut self, order_id: i64, sale_max: Money) -> Result<OrderRow>;

    /// `paid += amount, pending -= amount` guarded by `paid <= value` and
    /// `pending >= 0` on an open order. `None` when the guard rejects.
    async fn apply_payment_guarded(
        &mut self,
        order_id: i64,
        amount: Money,
    ) -> Result<Option<OrderRow>>;
    /// Stamp `completed_at` and both caps on a fully paid, open order.
    async fn complete_order(
        &mut self,
        order_id: i64,
        at: DateTime<Utc>,
        customer_max: Money,
        sale_max: Money,
    ) -> Result<OrderRow>;
    /// Flip `settled`. Fails unless the order is completed and unsettled.
    async fn mark_settled(&mut self, order_id: i64) -> Result<()>;

    /// Sum of `paid` over the members' orders. With a ceiling, only orders
    /// completed at or before it count.
    async fn sum_paid(
        &mut self,
        member_ids: &[i64],
        completed_at_or_before: Option<DateTime<Utc>>,
    ) -> Result<Money>;

    // --- append-only records ---------------------------------------------

    async fn insert_order_detail(&mut self, detail: &NewOrderDetail) -> Result<()>;
    async fn insert_order_pay(&mut self, pay: &NewOrderPay) -> Result<()>;
    async fn insert_wallet_detail(&mut self, detail: &NewWalletDetail) -> Result<()>;

    // --- wallets ----------------------------------------------------------

    async fn fetch_wallet(
        &mut self,
        member_id: i64,
        wallet_type: WalletType,
    ) -> Result<Option<WalletRow>>;
    async fn list_wallets(&mut self, member_id: i64) -> Result<Vec<WalletRow>>;
    /// Insert-or-increment `available` and `total` by `amount`.
    async fn upsert_wallet_credit(
        &mut self,
        member_id: i64,
        wallet_type: WalletType,
        amount: Money,
    ) -> Result<WalletRow>;
    /// Decrement `available` only if it covers `amount`. `None` otherwise.
    async fn debit_wallet_guarded(
        &mut self,
        member_id: i64,
        wallet_type: WalletType,
        amount: Money,
    ) -> Result<Option<WalletRow>>;

    // --- binary tree ------------------------------------------------------

    async fn count_binary_placements(&mut self) -> Result<u64>;
    /// Placement at 1-indexed `position` in id order.
    async fn binary_placement_at(&mut self, position: u64) -> Result<Option<PlacementRow>>;
    async fn insert_binary_placement(
        &mut self,
        order_id: i64,
        member_id: i64,
        parent_id: Option<i64>,
    ) -> Result<PlacementRow>;

    // --- product catalog --------------------------------------------------

    async fn fetch_product(&mut self, product_id: i64) -> Result<Option<ProductRow>>;
}
