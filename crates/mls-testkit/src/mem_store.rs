//! In-memory [`LedgerStore`] for scenario tests.
//!
//! A transaction works on a private snapshot of the whole state; commit
//! swaps it in, rollback (or drop) discards it. Every guard the Postgres
//! statements carry is enforced here with the same outcome (`Err` vs
//! `Ok(None)`), so engine behaviour under test matches production.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use mls_db::{
    LedgerStore, LedgerTx, MemberRow, NewOrder, NewOrderDetail, NewOrderPay, NewWalletDetail,
    OrderRow, PlacementRow, ProductRow, WalletDetailRow, WalletRow,
};
use mls_ledger::{username_for, Aggregate, CommissionBucket, Money, Rank, WalletType};

/// Customer / sale cap multipliers stamped on fixture orders.
pub const FIXTURE_CUSTOMER_CAP_MULTIPLIER: i64 = 2;
pub const FIXTURE_SALE_CAP_MULTIPLIER: i64 = 10;

#[derive(Debug, Clone, Default)]
struct MemState {
    version: u64,
    writes: u64,

    members: BTreeMap<i64, MemberRow>,
    products: BTreeMap<i64, ProductRow>,
    orders: BTreeMap<i64, OrderRow>,
    placements: Vec<PlacementRow>,
    wallets: Vec<WalletRow>,
    wallet_details: Vec<WalletDetailRow>,
    order_details: Vec<NewOrderDetail>,
    order_pays: Vec<NewOrderPay>,

    next_order_id: i64,
    next_placement_id: i64,
    next_wallet_id: i64,
    next_wallet_detail_id: i64,

    fail_mark_settled: BTreeSet<i64>,
}

impl MemState {
    fn order_mut(&mut self, order_id: i64) -> Result<&mut OrderRow> {
        self.orders
            .get_mut(&order_id)
            .ok_or_else(|| anyhow!("order {order_id} not found"))
    }

    fn wallet_pos(&self, member_id: i64, wallet_type: WalletType) -> Option<usize> {
        self.wallets
            .iter()
            .position(|w| w.member_id == member_id && w.wallet_type == wallet_type)
    }

    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

/// Shared in-memory ledger. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
}

pub struct MemTx {
    shared: Arc<Mutex<MemState>>,
    base_version: u64,
    work: MemState,
}

fn lock(state: &Mutex<MemState>) -> MutexGuard<'_, MemState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fixture_order(
    id: i64,
    member_id: i64,
    product_id: i64,
    value: Money,
    paid: Money,
    created_at: DateTime<Utc>,
) -> OrderRow {
    OrderRow {
        id,
        member_id,
        product_id,
        value,
        paid,
        pending: value - paid,
        settled: false,
        created_at,
        completed_at: None,
        commission_customer: Money::ZERO,
        commission_customer_max: Money::ZERO,
        commission_customer_share: Money::ZERO,
        commission_customer_gratitude: Money::ZERO,
        commission_sale: Money::ZERO,
        commission_sale_max: Money::ZERO,
        commission_sale1: Money::ZERO,
        commission_sale2: Money::ZERO,
        commission_sale3: Money::ZERO,
    }
}

// ---------------------------------------------------------------------------
// Fixtures and inspection
// ---------------------------------------------------------------------------

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemState) -> R) -> R {
        let mut s = lock(&self.state);
        s.version += 1;
        f(&mut s)
    }

    fn read<R>(&self, f: impl FnOnce(&MemState) -> R) -> R {
        f(&lock(&self.state))
    }

    pub fn add_member(&self, id: i64, parent_id: Option<i64>, rank: Rank) {
        self.with(|s| {
            s.members.insert(
                id,
                MemberRow {
                    id,
                    parent_id,
                    username: username_for(id),
                    rank,
                },
            );
        });
    }

    pub fn set_rank(&self, member_id: i64, rank: Rank) {
        self.with(|s| {
            if let Some(m) = s.members.get_mut(&member_id) {
                m.rank = rank;
            }
        });
    }

    /// Re-point a member's referral parent (used to build cyclic data).
    pub fn set_parent(&self, member_id: i64, parent_id: Option<i64>) {
        self.with(|s| {
            if let Some(m) = s.members.get_mut(&member_id) {
                m.parent_id = parent_id;
            }
        });
    }

    pub fn add_product(&self, id: i64, name: &str, price: Money) {
        self.with(|s| {
            s.products.insert(
                id,
                ProductRow {
                    id,
                    name: name.to_string(),
                    price,
                },
            );
        });
    }

    /// A fully paid, unsettled order: a sweep candidate. Caps are 2x / 10x the value.
    pub fn add_completed_order(
        &self,
        member_id: i64,
        product_id: i64,
        value: Money,
        completed_at: DateTime<Utc>,
    ) -> i64 {
        self.with(|s| {
            let id = MemState::next_id(&mut s.next_order_id);
            let mut o = fixture_order(id, member_id, product_id, value, value, completed_at);
            o.completed_at = Some(completed_at);
            o.commission_customer_max = Money::new(value.raw() * FIXTURE_CUSTOMER_CAP_MULTIPLIER);
            o.commission_sale_max = Money::new(value.raw() * FIXTURE_SALE_CAP_MULTIPLIER);
            s.orders.insert(id, o);
            id
        })
    }

    /// A completed order that an earlier sweep already settled.
    pub fn add_settled_order(
        &self,
        member_id: i64,
        product_id: i64,
        value: Money,
        completed_at: DateTime<Utc>,
    ) -> i64 {
        let id = self.add_completed_order(member_id, product_id, value, completed_at);
        self.edit_order(id, |o| o.settled = true);
        id
    }

    /// A partially paid order awaiting paybacks.
    pub fn add_open_order(
        &self,
        member_id: i64,
        product_id: i64,
        value: Money,
        paid: Money,
        created_at: DateTime<Utc>,
    ) -> i64 {
        self.with(|s| {
            let id = MemState::next_id(&mut s.next_order_id);
            s.orders.insert(
                id,
                fixture_order(id, member_id, product_id, value, paid, created_at),
            );
            id
        })
    }

    /// Direct edit of an order row, for setting up accumulators and caps.
    pub fn edit_order(&self, order_id: i64, f: impl FnOnce(&mut OrderRow)) {
        self.with(|s| {
            if let Some(o) = s.orders.get_mut(&order_id) {
                f(o);
            }
        });
    }

    /// Seed a wallet balance with a matching detail row.
    pub fn credit_wallet(&self, member_id: i64, wallet_type: WalletType, amount: Money) {
        self.with(|s| {
            let wallet_id = match s.wallet_pos(member_id, wallet_type) {
                Some(i) => {
                    let w = &mut s.wallets[i];
                    w.available += amount;
                    w.total += amount;
                    w.id
                }
                None => {
                    let id = MemState::next_id(&mut s.next_wallet_id);
                    s.wallets.push(WalletRow {
                        id,
                        member_id,
                        wallet_type,
                        available: amount,
                        total: amount,
                    });
                    id
                }
            };
            let id = MemState::next_id(&mut s.next_wallet_detail_id);
            s.wallet_details.push(WalletDetailRow {
                id,
                wallet_id,
                value: amount,
                note: "Opening balance".to_string(),
                created_at: DateTime::<Utc>::default(),
            });
        });
    }

    /// Make `mark_settled` fail for this order until cleared.
    pub fn fail_mark_settled_for(&self, order_id: i64) {
        self.with(|s| {
            s.fail_mark_settled.insert(order_id);
        });
    }

    pub fn clear_faults(&self) {
        self.with(|s| s.fail_mark_settled.clear());
    }

    pub fn member(&self, id: i64) -> Option<MemberRow> {
        self.read(|s| s.members.get(&id).cloned())
    }

    pub fn order(&self, id: i64) -> Option<OrderRow> {
        self.read(|s| s.orders.get(&id).cloned())
    }

    pub fn orders(&self) -> Vec<OrderRow> {
        self.read(|s| s.orders.values().cloned().collect())
    }

    pub fn wallet(&self, member_id: i64, wallet_type: WalletType) -> Option<WalletRow> {
        self.read(|s| s.wallet_pos(member_id, wallet_type).map(|i| s.wallets[i].clone()))
    }

    /// Available balance, zero for a wallet that does not exist.
    pub fn available(&self, member_id: i64, wallet_type: WalletType) -> Money {
        self.wallet(member_id, wallet_type)
            .map(|w| w.available)
            .unwrap_or(Money::ZERO)
    }

    pub fn wallets(&self) -> Vec<WalletRow> {
        self.read(|s| s.wallets.clone())
    }

    pub fn wallet_details(&self) -> Vec<WalletDetailRow> {
        self.read(|s| s.wallet_details.clone())
    }

    pub fn order_details(&self) -> Vec<NewOrderDetail> {
        self.read(|s| s.order_details.clone())
    }

    pub fn order_pays(&self) -> Vec<NewOrderPay> {
        self.read(|s| s.order_pays.clone())
    }

    pub fn placements(&self) -> Vec<PlacementRow> {
        self.read(|s| s.placements.clone())
    }

    /// Committed mutations so far. Fixtures do not count.
    pub fn write_count(&self) -> u64 {
        self.read(|s| s.writes)
    }

    /// Ledger-wide invariants: accumulators within caps, aggregates equal to
    /// their buckets, wallet balances equal to their detail sums.
    pub fn check_invariants(&self) -> Result<()> {
        self.read(|s| {
            for o in s.orders.values() {
                if o.pending != o.value - o.paid {
                    bail!("order {}: pending != value - paid", o.id);
                }
                if o.commission_customer != o.commission_customer_share {
                    bail!("order {}: customer aggregate != share bucket", o.id);
                }
                if o.commission_sale != o.commission_sale1 + o.commission_sale2 + o.commission_sale3
                {
                    bail!("order {}: sale aggregate != sale1 + sale2 + sale3", o.id);
                }
                if o.commission_customer > o.commission_customer_max {
                    bail!("order {}: customer accumulator above cap", o.id);
                }
                if o.commission_sale > o.commission_sale_max {
                    bail!("order {}: sale accumulator above cap", o.id);
                }
            }
            for w in &s.wallets {
                let details = s.wallet_details.iter().filter(|d| d.wallet_id == w.id);
                let (mut sum, mut credits) = (Money::ZERO, Money::ZERO);
                for d in details {
                    sum += d.value;
                    if d.value.is_positive() {
                        credits += d.value;
                    }
                }
                if w.available.is_negative() {
                    bail!("wallet {}: negative available", w.id);
                }
                if w.available != sum {
                    bail!("wallet {}: available {} != detail sum {sum}", w.id, w.available);
                }
                if w.total != credits {
                    bail!("wallet {}: total {} != credited {credits}", w.id, w.total);
                }
            }
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// LedgerStore / LedgerTx
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl LedgerStore for MemStore {
    type Tx = MemTx;

    async fn begin(&self) -> Result<MemTx> {
        let work = lock(&self.state).clone();
        Ok(MemTx {
            shared: Arc::clone(&self.state),
            base_version: work.version,
            work,
        })
    }

    async fn list_sweep_candidates(&self) -> Result<Vec<i64>> {
        let s = lock(&self.state);
        let mut out: Vec<&OrderRow> = s
            .orders
            .values()
            .filter(|o| o.completed_at.is_some() && !o.settled)
            .collect();
        out.sort_by_key(|o| (o.completed_at, o.id));
        Ok(out.into_iter().map(|o| o.id).collect())
    }
}

impl MemTx {
    fn wrote(&mut self) {
        self.work.writes += 1;
    }
}

fn latest<'a>(orders: impl Iterator<Item = &'a OrderRow>) -> Option<OrderRow> {
    orders.max_by_key(|o| (o.created_at, o.id)).cloned()
}

#[async_trait::async_trait]
impl LedgerTx for MemTx {
    async fn commit(self) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.version != self.base_version {
            bail!("commit conflict: state changed since begin");
        }
        let mut work = self.work;
        work.version = self.base_version + 1;
        *shared = work;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }

    async fn fetch_member(&mut self, member_id: i64) -> Result<Option<MemberRow>> {
        Ok(self.work.members.get(&member_id).cloned())
    }

    async fn fetch_member_by_username(&mut self, username: &str) -> Result<Option<MemberRow>> {
        Ok(self
            .work
            .members
            .values()
            .find(|m| m.username == username)
            .cloned())
    }

    async fn fetch_members(&mut self, ids: &[i64]) -> Result<Vec<MemberRow>> {
        let wanted: BTreeSet<i64> = ids.iter().copied().collect();
        Ok(wanted
            .iter()
            .filter_map(|id| self.work.members.get(id).cloned())
            .collect())
    }

    async fn list_children(&mut self, parent_id: i64) -> Result<Vec<MemberRow>> {
        Ok(self
            .work
            .members
            .values()
            .filter(|m| m.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn list_members_with_rank_at_least(&mut self, rank: Rank) -> Result<Vec<MemberRow>> {
        Ok(self
            .work
            .members
            .values()
            .filter(|m| m.rank >= rank)
            .cloned()
            .collect())
    }

    async fn update_member_rank(&mut self, member_id: i64, rank: Rank) -> Result<()> {
        let m = self
            .work
            .members
            .get_mut(&member_id)
            .ok_or_else(|| anyhow!("update_member_rank: member {member_id} not found"))?;
        m.rank = rank;
        self.wrote();
        Ok(())
    }

    async fn descendant_ids(&mut self, root: i64) -> Result<Vec<i64>> {
        let mut seen = HashSet::new();
        let mut out = BTreeSet::new();
        if !self.work.members.contains_key(&root) {
            return Ok(Vec::new());
        }
        let mut frontier = vec![root];
        while let Some(id) = frontier.pop() {
            if !seen.insert(id) {
                continue;
            }
            out.insert(id);
            frontier.extend(
                self.work
                    .members
                    .values()
                    .filter(|m| m.parent_id == Some(id))
                    .map(|m| m.id),
            );
        }
        Ok(out.into_iter().collect())
    }

    async fn fetch_order(&mut self, order_id: i64) -> Result<Option<OrderRow>> {
        Ok(self.work.orders.get(&order_id).cloned())
    }

    async fn list_customer_pool_orders(&mut self) -> Result<Vec<OrderRow>> {
        Ok(self
            .work
            .orders
            .values()
            .filter(|o| o.settled && o.commission_customer < o.commission_customer_max)
            .cloned()
            .collect())
    }

    async fn latest_order_for_member(
        &mut self,
        member_id: i64,
        settled_only: bool,
    ) -> Result<Option<OrderRow>> {
        Ok(latest(self.work.orders.values().filter(|o| {
            o.member_id == member_id && o.completed_at.is_some() && (!settled_only || o.settled)
        })))
    }

    async fn find_open_order(
        &mut self,
        member_id: i64,
        product_id: i64,
    ) -> Result<Option<OrderRow>> {
        Ok(latest(self.work.orders.values().filter(|o| {
            o.member_id == member_id
                && o.product_id == product_id
                && o.completed_at.is_none()
                && o.pending.is_positive()
        })))
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<OrderRow> {
        if order.paid.is_negative() || order.paid > order.value {
            bail!("insert_order: paid {} outside 0..={}", order.paid, order.value);
        }
        let id = MemState::next_id(&mut self.work.next_order_id);
        let row = fixture_order(
            id,
            order.member_id,
            order.product_id,
            order.value,
            order.paid,
            order.created_at,
        );
        self.work.orders.insert(id, row.clone());
        self.wrote();
        Ok(row)
    }

    async fn apply_commission(
        &mut self,
        order_id: i64,
        bucket: CommissionBucket,
        amount: Money,
    ) -> Result<OrderRow> {
        let o = self.work.order_mut(order_id)?;
        let within = match bucket.aggregate() {
            Aggregate::Customer => o.commission_customer + amount <= o.commission_customer_max,
            Aggregate::Sale => o.commission_sale + amount <= o.commission_sale_max,
            Aggregate::Uncapped => true,
        };
        if amount.is_negative() || !within {
            bail!(
                "apply_commission guard rejected: order={order_id} bucket={bucket:?} amount={amount}"
            );
        }
        match bucket {
            CommissionBucket::CustomerShare => o.commission_customer_share += amount,
            CommissionBucket::CustomerGratitude => o.commission_customer_gratitude += amount,
            CommissionBucket::Sale1 => o.commission_sale1 += amount,
            CommissionBucket::Sale2 => o.commission_sale2 += amount,
            CommissionBucket::Sale3 => o.commission_sale3 += amount,
        }
        match bucket.aggregate() {
            Aggregate::Customer => o.commission_customer += amount,
            Aggregate::Sale => o.commission_sale += amount,
            Aggregate::Uncapped => {}
        }
        let row = o.clone();
        self.wrote();
        Ok(row)
    }

    async fn set_order_sale_cap(&mut self, order_id: i64, sale_max: Money) -> Result<OrderRow> {
        let o = self.work.order_mut(order_id)?;
        if o.commission_sale > sale_max {
            bail!("set_order_sale_cap guard rejected: order={order_id} sale_max={sale_max}");
        }
        o.commission_sale_max = sale_max;
        let row = o.clone();
        self.wrote();
        Ok(row)
    }

    async fn apply_payment_guarded(
        &mut self,
        order_id: i64,
        amount: Money,
    ) -> Result<Option<OrderRow>> {
        let Some(o) = self.work.orders.get_mut(&order_id) else {
            return Ok(None);
        };
        if o.completed_at.is_some()
            || !amount.is_positive()
            || o.paid + amount > o.value
            || (o.pending - amount).is_negative()
        {
            return Ok(None);
        }
        o.paid += amount;
        o.pending -= amount;
        let row = o.clone();
        self.wrote();
        Ok(Some(row))
    }

    async fn complete_order(
        &mut self,
        order_id: i64,
        at: DateTime<Utc>,
        customer_max: Money,
        sale_max: Money,
    ) -> Result<OrderRow> {
        let o = self.work.order_mut(order_id)?;
        if o.completed_at.is_some() || !o.pending.is_zero() {
            bail!("complete_order: order {order_id} is not an open, fully paid order");
        }
        o.completed_at = Some(at);
        o.commission_customer_max = customer_max;
        o.commission_sale_max = sale_max;
        let row = o.clone();
        self.wrote();
        Ok(row)
    }

    async fn mark_settled(&mut self, order_id: i64) -> Result<()> {
        if self.work.fail_mark_settled.contains(&order_id) {
            bail!("mark_settled failed: injected fault for order {order_id}");
        }
        let o = self.work.order_mut(order_id)?;
        if o.settled || o.completed_at.is_none() {
            bail!("mark_settled: order {order_id} is not a completed, unsettled order");
        }
        o.settled = true;
        self.wrote();
        Ok(())
    }

    async fn sum_paid(
        &mut self,
        member_ids: &[i64],
        completed_at_or_before: Option<DateTime<Utc>>,
    ) -> Result<Money> {
        let ids: HashSet<i64> = member_ids.iter().copied().collect();
        Ok(self
            .work
            .orders
            .values()
            .filter(|o| ids.contains(&o.member_id))
            .filter(|o| match completed_at_or_before {
                None => true,
                Some(ceiling) => o.completed_at.is_some_and(|c| c <= ceiling),
            })
            .map(|o| o.paid)
            .sum())
    }

    async fn insert_order_detail(&mut self, detail: &NewOrderDetail) -> Result<()> {
        if !detail.value.is_positive() {
            bail!("insert_order_detail: value must be positive");
        }
        self.work.order_details.push(detail.clone());
        self.wrote();
        Ok(())
    }

    async fn insert_order_pay(&mut self, pay: &NewOrderPay) -> Result<()> {
        if !self.work.orders.contains_key(&pay.order_id) {
            bail!("insert_order_pay: order {} not found", pay.order_id);
        }
        self.work.order_pays.push(pay.clone());
        self.wrote();
        Ok(())
    }

    async fn insert_wallet_detail(&mut self, detail: &NewWalletDetail) -> Result<()> {
        if !self.work.wallets.iter().any(|w| w.id == detail.wallet_id) {
            bail!("insert_wallet_detail: wallet {} not found", detail.wallet_id);
        }
        let id = MemState::next_id(&mut self.work.next_wallet_detail_id);
        self.work.wallet_details.push(WalletDetailRow {
            id,
            wallet_id: detail.wallet_id,
            value: detail.value,
            note: detail.note.clone(),
            created_at: detail.created_at,
        });
        self.wrote();
        Ok(())
    }

    async fn fetch_wallet(
        &mut self,
        member_id: i64,
        wallet_type: WalletType,
    ) -> Result<Option<WalletRow>> {
        Ok(self
            .work
            .wallet_pos(member_id, wallet_type)
            .map(|i| self.work.wallets[i].clone()))
    }

    async fn list_wallets(&mut self, member_id: i64) -> Result<Vec<WalletRow>> {
        Ok(self
            .work
            .wallets
            .iter()
            .filter(|w| w.member_id == member_id)
            .cloned()
            .collect())
    }

    async fn upsert_wallet_credit(
        &mut self,
        member_id: i64,
        wallet_type: WalletType,
        amount: Money,
    ) -> Result<WalletRow> {
        if amount.is_negative() {
            bail!("upsert_wallet_credit: negative amount {amount}");
        }
        let row = match self.work.wallet_pos(member_id, wallet_type) {
            Some(i) => {
                let w = &mut self.work.wallets[i];
                w.available += amount;
                w.total += amount;
                w.clone()
            }
            None => {
                let w = WalletRow {
                    id: MemState::next_id(&mut self.work.next_wallet_id),
                    member_id,
                    wallet_type,
                    available: amount,
                    total: amount,
                };
                self.work.wallets.push(w.clone());
                w
            }
        };
        self.wrote();
        Ok(row)
    }

    async fn debit_wallet_guarded(
        &mut self,
        member_id: i64,
        wallet_type: WalletType,
        amount: Money,
    ) -> Result<Option<WalletRow>> {
        let Some(i) = self.work.wallet_pos(member_id, wallet_type) else {
            return Ok(None);
        };
        let w = &mut self.work.wallets[i];
        if !amount.is_positive() || w.available < amount {
            return Ok(None);
        }
        w.available -= amount;
        let row = w.clone();
        self.wrote();
        Ok(Some(row))
    }

    async fn count_binary_placements(&mut self) -> Result<u64> {
        Ok(self.work.placements.len() as u64)
    }

    async fn binary_placement_at(&mut self, position: u64) -> Result<Option<PlacementRow>> {
        if position == 0 {
            return Ok(None);
        }
        let idx = usize::try_from(position - 1)?;
        Ok(self.work.placements.get(idx).cloned())
    }

    async fn insert_binary_placement(
        &mut self,
        order_id: i64,
        member_id: i64,
        parent_id: Option<i64>,
    ) -> Result<PlacementRow> {
        if self.work.placements.iter().any(|p| p.order_id == order_id) {
            bail!("insert_binary_placement: order {order_id} already placed");
        }
        let row = PlacementRow {
            id: MemState::next_id(&mut self.work.next_placement_id),
            order_id,
            member_id,
            parent_id,
        };
        self.work.placements.push(row.clone());
        self.wrote();
        Ok(row)
    }

    async fn fetch_product(&mut self, product_id: i64) -> Result<Option<ProductRow>> {
        Ok(self.work.products.get(&product_id).cloned())
    }
}
