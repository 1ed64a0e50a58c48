use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use mls_db::{DetailRule, LedgerTx, MemberRow, NewOrderDetail, OrderRow};
use mls_ledger::{Money, WalletType};

use crate::policy::SettlementPolicy;
use crate::promotion::RankUpdates;
use crate::wallet;

/// Everything one order's settlement needs, owned for the duration of its
/// transaction. The distributors are methods on this type (see
/// `customer_pool`, `sales` and `promotion`).
pub struct SettlementContext<'a, T: LedgerTx> {
    pub(crate) tx: &'a mut T,
    pub(crate) policy: &'a SettlementPolicy,
    /// The order being settled, as loaded at the start of the transaction.
    pub(crate) order: OrderRow,
    pub(crate) buyer: MemberRow,
    pub(crate) now: DateTime<Utc>,
    pub(crate) rank_updates: RankUpdates,
    pub(crate) auto_reorders: u32,
}

impl<'a, T: LedgerTx> SettlementContext<'a, T> {
    pub fn new(
        tx: &'a mut T,
        policy: &'a SettlementPolicy,
        order: OrderRow,
        buyer: MemberRow,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tx,
            policy,
            order,
            buyer,
            now,
            rank_updates: RankUpdates::default(),
            auto_reorders: 0,
        }
    }

    pub fn order(&self) -> &OrderRow {
        &self.order
    }

    pub fn rank_updates(&self) -> &RankUpdates {
        &self.rank_updates
    }

    pub fn auto_reorders(&self) -> u32 {
        self.auto_reorders
    }

    /// Credit a wallet and record the attribution against the order being
    /// settled.
    pub(crate) async fn pay(
        &mut self,
        member_id: i64,
        wallet_type: WalletType,
        rule: DetailRule,
        amount: Money,
        note: &str,
    ) -> Result<()> {
        wallet::credit(&mut *self.tx, member_id, wallet_type, amount, note, self.now).await?;
        self.tx
            .insert_order_detail(&NewOrderDetail {
                order_id: self.order.id,
                member_id,
                wallet_type,
                rule,
                value: amount,
                note: note.to_string(),
                created_at: self.now,
            })
            .await
    }

    /// Up to `limit` referral ancestors of the buyer, nearest first. Stops at
    /// the root, at a missing parent row, or at a repeated member.
    pub(crate) async fn ancestors(&mut self, limit: Option<usize>) -> Result<Vec<MemberRow>> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([self.buyer.id]);
        let mut next = self.buyer.parent_id;

        while let Some(parent_id) = next {
            if limit.is_some_and(|l| out.len() >= l) || !seen.insert(parent_id) {
                break;
            }
            let Some(parent) = self.tx.fetch_member(parent_id).await? else {
                break;
            };
            next = parent.parent_id;
            out.push(parent);
        }
        Ok(out)
    }
}
