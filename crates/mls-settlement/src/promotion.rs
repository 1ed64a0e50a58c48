//! Rank Promotion Evaluator.
//!
//! Walks the buyer and their referral ancestors bottom-up. For each member
//! whose downline revenue clears the threshold, the direct children are
//! classified by the best rank in their own subtree and the highest ladder
//! rung with enough qualifying children wins. Promotions made earlier in
//! the same walk are visible to later members through [`RankUpdates`].

use std::collections::BTreeMap;

use anyhow::Result;
use mls_db::{LedgerTx, MemberRow};
use mls_ledger::{eligible_rank, Money, Rank};
use serde::Serialize;
use tracing::{debug, info};

use crate::context::SettlementContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankChange {
    pub member_id: i64,
    pub from: Rank,
    pub to: Rank,
}

/// Ranks changed during one settlement, threaded through the walk.
#[derive(Debug, Clone, Default)]
pub struct RankUpdates {
    changes: Vec<RankChange>,
    overlay: BTreeMap<i64, Rank>,
}

impl RankUpdates {
    pub fn record(&mut self, member_id: i64, from: Rank, to: Rank) {
        self.changes.push(RankChange { member_id, from, to });
        self.overlay.insert(member_id, to);
    }

    /// The member's rank with this pass's promotions applied.
    pub fn effective(&self, member: &MemberRow) -> Rank {
        self.overlay.get(&member.id).copied().unwrap_or(member.rank)
    }

    pub fn changes(&self) -> &[RankChange] {
        &self.changes
    }

    pub fn into_changes(self) -> Vec<RankChange> {
        self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl<T: LedgerTx> SettlementContext<'_, T> {
    /// Evaluate the buyer and every ancestor; persist rank changes and
    /// adjust sale caps.
    pub async fn evaluate_promotions(&mut self) -> Result<()> {
        let mut lineage = vec![self.buyer.clone()];
        lineage.extend(self.ancestors(None).await?);

        for member in &lineage {
            self.evaluate_member(member).await?;
        }
        Ok(())
    }

    async fn evaluate_member(&mut self, member: &MemberRow) -> Result<()> {
        let policy = &self.policy.promotion;
        let (threshold, min_children) = (policy.revenue_threshold, policy.min_children);
        let (cap_multiplier, refresh_multiplier) = (policy.cap_multiplier, policy.refresh_multiplier);

        let downline = self.tx.descendant_ids(member.id).await?;
        let revenue = self
            .tx
            .sum_paid(&downline, self.order.completed_at)
            .await?;
        if revenue < threshold {
            return Ok(());
        }

        let children = self.tx.list_children(member.id).await?;
        let mut child_best = Vec::with_capacity(children.len());
        for child in &children {
            child_best.push(self.best_rank_in_subtree(child.id).await?);
        }
        let Some(outcome) = eligible_rank(&child_best, min_children) else {
            return Ok(());
        };

        let current = self.rank_updates.effective(member);
        let latest = self.tx.latest_order_for_member(member.id, false).await?;

        if outcome.target > current {
            self.tx.update_member_rank(member.id, outcome.target).await?;
            self.rank_updates.record(member.id, current, outcome.target);
            info!(
                order_id = self.order.id,
                member_id = member.id,
                from = %current,
                to = %outcome.target,
                revenue = %revenue,
                qualifying_children = outcome.qualifying_children,
                "rank promoted"
            );
            if let Some(latest) = latest {
                let cap = self.trigger_multiple(cap_multiplier)?.max(latest.commission_sale);
                if cap != latest.commission_sale_max {
                    self.tx.set_order_sale_cap(latest.id, cap).await?;
                }
            }
        } else if let Some(latest) = latest {
            let floor = self.trigger_multiple(refresh_multiplier)?;
            if floor > latest.commission_sale_max {
                self.tx.set_order_sale_cap(latest.id, floor).await?;
                debug!(
                    order_id = self.order.id,
                    member_id = member.id,
                    target_order_id = latest.id,
                    sale_max = %floor,
                    "sale cap refreshed"
                );
            }
        }
        Ok(())
    }

    /// Highest effective rank anywhere in `root`'s subtree, `root` included.
    async fn best_rank_in_subtree(&mut self, root: i64) -> Result<Rank> {
        let ids = self.tx.descendant_ids(root).await?;
        let members = self.tx.fetch_members(&ids).await?;
        Ok(members
            .iter()
            .map(|m| self.rank_updates.effective(m))
            .max()
            .unwrap_or(Rank::None))
    }

    fn trigger_multiple(&self, k: i64) -> Result<Money> {
        self.order
            .value
            .checked_mul_int(k)
            .ok_or_else(|| anyhow::anyhow!("cap overflow: {} x {k}", self.order.value))
    }
}
