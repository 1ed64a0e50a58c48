//! Customer-Pool Distributor: equal-split pool, binary placement and the
//! gratitude cascade.

use anyhow::{anyhow, Context, Result};
use mls_db::{DetailRule, LedgerTx, PlacementRow};
use mls_ledger::{
    binary_parent_position, clip_to_cap, gratitude_split, CommissionBucket, Money, WalletType,
};
use tracing::debug;

use crate::context::SettlementContext;

/// What the equal-split pool paid out for one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolPayout {
    pub eligible_orders: usize,
    pub share: Money,
    pub paid_out: Money,
}

impl<T: LedgerTx> SettlementContext<'_, T> {
    /// Split `customer_pool_rate × value` evenly across every settled order
    /// still below its customer cap, clipping each share to its headroom.
    pub async fn distribute_customer_pool(&mut self) -> Result<PoolPayout> {
        let eligible = self.tx.list_customer_pool_orders().await?;
        let pool = self.order.value.mul_rate(self.policy.customer_pool_rate);
        let Some(share) = pool.split_even(eligible.len()) else {
            debug!(order_id = self.order.id, "customer pool: no eligible orders");
            return Ok(PoolPayout::default());
        };

        let note = format!("Customer share from order #{}", self.order.id);
        let mut paid_out = Money::ZERO;
        for target in &eligible {
            let inc = clip_to_cap(
                share,
                target.commission_customer,
                target.commission_customer_max,
            );
            if inc.is_zero() {
                continue;
            }
            self.tx
                .apply_commission(target.id, CommissionBucket::CustomerShare, inc)
                .await?;
            self.pay(
                target.member_id,
                WalletType::CustomerShare,
                DetailRule::CustomerPool,
                inc,
                &note,
            )
            .await?;
            paid_out += inc;
        }

        debug!(
            order_id = self.order.id,
            eligible = eligible.len(),
            share = %share,
            paid_out = %paid_out,
            "customer pool distributed"
        );
        Ok(PoolPayout {
            eligible_orders: eligible.len(),
            share,
            paid_out,
        })
    }

    /// Append the buyer to the binary tree, breadth-first.
    pub async fn place_in_binary_tree(&mut self) -> Result<PlacementRow> {
        let existing = self.tx.count_binary_placements().await?;
        let parent_id = match binary_parent_position(existing) {
            None => None,
            Some(pos) => {
                let parent = self
                    .tx
                    .binary_placement_at(pos)
                    .await?
                    .ok_or_else(|| anyhow!("binary placement at position {pos} is missing"))?;
                Some(parent.id)
            }
        };
        let placement = self
            .tx
            .insert_binary_placement(self.order.id, self.buyer.id, parent_id)
            .await?;
        debug!(
            order_id = self.order.id,
            placement_id = placement.id,
            parent_id = ?parent_id,
            "binary placement"
        );
        Ok(placement)
    }

    /// Pay a fixed amount to each referral ancestor up to the level ceiling;
    /// the unvisited levels go to the house member.
    pub async fn cascade_gratitude(&mut self) -> Result<Money> {
        let g = &self.policy.gratitude;
        let (max_levels, house_member_id) = (g.max_levels, g.house_member_id);
        let pool = self.policy.gratitude_pool();

        let ancestors = self.ancestors(Some(max_levels as usize)).await?;
        let visited = u32::try_from(ancestors.len()).context("gratitude level count")?;
        let split = gratitude_split(pool, max_levels, visited);

        let note = format!("Gratitude from order #{}", self.order.id);
        if split.per_level.is_positive() {
            for ancestor in &ancestors {
                if let Some(latest) = self.tx.latest_order_for_member(ancestor.id, true).await? {
                    self.tx
                        .apply_commission(
                            latest.id,
                            CommissionBucket::CustomerGratitude,
                            split.per_level,
                        )
                        .await?;
                }
                self.pay(
                    ancestor.id,
                    WalletType::CustomerGratitude,
                    DetailRule::Gratitude,
                    split.per_level,
                    &note,
                )
                .await?;
            }
        }

        if split.remainder.is_positive() {
            self.tx
                .fetch_member(house_member_id)
                .await?
                .ok_or_else(|| anyhow!("gratitude house member {house_member_id} not found"))?;
            self.pay(
                house_member_id,
                WalletType::CustomerGratitude,
                DetailRule::GratitudeHouse,
                split.remainder,
                &format!("Gratitude remainder from order #{}", self.order.id),
            )
            .await?;
        }

        debug!(
            order_id = self.order.id,
            levels = visited,
            per_level = %split.per_level,
            remainder = %split.remainder,
            "gratitude cascade"
        );
        Ok(split.paid_out)
    }
}
