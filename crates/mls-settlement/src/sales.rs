//! Sales Commission Distributor: three-level unilevel, rank-tier pool, and
//! the shared soft-cap / overflow rule.

use anyhow::Result;
use mls_db::{DetailRule, LedgerTx, MemberRow};
use mls_ledger::{soft_cap, split_sale_credit, CommissionBucket, Money, WalletType};
use tracing::{debug, info, warn};

use crate::context::SettlementContext;
use crate::payback::{self, PaybackOutcome, PaybackRequest};
use crate::wallet;

impl<T: LedgerTx> SettlementContext<'_, T> {
    /// Pay each of the first N referral ancestors their level's rate of the
    /// order value, credited against their latest settled order (Sale1).
    pub async fn distribute_unilevel(&mut self) -> Result<()> {
        let rates = self.policy.unilevel_rates.clone();
        let ancestors = self.ancestors(Some(rates.len())).await?;

        for (level, (ancestor, rate)) in ancestors.iter().zip(rates).enumerate() {
            let level = level + 1;
            let amount = self.order.value.mul_rate(rate);
            let note = format!("Level {level} sale ({rate}) from order #{}", self.order.id);
            self.credit_sale(ancestor, amount, CommissionBucket::Sale1, DetailRule::Unilevel, &note)
                .await?;
        }
        Ok(())
    }

    /// For each tier (ascending), split the tier's rate of the order value
    /// across every member at or above it (Sale2).
    pub async fn distribute_rank_pool(&mut self) -> Result<()> {
        let tiers = self.policy.rank_pool_rates.clone();
        for (tier, rate) in tiers {
            let members = self.tx.list_members_with_rank_at_least(tier).await?;
            let pool = self.order.value.mul_rate(rate);
            let Some(share) = pool.split_even(members.len()) else {
                debug!(order_id = self.order.id, tier = %tier, "rank pool: no members at tier");
                continue;
            };
            let note = format!("{tier} pool ({rate}) from order #{}", self.order.id);
            for member in &members {
                self.credit_sale(member, share, CommissionBucket::Sale2, DetailRule::RankPool, &note)
                    .await?;
            }
        }
        Ok(())
    }

    /// Apply the sale credit rule to `beneficiary`'s latest settled order:
    /// primary to `bucket`, overflow to Sale3, and an automatic reorder when
    /// the overflow lands exactly on the cap.
    pub(crate) async fn credit_sale(
        &mut self,
        beneficiary: &MemberRow,
        amount: Money,
        bucket: CommissionBucket,
        rule: DetailRule,
        note: &str,
    ) -> Result<()> {
        if !amount.is_positive() {
            return Ok(());
        }
        let Some(target) = self
            .tx
            .latest_order_for_member(beneficiary.id, true)
            .await?
        else {
            debug!(
                order_id = self.order.id,
                member_id = beneficiary.id,
                amount = %amount,
                "sale credit skipped: no settled order"
            );
            return Ok(());
        };

        let soft = beneficiary
            .rank
            .is_qualifying()
            .then(|| soft_cap(target.commission_sale_max, self.policy.rank_soft_cap));
        let split = split_sale_credit(
            amount,
            target.commission_sale,
            target.commission_sale_max,
            soft,
        );

        if split.primary.is_positive() {
            self.tx
                .apply_commission(target.id, bucket, split.primary)
                .await?;
            self.pay(beneficiary.id, bucket.wallet_type(), rule, split.primary, note)
                .await?;
        }
        if split.overflow.is_positive() {
            self.tx
                .apply_commission(target.id, CommissionBucket::Sale3, split.overflow)
                .await?;
            self.pay(
                beneficiary.id,
                WalletType::Sale3,
                DetailRule::ComboConversion,
                split.overflow,
                &format!("Combo conversion: {note}"),
            )
            .await?;
        }
        if split.dropped.is_positive() {
            debug!(
                order_id = self.order.id,
                member_id = beneficiary.id,
                target_order_id = target.id,
                dropped = %split.dropped,
                "sale credit above cap dropped"
            );
        }

        if split.reaches_cap(target.commission_sale, target.commission_sale_max) {
            self.auto_reorder(beneficiary, target.product_id).await?;
        }
        Ok(())
    }

    /// Spend the member's Sale3 balance on another unit of `product_id`.
    /// Business rejections are logged and never fail the settlement.
    pub(crate) async fn auto_reorder(
        &mut self,
        member: &MemberRow,
        product_id: i64,
    ) -> Result<()> {
        let Some(product) = self.tx.fetch_product(product_id).await? else {
            warn!(
                order_id = self.order.id,
                member_id = member.id,
                product_id,
                "auto reorder skipped: product not found"
            );
            return Ok(());
        };
        let balance = wallet::available(&mut *self.tx, member.id, WalletType::Sale3).await?;
        let mut amount = product.price.min(balance);
        if let Some(open) = self.tx.find_open_order(member.id, product_id).await? {
            amount = amount.min(open.pending);
        }
        if !amount.is_positive() {
            warn!(
                order_id = self.order.id,
                member_id = member.id,
                product_id,
                balance = %balance,
                "auto reorder skipped: nothing to pay"
            );
            return Ok(());
        }

        let req = PaybackRequest {
            member_id: member.id,
            product_id,
            amount,
            note: format!("Auto reorder after cap reached (order #{})", self.order.id),
        };
        match payback::pay_back(&mut *self.tx, self.policy, &req, self.now).await? {
            PaybackOutcome::Paid {
                order_id,
                pending,
                completed,
            } => {
                self.auto_reorders += 1;
                info!(
                    order_id = self.order.id,
                    member_id = member.id,
                    reorder_order_id = order_id,
                    amount = %amount,
                    pending = %pending,
                    completed,
                    "auto reorder paid"
                );
            }
            PaybackOutcome::Rejected(reason) => {
                warn!(
                    order_id = self.order.id,
                    member_id = member.id,
                    product_id,
                    reason = %reason,
                    "auto reorder rejected"
                );
            }
        }
        Ok(())
    }
}
