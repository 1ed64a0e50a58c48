//! Settlement Orchestrator.
//!
//! One sweep settles every completed, unsettled order in completion order,
//! one transaction per order. The first failure rolls back that order's
//! transaction and halts the sweep: later orders depend on the state the
//! failed one would have left. Settled orders are never candidates again,
//! so re-running after a halt resumes at the failed order.

use std::fmt;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use mls_db::{LedgerStore, LedgerTx};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::SettlementContext;
use crate::policy::SettlementPolicy;
use crate::promotion::RankChange;

/// Where inside an order's settlement a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleStage {
    Load,
    CustomerPool,
    BinaryPlacement,
    Gratitude,
    Unilevel,
    RankPool,
    Promotion,
    Finalize,
}

impl SettleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettleStage::Load => "load",
            SettleStage::CustomerPool => "customer_pool",
            SettleStage::BinaryPlacement => "binary_placement",
            SettleStage::Gratitude => "gratitude",
            SettleStage::Unilevel => "unilevel",
            SettleStage::RankPool => "rank_pool",
            SettleStage::Promotion => "promotion",
            SettleStage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for SettleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An infrastructure fault inside one order's settlement.
#[derive(Debug)]
pub struct SettleFailure {
    pub stage: SettleStage,
    pub error: anyhow::Error,
}

impl fmt::Display for SettleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "settlement failed at stage {}: {:#}", self.stage, self.error)
    }
}

impl std::error::Error for SettleFailure {}

trait StageExt<T> {
    fn at(self, stage: SettleStage) -> std::result::Result<T, SettleFailure>;
}

impl<T> StageExt<T> for Result<T> {
    fn at(self, stage: SettleStage) -> std::result::Result<T, SettleFailure> {
        self.map_err(|error| SettleFailure { stage, error })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettledOrder {
    pub order_id: i64,
    pub member_id: i64,
    pub rank_changes: Vec<RankChange>,
    pub auto_reorders: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepHalt {
    pub order_id: i64,
    pub stage: SettleStage,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub sweep_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub candidates: usize,
    pub settled: Vec<SettledOrder>,
    pub halted: Option<SweepHalt>,
}

impl SweepReport {
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }
}

/// Settle one order inside `tx`. The caller owns commit/rollback.
pub async fn settle_order<T: LedgerTx>(
    tx: &mut T,
    policy: &SettlementPolicy,
    order_id: i64,
    now: DateTime<Utc>,
) -> std::result::Result<SettledOrder, SettleFailure> {
    let order = tx
        .fetch_order(order_id)
        .await
        .at(SettleStage::Load)?
        .ok_or_else(|| anyhow!("order {order_id} not found"))
        .at(SettleStage::Load)?;
    if order.settled || !order.is_completed() {
        return Err(anyhow!(
            "order {order_id} is not a completed, unsettled order (settled={}, completed={})",
            order.settled,
            order.is_completed()
        ))
        .at(SettleStage::Load);
    }
    let buyer = tx
        .fetch_member(order.member_id)
        .await
        .at(SettleStage::Load)?
        .ok_or_else(|| anyhow!("member {} of order {order_id} not found", order.member_id))
        .at(SettleStage::Load)?;
    let member_id = buyer.id;

    let mut ctx = SettlementContext::new(tx, policy, order, buyer, now);
    ctx.distribute_customer_pool()
        .await
        .at(SettleStage::CustomerPool)?;
    ctx.place_in_binary_tree()
        .await
        .at(SettleStage::BinaryPlacement)?;
    ctx.cascade_gratitude().await.at(SettleStage::Gratitude)?;
    ctx.distribute_unilevel().await.at(SettleStage::Unilevel)?;
    ctx.distribute_rank_pool().await.at(SettleStage::RankPool)?;
    ctx.evaluate_promotions().await.at(SettleStage::Promotion)?;

    let auto_reorders = ctx.auto_reorders();
    let rank_changes = ctx.rank_updates().changes().to_vec();
    drop(ctx);

    tx.mark_settled(order_id).await.at(SettleStage::Finalize)?;

    Ok(SettledOrder {
        order_id,
        member_id,
        rank_changes,
        auto_reorders,
    })
}

/// Run one sweep. Only failing to list candidates is `Err`; a failing
/// order is reported in [`SweepReport::halted`].
pub async fn run_settlement_sweep<S: LedgerStore>(
    store: &S,
    policy: &SettlementPolicy,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let sweep_id = Uuid::new_v4();
    let candidates = store.list_sweep_candidates().await?;
    info!(%sweep_id, candidates = candidates.len(), "settlement sweep started");

    let mut report = SweepReport {
        sweep_id,
        started_at: now,
        candidates: candidates.len(),
        settled: Vec::new(),
        halted: None,
    };

    for order_id in candidates {
        let mut tx = match store.begin().await {
            Ok(tx) => tx,
            Err(error) => {
                report.halted = Some(halt(sweep_id, order_id, SettleStage::Load, &error));
                break;
            }
        };

        match settle_order(&mut tx, policy, order_id, now).await {
            Ok(settled) => {
                if let Err(error) = tx.commit().await {
                    report.halted = Some(halt(sweep_id, order_id, SettleStage::Finalize, &error));
                    break;
                }
                info!(
                    %sweep_id,
                    order_id,
                    member_id = settled.member_id,
                    rank_changes = settled.rank_changes.len(),
                    auto_reorders = settled.auto_reorders,
                    "order settled"
                );
                report.settled.push(settled);
            }
            Err(failure) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(%sweep_id, order_id, error = %rb, "rollback failed");
                }
                report.halted = Some(halt(sweep_id, order_id, failure.stage, &failure.error));
                break;
            }
        }
    }

    info!(
        %sweep_id,
        candidates = report.candidates,
        settled = report.settled.len(),
        halted = report.is_halted(),
        "settlement sweep finished"
    );
    Ok(report)
}

fn halt(sweep_id: Uuid, order_id: i64, stage: SettleStage, error: &anyhow::Error) -> SweepHalt {
    error!(
        %sweep_id,
        order_id,
        stage = %stage,
        error = %format!("{error:#}"),
        "settlement halted; remaining orders deferred"
    );
    SweepHalt {
        order_id,
        stage,
        error: format!("{error:#}"),
    }
}
