//! Reorder/Payback: spend a member's Sale3 balance on a product order.
//!
//! # Contract
//! - Business-rule failures come back as [`PaybackOutcome::Rejected`] and
//!   leave nothing written. They are never `Err`.
//! - A guard that fails *after* the wallet has been debited means the ledger
//!   is inconsistent; that is `Err` and the caller's transaction must roll
//!   back.
//! - An order whose `pending` reaches zero is completed here with fresh caps
//!   and becomes a candidate for the next sweep.

use std::fmt;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use mls_db::{LedgerStore, LedgerTx, NewOrder, NewOrderPay};
use mls_ledger::{Money, WalletType};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::policy::SettlementPolicy;
use crate::wallet::{self, DebitOutcome};

/// Note on the negative wallet detail of every payback.
pub const PAYMENT_NOTE: &str = "Order payment";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaybackRequest {
    pub member_id: i64,
    pub product_id: i64,
    pub amount: Money,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaybackRejection {
    InvalidAmount { amount: Money },
    MemberNotFound { member_id: i64 },
    InsufficientBalance { available: Money, requested: Money },
    ProductNotFound { product_id: i64 },
    /// Requested more than the product price or the open order's pending.
    Overpayment { requested: Money, limit: Money },
    /// The wallet changed between validation and the guarded debit.
    Conflict { member_id: i64 },
}

impl PaybackRejection {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::MemberNotFound { .. } => "MEMBER_NOT_FOUND",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::ProductNotFound { .. } => "PRODUCT_NOT_FOUND",
            Self::Overpayment { .. } => "OVERPAYMENT",
            Self::Conflict { .. } => "CONFLICT",
        }
    }
}

impl fmt::Display for PaybackRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAmount { amount } => write!(f, "amount must be positive (got {amount})"),
            Self::MemberNotFound { member_id } => write!(f, "member {member_id} not found"),
            Self::InsufficientBalance {
                available,
                requested,
            } => write!(
                f,
                "insufficient Sale3 balance: available {available}, requested {requested}"
            ),
            Self::ProductNotFound { product_id } => write!(f, "product {product_id} not found"),
            Self::Overpayment { requested, limit } => {
                write!(f, "overpayment: requested {requested}, at most {limit} allowed")
            }
            Self::Conflict { member_id } => {
                write!(f, "wallet of member {member_id} changed concurrently; retry")
            }
        }
    }
}

impl std::error::Error for PaybackRejection {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaybackOutcome {
    Paid {
        order_id: i64,
        pending: Money,
        /// True when this payment completed the order.
        completed: bool,
    },
    Rejected(PaybackRejection),
}

/// Run a payback inside the caller's transaction.
pub async fn pay_back<T: LedgerTx>(
    tx: &mut T,
    policy: &SettlementPolicy,
    req: &PaybackRequest,
    now: DateTime<Utc>,
) -> Result<PaybackOutcome> {
    use PaybackOutcome::Rejected;

    let amount = req.amount;
    if !amount.is_positive() {
        return Ok(Rejected(PaybackRejection::InvalidAmount { amount }));
    }

    let Some(member) = tx.fetch_member(req.member_id).await? else {
        return Ok(Rejected(PaybackRejection::MemberNotFound {
            member_id: req.member_id,
        }));
    };

    let available = wallet::available(tx, member.id, WalletType::Sale3).await?;
    if available < amount {
        return Ok(Rejected(PaybackRejection::InsufficientBalance {
            available,
            requested: amount,
        }));
    }

    let Some(product) = tx.fetch_product(req.product_id).await? else {
        return Ok(Rejected(PaybackRejection::ProductNotFound {
            product_id: req.product_id,
        }));
    };

    let open = tx.find_open_order(member.id, product.id).await?;
    let limit = open
        .as_ref()
        .map(|o| o.pending.min(product.price))
        .unwrap_or(product.price);
    if amount > limit {
        return Ok(Rejected(PaybackRejection::Overpayment {
            requested: amount,
            limit,
        }));
    }

    match wallet::debit(tx, member.id, WalletType::Sale3, amount, PAYMENT_NOTE, now).await? {
        DebitOutcome::Applied(_) => {}
        DebitOutcome::Insufficient { .. } => {
            return Ok(Rejected(PaybackRejection::Conflict {
                member_id: member.id,
            }));
        }
    }

    let order = match open {
        None => {
            tx.insert_order(&NewOrder {
                member_id: member.id,
                product_id: product.id,
                value: product.price,
                paid: amount,
                created_at: now,
            })
            .await?
        }
        Some(open) => tx
            .apply_payment_guarded(open.id, amount)
            .await?
            .ok_or_else(|| {
                anyhow!(
                    "payment guard rejected after debit: order={} amount={amount}",
                    open.id
                )
            })?,
    };

    tx.insert_order_pay(&NewOrderPay {
        order_id: order.id,
        pay_date: policy.business_date(now)?,
        value: amount,
        note: req.note.clone(),
        created_by: member.username.clone(),
    })
    .await?;

    let completed = order.pending.is_zero();
    if completed {
        tx.complete_order(
            order.id,
            now,
            policy.customer_cap(order.value)?,
            policy.sale_cap(order.value)?,
        )
        .await?;
    }

    Ok(PaybackOutcome::Paid {
        order_id: order.id,
        pending: order.pending,
        completed,
    })
}

/// Entry point for an authenticated member action. Owns its transaction:
/// commits on `Paid`, rolls back on `Rejected` or `Err`.
pub async fn manual_payback<S: LedgerStore>(
    store: &S,
    policy: &SettlementPolicy,
    req: &PaybackRequest,
    now: DateTime<Utc>,
) -> Result<PaybackOutcome> {
    let mut tx = store.begin().await?;
    let outcome = match pay_back(&mut tx, policy, req, now).await {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Err(rb) = tx.rollback().await {
                warn!(error = %rb, "payback rollback failed");
            }
            return Err(err);
        }
    };

    match &outcome {
        PaybackOutcome::Paid {
            order_id,
            pending,
            completed,
        } => {
            tx.commit().await?;
            info!(
                member_id = req.member_id,
                product_id = req.product_id,
                order_id,
                amount = %req.amount,
                pending = %pending,
                completed,
                "manual payback applied"
            );
        }
        PaybackOutcome::Rejected(reason) => {
            tx.rollback().await?;
            info!(
                member_id = req.member_id,
                product_id = req.product_id,
                code = reason.code(),
                reason = %reason,
                "manual payback rejected"
            );
        }
    }
    Ok(outcome)
}
