//! Wallet Ledger: balance movement plus its append-only detail, always in
//! the caller's transaction.

use anyhow::{ensure, Result};
use chrono::{DateTime, Utc};
use mls_db::{LedgerTx, NewWalletDetail, WalletRow};
use mls_ledger::{Money, WalletType};
use tracing::debug;

/// Result of a guarded debit. Insufficient balance is a signal, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebitOutcome {
    Applied(WalletRow),
    Insufficient { available: Money },
}

/// Upsert-increment `available` and `total`, then append a detail with the
/// same amount and note.
pub async fn credit<T: LedgerTx>(
    tx: &mut T,
    member_id: i64,
    wallet_type: WalletType,
    amount: Money,
    note: &str,
    at: DateTime<Utc>,
) -> Result<WalletRow> {
    ensure!(
        amount.is_positive(),
        "wallet credit must be positive: member={member_id} wallet={wallet_type} amount={amount}"
    );
    let wallet = tx.upsert_wallet_credit(member_id, wallet_type, amount).await?;
    tx.insert_wallet_detail(&NewWalletDetail {
        wallet_id: wallet.id,
        value: amount,
        note: note.to_string(),
        created_at: at,
    })
    .await?;
    debug!(member_id, wallet = %wallet_type, amount = %amount, note, "wallet credit");
    Ok(wallet)
}

/// Decrement `available` if it covers `amount`, then append a negative
/// detail. Nothing is written when the balance is short.
pub async fn debit<T: LedgerTx>(
    tx: &mut T,
    member_id: i64,
    wallet_type: WalletType,
    amount: Money,
    note: &str,
    at: DateTime<Utc>,
) -> Result<DebitOutcome> {
    ensure!(
        amount.is_positive(),
        "wallet debit must be positive: member={member_id} wallet={wallet_type} amount={amount}"
    );
    match tx.debit_wallet_guarded(member_id, wallet_type, amount).await? {
        Some(wallet) => {
            tx.insert_wallet_detail(&NewWalletDetail {
                wallet_id: wallet.id,
                value: -amount,
                note: note.to_string(),
                created_at: at,
            })
            .await?;
            debug!(member_id, wallet = %wallet_type, amount = %amount, note, "wallet debit");
            Ok(DebitOutcome::Applied(wallet))
        }
        None => {
            let available = tx
                .fetch_wallet(member_id, wallet_type)
                .await?
                .map(|w| w.available)
                .unwrap_or(Money::ZERO);
            Ok(DebitOutcome::Insufficient { available })
        }
    }
}

/// Current available balance; zero when the wallet was never created.
pub async fn available<T: LedgerTx>(
    tx: &mut T,
    member_id: i64,
    wallet_type: WalletType,
) -> Result<Money> {
    Ok(tx
        .fetch_wallet(member_id, wallet_type)
        .await?
        .map(|w| w.available)
        .unwrap_or(Money::ZERO))
}
