use anyhow::{bail, Context, Result};
use chrono::Utc;
use mls_ledger::Money;
use mls_settlement::{manual_payback, PaybackOutcome, PaybackRequest, SettlementPolicy};

use super::{check_unused_keys, connect_store, load_config, resolve_member_id};

pub struct PaybackArgs {
    pub member: String,
    pub product_id: i64,
    pub amount: String,
    pub note: String,
    pub config_paths: Vec<String>,
}

/// Pay a product order from the member's Sale3 wallet. Rejections print
/// their code and exit non-zero.
pub async fn run(args: PaybackArgs) -> Result<()> {
    // Validate the input before touching the database.
    let amount = Money::parse_decimal(&args.amount)
        .with_context(|| format!("invalid --amount '{}'", args.amount))?;

    let loaded = load_config(&args.config_paths)?;
    check_unused_keys(&loaded, false)?;
    let policy = SettlementPolicy::from_config_json(&loaded.config_json)?;

    let store = connect_store(&loaded).await?;
    let member_id = resolve_member_id(&store, &args.member).await?;

    let req = PaybackRequest {
        member_id,
        product_id: args.product_id,
        amount,
        note: args.note,
    };
    match manual_payback(&store, &policy, &req, Utc::now()).await? {
        PaybackOutcome::Paid {
            order_id,
            pending,
            completed,
        } => {
            println!(
                "paid=true order_id={order_id} amount={amount} pending={pending} completed={completed}"
            );
            Ok(())
        }
        PaybackOutcome::Rejected(reason) => {
            println!("paid=false reason={}", reason.code());
            bail!("PAYBACK_REJECTED {}: {}", reason.code(), reason)
        }
    }
}
