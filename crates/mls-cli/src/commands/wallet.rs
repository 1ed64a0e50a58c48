use anyhow::Result;
use mls_db::{LedgerStore, LedgerTx};

use super::{connect_store, load_config, resolve_member_id};

/// Print every wallet of a member, one per line.
pub async fn run(member: String, config_paths: Vec<String>) -> Result<()> {
    let loaded = load_config(&config_paths)?;
    let store = connect_store(&loaded).await?;
    let member_id = resolve_member_id(&store, &member).await?;

    let mut tx = store.begin().await?;
    let wallets = tx.list_wallets(member_id).await;
    tx.rollback().await?;
    let wallets = wallets?;

    println!("member_id={member_id} wallets={}", wallets.len());
    for w in wallets {
        println!(
            "wallet_type={} available={} total={}",
            w.wallet_type, w.available, w.total
        );
    }
    Ok(())
}
