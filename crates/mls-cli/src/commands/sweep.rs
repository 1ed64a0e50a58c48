use anyhow::{bail, Result};
use chrono::Utc;
use mls_settlement::{run_settlement_sweep, SettlementPolicy};
use tracing::info;

use super::{check_unused_keys, connect_store, load_config};

/// Run one settlement sweep. A halted sweep exits non-zero after printing
/// what did settle.
pub async fn run(config_paths: Vec<String>, strict_config: bool) -> Result<()> {
    let loaded = load_config(&config_paths)?;
    check_unused_keys(&loaded, strict_config)?;
    let policy = SettlementPolicy::from_config_json(&loaded.config_json)?;
    info!(config_hash = %loaded.config_hash, "sweep config loaded");

    let store = connect_store(&loaded).await?;
    let report = run_settlement_sweep(&store, &policy, Utc::now()).await?;

    println!("sweep_id={}", report.sweep_id);
    println!("config_hash={}", loaded.config_hash);
    println!("candidates={}", report.candidates);
    println!("settled={}", report.settled.len());
    for s in &report.settled {
        println!(
            "settled_order={} member_id={} rank_changes={} auto_reorders={}",
            s.order_id,
            s.member_id,
            s.rank_changes.len(),
            s.auto_reorders
        );
        for c in &s.rank_changes {
            println!("rank_change member_id={} from={} to={}", c.member_id, c.from, c.to);
        }
    }

    match report.halted {
        None => {
            println!("halted=false");
            Ok(())
        }
        Some(h) => {
            println!("halted=true order_id={} stage={}", h.order_id, h.stage);
            bail!(
                "SWEEP_HALTED at order {} (stage {}): {}",
                h.order_id,
                h.stage,
                h.error
            )
        }
    }
}
