//! Command handler modules for mls-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod payback;
pub mod sweep;
pub mod wallet;

use anyhow::{Context, Result};
use mls_config::{
    report_unused_keys, resolve_secrets, ConfigConsumer, LoadedConfig, UnusedKeyPolicy,
};
use mls_db::{LedgerStore, LedgerTx, PgStore};
use tracing::warn;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Load layered config. No paths means an empty config (all defaults).
pub fn load_config(paths: &[String]) -> Result<LoadedConfig> {
    if paths.is_empty() {
        return LoadedConfig::empty();
    }
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    mls_config::load_layered_yaml(&path_refs)
}

/// Report config keys the CLI never reads. `strict` turns the warning into
/// an error.
pub fn check_unused_keys(loaded: &LoadedConfig, strict: bool) -> Result<()> {
    let policy = if strict {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let report = report_unused_keys(ConfigConsumer::Cli, &loaded.config_json, policy)?;
    if !report.is_clean() {
        warn!(
            consumer = %report.consumer,
            unused = ?report.unused_leaf_pointers,
            "config contains keys the cli does not read"
        );
    }
    Ok(())
}

/// Connect using the database URL env var the config names.
pub async fn connect_store(loaded: &LoadedConfig) -> Result<PgStore> {
    let secrets = resolve_secrets(&loaded.config_json);
    let url = secrets.require_database_url()?;
    let pool = mls_db::connect(url).await?;
    Ok(PgStore::new(pool))
}

/// Accept a numeric member id or a username such as `EL042`.
pub async fn resolve_member_id(store: &PgStore, member: &str) -> Result<i64> {
    let member = member.trim();
    if let Ok(id) = member.parse::<i64>() {
        return Ok(id);
    }
    let mut tx = store.begin().await?;
    let found = tx.fetch_member_by_username(member).await;
    tx.rollback().await?;
    found?
        .map(|m| m.id)
        .with_context(|| format!("member '{member}' not found"))
}
