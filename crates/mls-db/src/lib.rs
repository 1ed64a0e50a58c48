//! mls-db
//!
//! Ledger Store for the settlement engine: Postgres schema (embedded
//! migrations), the [`LedgerStore`] / [`LedgerTx`] contract and its
//! Postgres implementation [`PgStore`].

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

mod pg;
mod rows;
mod store;

pub use pg::{PgLedgerTx, PgStore};
pub use rows::{
    DetailRule, MemberRow, NewOrder, NewOrderDetail, NewOrderPay, NewWalletDetail, OrderRow,
    PlacementRow, ProductRow, WalletDetailRow, WalletRow,
};
pub use store::{LedgerStore, LedgerTx};

pub const ENV_DB_URL: &str = "MLS_DATABASE_URL";

/// Connect to Postgres using `MLS_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

/// Connect to Postgres at `url`. The URL is never logged or echoed.
pub async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    let unsettled = if exists {
        let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
            "select count(*)::bigint from orders where completed_at is not null and settled = false",
        )
        .fetch_one(pool)
        .await
        .context("status unsettled-count query failed")?;
        n
    } else {
        0
    };

    Ok(DbStatus {
        ok: one == 1,
        has_orders_table: exists,
        unsettled_completed_orders: unsettled,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
    pub unsettled_completed_orders: i64,
}
