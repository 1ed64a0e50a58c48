//! mls-testkit
//!
//! Test support for the settlement engine: an in-memory [`MemStore`] that
//! honours the same guards as the Postgres store, plus fixture and
//! inspection helpers. Scenario tests live under `tests/`.

mod mem_store;

pub use mem_store::{
    MemStore, MemTx, FIXTURE_CUSTOMER_CAP_MULTIPLIER, FIXTURE_SALE_CAP_MULTIPLIER,
};

use chrono::{DateTime, Duration, TimeZone, Utc};
use mls_ledger::Money;

/// Fixed base instant for deterministic scenarios.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// `t0()` plus `minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(minutes)
}

/// Whole currency units.
pub fn units(n: i64) -> Money {
    Money::from_units(n)
}
