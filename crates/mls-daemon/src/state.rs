//! Shared runtime state for mls-daemon.
//!
//! Handlers receive `State<Arc<AppState<S>>>` from Axum. The store type is
//! generic so tests can drive the same router against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use mls_db::LedgerStore;
use mls_settlement::{run_settlement_sweep, SettlementPolicy, SweepReport};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, warn};

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Returned by GET /v1/status.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    pub config_hash: String,
    /// Sweeps that returned a report, halted ones included.
    pub sweeps_run: u64,
    pub last_sweep: Option<SweepReport>,
    /// Set when the last sweep could not even list its candidates.
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState<S> {
    pub build: BuildInfo,
    pub store: S,
    pub policy: SettlementPolicy,
    pub status: RwLock<StatusSnapshot>,
    /// Held for the whole sweep: the loop and POST /v1/sweep never overlap.
    sweep_lock: Mutex<()>,
}

impl<S: LedgerStore> AppState<S> {
    pub fn new(store: S, policy: SettlementPolicy, config_hash: impl Into<String>) -> Self {
        Self {
            build: BuildInfo {
                service: "mls-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            store,
            policy,
            status: RwLock::new(StatusSnapshot {
                daemon_uptime_secs: uptime_secs(),
                config_hash: config_hash.into(),
                sweeps_run: 0,
                last_sweep: None,
                last_error: None,
            }),
            sweep_lock: Mutex::new(()),
        }
    }

    /// Run one sweep and record its report. Waits for a sweep already in
    /// flight instead of starting a second one concurrently.
    pub async fn run_sweep(&self) -> Result<SweepReport> {
        let _guard = self.sweep_lock.lock().await;
        let result = run_settlement_sweep(&self.store, &self.policy, Utc::now()).await;

        let mut status = self.status.write().await;
        match &result {
            Ok(report) => {
                status.sweeps_run += 1;
                status.last_sweep = Some(report.clone());
                status.last_error = None;
            }
            Err(err) => status.last_error = Some(format!("{err:#}")),
        }
        result
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let mut snap = self.status.read().await.clone();
        snap.daemon_uptime_secs = uptime_secs();
        snap
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Seconds since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn the scheduled sweep. The first tick fires immediately.
///
/// A halted sweep is not retried early: the next tick resumes at the failed
/// order, which is what an operator would do by hand.
pub fn spawn_sweep_loop<S>(state: Arc<AppState<S>>, interval: Duration)
where
    S: LedgerStore + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match state.run_sweep().await {
                Ok(report) => {
                    if let Some(h) = &report.halted {
                        warn!(
                            sweep_id = %report.sweep_id,
                            order_id = h.order_id,
                            stage = %h.stage,
                            "scheduled sweep halted"
                        );
                    }
                }
                Err(err) => error!(error = %format!("{err:#}"), "scheduled sweep failed"),
            }
        }
    });
}
