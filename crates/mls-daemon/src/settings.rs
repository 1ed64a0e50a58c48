//! Process settings: listen address, config layers and sweep schedule.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;

pub const DEFAULT_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 8898);
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

const SWEEP_INTERVAL_POINTER: &str = "/daemon/sweep_interval_secs";

/// `MLS_DAEMON_ADDR`, or 127.0.0.1:8898 when unset. A value that does not
/// parse is an error rather than a silent fallback.
pub fn bind_addr(raw: Option<&str>) -> Result<SocketAddr> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(SocketAddr::from(DEFAULT_ADDR)),
        Some(s) => s
            .parse()
            .with_context(|| format!("MLS_DAEMON_ADDR '{s}' is not a socket address")),
    }
}

/// Split `MLS_CONFIG_PATHS` (comma separated, merge order) into paths.
pub fn config_paths(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn sweep_interval(config_json: &Value) -> Result<Duration> {
    let secs = mls_config::read_u64(config_json, SWEEP_INTERVAL_POINTER)?
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    if secs == 0 {
        bail!("CONFIG_INVALID {SWEEP_INTERVAL_POINTER}: must be at least 1");
    }
    Ok(Duration::from_secs(secs))
}
