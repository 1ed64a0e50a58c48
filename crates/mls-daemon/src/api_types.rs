//! Request and response types for the mls-daemon HTTP endpoints.
//!
//! No business logic lives here.

use mls_ledger::Money;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Errors (500)
// ---------------------------------------------------------------------------

/// Infrastructure failure; the body carries the error chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// /v1/payback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaybackBody {
    pub member_id: i64,
    pub product_id: i64,
    /// Decimal string such as "250000" or "1250.5"; never a JSON float.
    pub amount: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaybackPaidResponse {
    /// Always true.
    pub paid: bool,
    pub order_id: i64,
    pub pending: Money,
    pub completed: bool,
}

/// 422 body. `reason` is the stable rejection code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaybackRejectedResponse {
    /// Always false.
    pub paid: bool,
    pub reason: String,
    pub message: String,
}
