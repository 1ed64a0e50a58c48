//! Axum router and all HTTP handlers for mls-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers, so tests can use the bare router.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use mls_db::LedgerStore;
use mls_ledger::Money;
use mls_settlement::{manual_payback, PaybackOutcome, PaybackRequest};
use tracing::{info, warn};

use crate::{
    api_types::{
        ErrorResponse, HealthResponse, PaybackBody, PaybackPaidResponse, PaybackRejectedResponse,
    },
    state::AppState,
};

const DEFAULT_PAYBACK_NOTE: &str = "Manual payback";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router<S>(state: Arc<AppState<S>>) -> Router
where
    S: LedgerStore + 'static,
{
    Router::new()
        .route("/v1/health", get(health::<S>))
        .route("/v1/status", get(status_handler::<S>))
        .route("/v1/sweep", post(sweep::<S>))
        .route("/v1/payback", post(payback::<S>))
        .with_state(state)
}

fn internal_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("{err:#}"),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health<S: LedgerStore>(State(st): State<Arc<AppState<S>>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler<S: LedgerStore>(
    State(st): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    (StatusCode::OK, Json(st.snapshot().await))
}

// ---------------------------------------------------------------------------
// POST /v1/sweep
// ---------------------------------------------------------------------------

/// A halted sweep is still a 200: the report says where it stopped.
pub(crate) async fn sweep<S: LedgerStore>(State(st): State<Arc<AppState<S>>>) -> Response {
    match st.run_sweep().await {
        Ok(report) => {
            info!(
                sweep_id = %report.sweep_id,
                settled = report.settled.len(),
                halted = report.is_halted(),
                "sweep (manual)"
            );
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(err) => internal_error(err),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/payback
// ---------------------------------------------------------------------------

pub(crate) async fn payback<S: LedgerStore>(
    State(st): State<Arc<AppState<S>>>,
    Json(body): Json<PaybackBody>,
) -> Response {
    let amount = match Money::parse_decimal(&body.amount) {
        Ok(amount) => amount,
        Err(err) => {
            return rejected("INVALID_AMOUNT", format!("amount '{}': {err}", body.amount));
        }
    };

    let req = PaybackRequest {
        member_id: body.member_id,
        product_id: body.product_id,
        amount,
        note: body
            .note
            .unwrap_or_else(|| DEFAULT_PAYBACK_NOTE.to_string()),
    };

    match manual_payback(&st.store, &st.policy, &req, Utc::now()).await {
        Ok(PaybackOutcome::Paid {
            order_id,
            pending,
            completed,
        }) => {
            info!(member_id = req.member_id, order_id, amount = %amount, completed, "payback");
            (
                StatusCode::OK,
                Json(PaybackPaidResponse {
                    paid: true,
                    order_id,
                    pending,
                    completed,
                }),
            )
                .into_response()
        }
        Ok(PaybackOutcome::Rejected(reason)) => {
            warn!(member_id = req.member_id, code = reason.code(), "payback rejected");
            rejected(reason.code(), reason.to_string())
        }
        Err(err) => internal_error(err),
    }
}

fn rejected(reason: &str, message: String) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(PaybackRejectedResponse {
            paid: false,
            reason: reason.to_string(),
            message,
        }),
    )
        .into_response()
}
