//! mls-daemon entry point.
//!
//! Thin on purpose: tracing, config, store, the scheduled sweep and the
//! HTTP server. Handlers live in `routes.rs`; shared state in `state.rs`.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use mls_config::{
    report_unused_keys, resolve_secrets, ConfigConsumer, LoadedConfig, UnusedKeyPolicy,
};
use mls_daemon::{routes, settings, state};
use mls_db::PgStore;
use mls_settlement::SettlementPolicy;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = settings::config_paths(std::env::var("MLS_CONFIG_PATHS").ok().as_deref());
    let loaded = load_config(&paths)?;
    let unused = report_unused_keys(
        ConfigConsumer::Daemon,
        &loaded.config_json,
        UnusedKeyPolicy::Warn,
    )?;
    if !unused.is_clean() {
        warn!(unused = ?unused.unused_leaf_pointers, "config contains keys the daemon does not read");
    }

    let policy = SettlementPolicy::from_config_json(&loaded.config_json)?;
    let interval = settings::sweep_interval(&loaded.config_json)?;
    let addr = settings::bind_addr(std::env::var("MLS_DAEMON_ADDR").ok().as_deref())?;

    let secrets = resolve_secrets(&loaded.config_json);
    let pool = mls_db::connect(secrets.require_database_url()?).await?;
    let store = PgStore::new(pool);

    info!(config_hash = %loaded.config_hash, interval_secs = interval.as_secs(), "config loaded");

    let shared = Arc::new(state::AppState::new(store, policy, loaded.config_hash));
    state::spawn_sweep_loop(Arc::clone(&shared), interval);

    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    info!("mls-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn load_config(paths: &[String]) -> anyhow::Result<LoadedConfig> {
    if paths.is_empty() {
        warn!("MLS_CONFIG_PATHS not set; running on built-in defaults");
        return LoadedConfig::empty();
    }
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    mls_config::load_layered_yaml(&refs)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl_c listener failed; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
