// =============================================================================
// Borealis Market Watch — Main Entry Point
// =============================================================================
//
// Boot order: config, shared state, ticker channels for every instrument,
// API server, then the initial focus activation (live backfill + bar channel
// + prediction overlay for the first configured instrument).
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod binance;
mod market_data;
mod prediction;
mod runtime_config;
mod types;
mod watch;

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiContext;
use crate::app_state::AppState;
use crate::binance::BinanceClient;
use crate::market_data::supervisor;
use crate::prediction::PredictionClient;
use crate::runtime_config::WatchConfig;

const CONFIG_PATH: &str = "watch_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Borealis Market Watch — Starting Up              ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = WatchConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        WatchConfig::default()
    });

    // Restrict the instrument list from env if requested.
    if let Ok(syms) = std::env::var("BOREALIS_SYMBOLS") {
        let wanted: Vec<String> = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !wanted.is_empty() {
            config.instruments.retain(|i| wanted.contains(&i.symbol));
        }
    }
    if let Ok(url) = std::env::var("BOREALIS_PREDICTOR_URL") {
        config.predictor_base_url = url;
    }
    if config.instruments.is_empty() {
        anyhow::bail!("no instruments configured");
    }

    let symbols: Vec<String> = config.instruments.iter().map(|i| i.symbol.clone()).collect();
    info!(instruments = ?symbols, "Configured instruments");

    // ── 2. Build shared state & clients ──────────────────────────────────
    let predictor_url = config.predictor_base_url.clone();
    let state = Arc::new(AppState::new(config));
    let market = Arc::new(BinanceClient::new());
    let predictor = Arc::new(PredictionClient::new(predictor_url));

    // ── 3. Ticker channels for every tracked instrument ──────────────────
    for symbol in &symbols {
        supervisor::spawn_ticker_channel(&state, symbol);
    }
    info!(count = symbols.len(), "Ticker channels launched");

    // ── 4. Start the API server ──────────────────────────────────────────
    let ctx = ApiContext {
        state: state.clone(),
        market: market.clone(),
        predictor: predictor.clone(),
    };
    let bind_addr = std::env::var("BOREALIS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    {
        let bind_addr = bind_addr.clone();
        tokio::spawn(async move {
            let app = api::rest::router(ctx);
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .expect("Failed to bind API server");
            info!(addr = %bind_addr, "API server listening");
            axum::serve(listener, app).await.expect("API server failed");
        });
    }

    // ── 5. Focus the first instrument ────────────────────────────────────
    if let Some(first) = symbols.first() {
        if let Err(e) = watch::activate_instrument(&state, &market, &predictor, first).await {
            error!(symbol = %first, error = %e, "Initial activation failed");
        }
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save watch config on shutdown");
    }

    info!("Borealis Market Watch shut down complete.");
    Ok(())
}
