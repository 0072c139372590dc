// =============================================================================
// REST API Endpoints — read-only watch surface
// =============================================================================
//
// All endpoints live under `/api/v1/`. The health probe is public; everything
// else requires a Bearer token via the `AuthBearer` extractor. Dashboards are
// served from anywhere, so CORS is permissive.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::auth::AuthBearer;
use crate::app_state::{AppState, SeriesSnapshot};
use crate::binance::BinanceClient;
use crate::market_data::series::SeriesKey;
use crate::prediction::PredictionClient;
use crate::watch;

/// Everything a handler needs: shared state plus the outbound clients used
/// by the focus endpoint.
#[derive(Clone)]
pub struct ApiContext {
    pub state: Arc<AppState>,
    pub market: Arc<BinanceClient>,
    pub predictor: Arc<PredictionClient>,
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared context.
pub fn router(ctx: ApiContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/instruments", get(instruments))
        .route("/api/v1/series/:symbol", get(series))
        .route("/api/v1/overlay/:symbol", get(overlay))
        .route("/api/v1/focus", post(set_focus))
        // ── WebSocket ───────────────────────────────────────────────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(ctx)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
    rate_limit: crate::binance::rate_limit::RateLimitSnapshot,
}

async fn health(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: ctx.state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
        rate_limit: ctx.market.rate_limits().snapshot(),
    })
}

// =============================================================================
// State & instruments (authenticated)
// =============================================================================

async fn full_state(_auth: AuthBearer, State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(ctx.state.build_snapshot())
}

async fn instruments(_auth: AuthBearer, State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(ctx.state.build_snapshot().instruments)
}

// =============================================================================
// Series & overlay (authenticated)
// =============================================================================

async fn series(
    _auth: AuthBearer,
    State(ctx): State<ApiContext>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = symbol.to_uppercase();
    let interval = ctx.state.runtime_config.read().live_interval.clone();
    let key = SeriesKey::new(symbol.clone(), interval.clone());

    match ctx.state.series.snapshot(&key) {
        Some(s) => Json(SeriesSnapshot {
            symbol,
            interval,
            bars: s.bars().to_vec(),
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("no series for {symbol}") })),
        )
            .into_response(),
    }
}

async fn overlay(
    _auth: AuthBearer,
    State(ctx): State<ApiContext>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = symbol.to_uppercase();
    match ctx.state.overlays.read().get(&symbol) {
        Some(overlay) => Json(overlay.clone()).into_response(),
        None => {
            let body =
                serde_json::json!({ "overlay": null, "message": "no prediction available yet" });
            Json(body).into_response()
        }
    }
}

// =============================================================================
// Focus (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct FocusRequest {
    symbol: String,
}

async fn set_focus(
    _auth: AuthBearer,
    State(ctx): State<ApiContext>,
    Json(req): Json<FocusRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    match watch::activate_instrument(&ctx.state, &ctx.market, &ctx.predictor, &req.symbol).await {
        Ok(instrument) => {
            info!(symbol = %instrument.symbol, "focus changed via API");
            Ok(Json(serde_json::json!({
                "focus": instrument.symbol,
                "pair": instrument.display_pair(),
            })))
        }
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )),
    }
}
