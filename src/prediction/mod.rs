// =============================================================================
// Prediction pipeline — daily backfill, trailing window, overlay refresh
// =============================================================================

pub mod client;
pub mod overlay;

pub use client::PredictionClient;
pub use overlay::PredictionOverlay;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::app_state::AppState;
use crate::binance::BinanceClient;
use crate::market_data::history::{self, DAY_MS};
use crate::market_data::SeriesKey;
use crate::types::Instrument;

/// Rebuild the prediction overlay for `instrument`.
///
/// Loads the daily series over the configured lookback, feeds the trailing
/// window of close prices to the predictor, and installs the resulting
/// overlay.  Both installs are gated on `generation` at apply time so a
/// result that outlives a focus switch is discarded.  Every failure path
/// degrades (no overlay, or historical-only) instead of propagating.
pub async fn refresh_overlay(
    state: Arc<AppState>,
    market: Arc<BinanceClient>,
    predictor: Arc<PredictionClient>,
    instrument: Instrument,
    generation: u64,
) {
    let (interval, lookback_days, window, page_limit, max_pages) = {
        let config = state.runtime_config.read();
        (
            config.prediction_interval.clone(),
            config.prediction_lookback_days,
            config.prediction_window,
            config.klines_page_limit,
            config.max_history_pages,
        )
    };

    let since = Utc::now().timestamp_millis() - (lookback_days as i64) * DAY_MS;

    let bars = match history::load_range(
        &*market,
        &instrument.symbol,
        &interval,
        since,
        None,
        page_limit,
        max_pages,
    )
    .await
    {
        Ok(bars) => bars,
        Err(e) => {
            warn!(symbol = %instrument.symbol, error = %e, "daily backfill failed — no overlay");
            state.push_error(format!("daily backfill for {}: {e}", instrument.symbol));
            return;
        }
    };

    if bars.is_empty() {
        warn!(symbol = %instrument.symbol, "daily backfill returned nothing — no overlay");
        return;
    }

    let daily_key = SeriesKey::new(instrument.symbol.clone(), interval);
    if !state.apply_hydration(daily_key.clone(), bars, generation) {
        debug!(symbol = %instrument.symbol, "daily series superseded by focus change");
        return;
    }

    let Some(daily) = state.series.snapshot(&daily_key) else {
        return;
    };
    let closes = daily.trailing_closes(window);

    let forecast = match predictor
        .predict(&instrument.prediction_symbol(), &closes)
        .await
    {
        Ok(forecast) => forecast,
        Err(e) => {
            warn!(symbol = %instrument.symbol, error = %e, "prediction unavailable — historical-only overlay");
            state.push_error(format!("prediction for {}: {e}", instrument.symbol));
            Vec::new()
        }
    };

    let overlay = PredictionOverlay::build(daily.bars(), &forecast);
    if !state.apply_overlay(&instrument.symbol, overlay, generation) {
        debug!(symbol = %instrument.symbol, "overlay superseded by focus change");
    }
}
