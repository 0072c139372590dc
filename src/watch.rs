// =============================================================================
// Focus orchestration — instrument activation and switching
// =============================================================================
//
// Activating an instrument is the "detail view opens" moment: the previous
// bar-update channel is torn down, the live series is reset and rehydrated,
// and the prediction overlay is refreshed.  All asynchronous completions
// carry the focus generation minted here and are checked at apply time, so a
// fetch that resolves after the next switch is discarded instead of landing
// on the wrong instrument.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::binance::BinanceClient;
use crate::market_data::history;
use crate::market_data::series::SeriesKey;
use crate::market_data::supervisor::{self, ChannelKey};
use crate::prediction::{self, PredictionClient};
use crate::types::{Instrument, StreamTopic};

/// Make `symbol` the focused instrument.
///
/// Fails only on an unknown symbol; everything downstream (backfill,
/// streaming, prediction) degrades on its own and never propagates back.
pub async fn activate_instrument(
    state: &Arc<AppState>,
    market: &Arc<BinanceClient>,
    predictor: &Arc<PredictionClient>,
    symbol: &str,
) -> Result<Instrument> {
    let instrument = state
        .runtime_config
        .read()
        .instrument(symbol)
        .cloned()
        .with_context(|| format!("'{symbol}' is not a configured instrument"))?;

    let previous = state.focus();
    let generation = state.begin_focus(&instrument.symbol);

    // The old detail view's bar channel must be gone before the new one
    // opens, so stale deliveries cannot touch the wrong series.
    if let Some(prev) = previous.filter(|p| p != &instrument.symbol) {
        state
            .channels
            .shutdown(&ChannelKey::new(prev, StreamTopic::BarUpdates));
    }

    let (live_interval, lookback_hours, page_limit, max_pages) = {
        let config = state.runtime_config.read();
        (
            config.live_interval.clone(),
            config.chart_lookback_hours,
            config.klines_page_limit,
            config.max_history_pages,
        )
    };

    // Fresh, empty series while hydration runs; the hydration result
    // supersedes whatever streams in meanwhile.
    let live_key = SeriesKey::new(instrument.symbol.clone(), live_interval.clone());
    state.series.clear(&live_key);

    supervisor::spawn_kline_channel(state, &instrument.symbol, &live_interval, generation);

    // Live-series hydration.
    {
        let state = state.clone();
        let market = market.clone();
        let symbol = instrument.symbol.clone();
        let interval = live_interval.clone();
        tokio::spawn(async move {
            let since = Utc::now().timestamp_millis() - (lookback_hours as i64) * 3_600_000;
            match history::load_range(
                &*market, &symbol, &interval, since, None, page_limit, max_pages,
            )
            .await
            {
                Ok(bars) => {
                    let count = bars.len();
                    let key = SeriesKey::new(symbol.clone(), interval);
                    if state.apply_hydration(key, bars, generation) {
                        info!(symbol = %symbol, bars = count, "live series hydrated");
                    } else {
                        debug!(symbol = %symbol, "hydration superseded by focus change");
                    }
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "live backfill failed — series stays empty");
                    state.push_error(format!("live backfill for {symbol}: {e}"));
                }
            }
            state.hydration_settled(generation);
        });
    }

    // Prediction overlay refresh.
    tokio::spawn(prediction::refresh_overlay(
        state.clone(),
        market.clone(),
        predictor.clone(),
        instrument.clone(),
        generation,
    ));

    info!(symbol = %instrument.symbol, generation, "instrument activated");
    Ok(instrument)
}
