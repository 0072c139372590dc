// =============================================================================
// Kline stream — bar-update push channel for one (symbol, interval)
// =============================================================================
//
// The base subscriber contract: connect once, deliver decoded bar updates to
// the series store until the stream ends, and return.  Graceful stream end is
// Ok, transport failure is Err.  Reconnection lives one layer up in the
// supervisor; this module never retries.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::market_data::series::{ApplyOutcome, SeriesKey, SeriesStore};
use crate::market_data::{Bar, WsStream};

/// Open the websocket for `<symbol>@kline_<interval>`.
pub async fn connect(symbol: &str, interval: &str) -> Result<WsStream> {
    let lower = symbol.to_lowercase();
    let url = format!("wss://stream.binance.com:9443/ws/{lower}@kline_{interval}");
    info!(url = %url, symbol = %symbol, interval = %interval, "connecting to kline stream");

    let (ws, _response) = connect_async(url.as_str())
        .await
        .context("failed to connect to kline stream")?;

    info!(symbol = %symbol, interval = %interval, "kline stream connected");
    Ok(ws)
}

/// Read the channel until it ends, routing each decoded bar through the
/// reconciler.  Messages apply in arrival order; decode failures skip the
/// frame.
pub async fn pump(
    ws: WsStream,
    store: &SeriesStore,
    key: &SeriesKey,
    version: &AtomicU64,
) -> Result<()> {
    let (_write, mut read) = ws.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_kline_frame(&text) {
                        Ok(bar) => {
                            let outcome = store.apply_update(key, bar);
                            debug!(
                                key = %key,
                                open_time = bar.open_time,
                                close = bar.close,
                                outcome = ?outcome,
                                "bar update applied"
                            );
                            if outcome != ApplyOutcome::DroppedStale {
                                version.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Err(e) => {
                            warn!(key = %key, error = %e, "failed to decode kline frame");
                        }
                    }
                }
                // Ping / Pong / Binary / Close frames need no handling here;
                // tungstenite answers pings itself.
            }
            Some(Err(e)) => {
                error!(key = %key, error = %e, "kline stream read error");
                return Err(e.into());
            }
            None => {
                warn!(key = %key, "kline stream ended");
                return Ok(());
            }
        }
    }
}

/// Decode one kline frame into a [`Bar`].
///
/// Expected shape (single-stream payload):
/// ```json
/// { "e": "kline", "s": "ETHUSDT", "k": { "t": ..., "o": "...", "h": "...", "l": "...", "c": "..." } }
/// ```
fn parse_kline_frame(text: &str) -> Result<Bar> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse kline JSON")?;

    let k = root
        .get("k")
        .context("kline frame missing field k")?;

    let open_time = k["t"].as_i64().context("missing field k.t")?;
    let open = parse_string_f64(&k["o"], "k.o")?;
    let high = parse_string_f64(&k["h"], "k.h")?;
    let low = parse_string_f64(&k["l"], "k.l")?;
    let close = parse_string_f64(&k["c"], "k.c")?;

    Ok(Bar::new(open_time, open, high, low, close))
}

/// Binance sends numeric values as JSON strings inside stream payloads.
pub(crate) fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}
