// =============================================================================
// Ticker stream — latest-snapshot tracker fed by the per-symbol ticker channel
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::market_data::kline_stream::parse_string_f64;
use crate::market_data::WsStream;
use crate::types::PriceDirection;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Latest 24h ticker state for one instrument.
///
/// `previous_price` is the price immediately before the current update was
/// applied. It is captured when the update lands, never reconstructed from
/// bars.
#[derive(Debug, Clone, Serialize)]
pub struct TickerSnapshot {
    pub price: f64,
    pub change: f64,
    pub volume: f64,
    pub low: f64,
    pub high: f64,
    pub open: f64,
    pub previous_price: Option<f64>,
}

impl TickerSnapshot {
    /// Directional movement versus the previous price, for dashboard
    /// colouring.
    pub fn direction(&self) -> PriceDirection {
        PriceDirection::from_prices(self.price, self.previous_price)
    }
}

/// One decoded ticker message.
#[derive(Debug, Clone, Copy)]
pub struct TickerUpdate {
    pub price: f64,
    pub change: f64,
    pub volume: f64,
    pub low: f64,
    pub high: f64,
    pub open: f64,
}

// ---------------------------------------------------------------------------
// TickerBoard — keyed store, single writer per key
// ---------------------------------------------------------------------------

/// Thread-safe map from symbol to its latest [`TickerSnapshot`].
pub struct TickerBoard {
    inner: RwLock<HashMap<String, TickerSnapshot>>,
}

impl TickerBoard {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Overwrite a symbol's snapshot from one ticker message, capturing the
    /// outgoing price as `previous_price` in the same write.  The first
    /// message for a symbol has no previous price.
    pub fn apply_tick(&self, symbol: &str, update: TickerUpdate) {
        let mut map = self.inner.write();
        let previous_price = map.get(symbol).map(|s| s.price);
        map.insert(
            symbol.to_string(),
            TickerSnapshot {
                price: update.price,
                change: update.change,
                volume: update.volume,
                low: update.low,
                high: update.high,
                open: update.open,
                previous_price,
            },
        );
    }

    pub fn snapshot(&self, symbol: &str) -> Option<TickerSnapshot> {
        self.inner.read().get(symbol).cloned()
    }
}

impl Default for TickerBoard {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Ticker websocket channel
// ---------------------------------------------------------------------------

/// Open the websocket for `<symbol>@ticker`.
pub async fn connect(symbol: &str) -> Result<WsStream> {
    let lower = symbol.to_lowercase();
    let url = format!("wss://stream.binance.com:9443/ws/{lower}@ticker");
    info!(url = %url, symbol = %symbol, "connecting to ticker stream");

    let (ws, _response) = connect_async(url.as_str())
        .await
        .context("failed to connect to ticker stream")?;

    info!(symbol = %symbol, "ticker stream connected");
    Ok(ws)
}

/// Read the channel until it ends, applying each decoded message to the
/// board.  Graceful stream end is Ok, transport failure is Err; reconnection
/// is the supervisor's job.
pub async fn pump(
    ws: WsStream,
    symbol: &str,
    board: &TickerBoard,
    version: &AtomicU64,
) -> Result<()> {
    let (_write, mut read) = ws.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_ticker_frame(&text) {
                        Ok(update) => {
                            board.apply_tick(symbol, update);
                            version.fetch_add(1, Ordering::Relaxed);
                            debug!(symbol = %symbol, price = update.price, "ticker applied");
                        }
                        Err(e) => {
                            warn!(symbol = %symbol, error = %e, "failed to decode ticker frame");
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(symbol = %symbol, error = %e, "ticker stream read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, "ticker stream ended");
                return Ok(());
            }
        }
    }
}

/// Decode one 24h-ticker frame.
///
/// Expected shape (string-encoded numerics):
/// ```json
/// { "e": "24hrTicker", "s": "ETHUSDT",
///   "c": "2005.25", "p": "12.50", "v": "98765.4", "l": "1980.0", "h": "2020.0", "o": "1992.75" }
/// ```
fn parse_ticker_frame(text: &str) -> Result<TickerUpdate> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse ticker JSON")?;

    Ok(TickerUpdate {
        price: parse_string_f64(&root["c"], "c")?,
        change: parse_string_f64(&root["p"], "p")?,
        volume: parse_string_f64(&root["v"], "v")?,
        low: parse_string_f64(&root["l"], "l")?,
        high: parse_string_f64(&root["h"], "h")?,
        open: parse_string_f64(&root["o"], "o")?,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn update(price: f64) -> TickerUpdate {
        TickerUpdate {
            price,
            change: 1.5,
            volume: 1000.0,
            low: price - 10.0,
            high: price + 10.0,
            open: price - 5.0,
        }
    }

    #[test]
    fn first_tick_has_no_previous_price() {
        let board = TickerBoard::new();
        board.apply_tick("ETHUSDT", update(2000.0));

        let snap = board.snapshot("ETHUSDT").unwrap();
        assert!((snap.price - 2000.0).abs() < f64::EPSILON);
        assert!(snap.previous_price.is_none());
        assert_eq!(snap.direction(), PriceDirection::Neutral);
    }

    #[test]
    fn previous_price_is_captured_on_overwrite() {
        let board = TickerBoard::new();
        board.apply_tick("ETHUSDT", update(2000.0));
        board.apply_tick("ETHUSDT", update(2010.0));

        let snap = board.snapshot("ETHUSDT").unwrap();
        assert!((snap.price - 2010.0).abs() < f64::EPSILON);
        assert_eq!(snap.previous_price, Some(2000.0));
        assert_eq!(snap.direction(), PriceDirection::Up);

        board.apply_tick("ETHUSDT", update(1995.0));
        let snap = board.snapshot("ETHUSDT").unwrap();
        assert_eq!(snap.previous_price, Some(2010.0));
        assert_eq!(snap.direction(), PriceDirection::Down);
    }

    #[test]
    fn symbols_are_tracked_independently() {
        let board = TickerBoard::new();
        board.apply_tick("ETHUSDT", update(2000.0));
        board.apply_tick("BNBUSDT", update(300.0));

        assert!((board.snapshot("ETHUSDT").unwrap().price - 2000.0).abs() < f64::EPSILON);
        assert!((board.snapshot("BNBUSDT").unwrap().price - 300.0).abs() < f64::EPSILON);
        assert!(board.snapshot("XRPUSDT").is_none());
    }

    #[test]
    fn parse_ticker_frame_ok() {
        let json = r#"{
            "e": "24hrTicker", "s": "ETHUSDT",
            "c": "2005.25", "p": "12.50", "v": "98765.4",
            "l": "1980.00", "h": "2020.00", "o": "1992.75"
        }"#;
        let update = parse_ticker_frame(json).expect("should parse");
        assert!((update.price - 2005.25).abs() < f64::EPSILON);
        assert!((update.change - 12.50).abs() < f64::EPSILON);
        assert!((update.open - 1992.75).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_ticker_frame_missing_field() {
        let json = r#"{ "e": "24hrTicker", "s": "ETHUSDT", "c": "2005.25" }"#;
        assert!(parse_ticker_frame(json).is_err());
    }
}
