// =============================================================================
// Binance REST client — public market data only
// =============================================================================
//
// The watch engine never trades, so only the unsigned klines endpoint is
// used.  Binance returns numeric values as JSON strings; everything funnels
// through one parse helper.  The weight tracker is fed from every response so
// the paginated backfill can throttle itself.
// =============================================================================

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use tracing::{debug, instrument, warn};

use crate::binance::rate_limit::RateLimitTracker;
use crate::market_data::history::KlineSource;
use crate::market_data::Bar;

/// Request weight of GET /api/v3/klines at our page sizes.
const KLINES_WEIGHT: u32 = 2;

/// REST client for Binance public market data.
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
    limits: RateLimitTracker,
}

impl BinanceClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("BinanceClient initialised (base_url=https://api.binance.com)");

        Self {
            base_url: "https://api.binance.com".to_string(),
            client,
            limits: RateLimitTracker::new(),
        }
    }

    pub fn rate_limits(&self) -> &RateLimitTracker {
        &self.limits
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/klines (public — no signature required).
    ///
    /// Returns parsed [`Bar`]s from Binance's array-of-arrays response.
    ///
    /// Array indices:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume, ...
    /// Only the first five matter to the series model; the rest are ignored.
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Bar>> {
        if !self.limits.can_send_request(KLINES_WEIGHT) {
            anyhow::bail!("klines request for {symbol} blocked by rate limit");
        }

        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );
        if let Some(start) = start_time {
            url.push_str(&format!("&startTime={start}"));
        }

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/klines request failed")?;

        self.limits.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /api/v3/klines returned {}: {}", status, body);
        }

        let raw = body.as_array().context("klines response is not an array")?;

        let mut bars = Vec::with_capacity(raw.len());
        for entry in raw {
            let row = entry.as_array().context("kline entry is not an array")?;
            if row.len() < 6 {
                warn!("skipping malformed kline row with {} elements", row.len());
                continue;
            }

            let open_time = row[0].as_i64().context("kline openTime is not an integer")?;
            let open = Self::parse_str_f64(&row[1])?;
            let high = Self::parse_str_f64(&row[2])?;
            let low = Self::parse_str_f64(&row[3])?;
            let close = Self::parse_str_f64(&row[4])?;

            bars.push(Bar::new(open_time, open, high, low, close));
        }

        debug!(symbol, interval, count = bars.len(), "klines fetched");
        Ok(bars)
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    /// Parse a JSON value that may be either a string or a number into `f64`.
    fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl KlineSource for BinanceClient {
    fn klines<'a>(
        &'a self,
        symbol: &'a str,
        interval: &'a str,
        since_ms: i64,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<Bar>>> {
        Box::pin(self.get_klines(symbol, interval, Some(since_ms), limit))
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_str_f64_accepts_strings_and_numbers() {
        let s = serde_json::Value::String("37020.55".to_string());
        assert!((BinanceClient::parse_str_f64(&s).unwrap() - 37020.55).abs() < f64::EPSILON);

        let n = serde_json::json!(42.5);
        assert!((BinanceClient::parse_str_f64(&n).unwrap() - 42.5).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_str_f64_rejects_other_types() {
        assert!(BinanceClient::parse_str_f64(&serde_json::Value::Null).is_err());
        assert!(BinanceClient::parse_str_f64(&serde_json::json!(true)).is_err());
        assert!(BinanceClient::parse_str_f64(&serde_json::json!("abc")).is_err());
    }
}
