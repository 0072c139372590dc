// =============================================================================
// Historical backfill — paginated kline retrieval over a bounded window
// =============================================================================
//
// Pages are requested from a cursor instant and concatenated in request order
// (already ascending).  The loop stops on: an empty page, a short page (the
// provider ran out of data inside the window), the cursor passing the window
// end, a page that fails to advance the cursor, or the max-pages bound.  The
// last two exist so that a misbehaving provider can never pin the loader in
// an endless loop.
// =============================================================================

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use crate::market_data::Bar;

/// One-day bucket width in milliseconds.
pub const DAY_MS: i64 = 86_400_000;

/// Source of kline pages. Implemented by the Binance REST client; tests
/// substitute scripted pages.
pub trait KlineSource: Send + Sync {
    fn klines<'a>(
        &'a self,
        symbol: &'a str,
        interval: &'a str,
        since_ms: i64,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<Bar>>>;
}

/// Bucket width of a bar interval in milliseconds.
pub fn interval_ms(interval: &str) -> Option<i64> {
    let ms = match interval {
        "1m" => 60_000,
        "3m" => 180_000,
        "5m" => 300_000,
        "15m" => 900_000,
        "30m" => 1_800_000,
        "1h" => 3_600_000,
        "2h" => 7_200_000,
        "4h" => 14_400_000,
        "1d" => DAY_MS,
        _ => return None,
    };
    Some(ms)
}

/// Load an ascending bar sequence covering `[since_ms, until_ms)`.
///
/// `until_ms` defaults to now.  Transport or decode failures abort the load;
/// callers are expected to degrade to an empty series rather than propagate.
pub async fn load_range(
    source: &dyn KlineSource,
    symbol: &str,
    interval: &str,
    since_ms: i64,
    until_ms: Option<i64>,
    page_limit: u32,
    max_pages: u32,
) -> Result<Vec<Bar>> {
    let step = interval_ms(interval)
        .with_context(|| format!("unknown bar interval '{interval}'"))?;
    let until = until_ms.unwrap_or_else(|| Utc::now().timestamp_millis());

    let mut cursor = since_ms;
    let mut pages: u32 = 0;
    let mut out: Vec<Bar> = Vec::new();

    loop {
        if cursor >= until {
            break;
        }
        if pages == max_pages {
            warn!(
                symbol,
                interval, max_pages, "backfill hit the page bound before exhausting the window"
            );
            break;
        }
        pages += 1;

        let bars = source.klines(symbol, interval, cursor, page_limit).await?;
        if bars.is_empty() {
            break;
        }

        let short_page = (bars.len() as u32) < page_limit;
        let last_open = bars.last().map(|b| b.open_time).unwrap_or(cursor);
        out.extend(bars);

        // Short page: the provider has nothing further inside the window.
        if short_page {
            break;
        }

        let next = last_open + step;
        if next <= cursor {
            warn!(
                symbol,
                interval,
                cursor,
                last_open,
                "kline page did not advance the cursor — stopping backfill"
            );
            break;
        }
        cursor = next;
    }

    debug!(symbol, interval, count = out.len(), "historical backfill complete");
    Ok(out)
}
