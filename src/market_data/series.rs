// =============================================================================
// Bar series — ordered OHLC buckets and the streamed-update reconciler
// =============================================================================
//
// A BarSeries holds the bars for one (symbol, interval) pair, strictly
// ascending by open time with at most one bar per bucket.  The live chart
// series and the daily prediction series for the same symbol are separate
// keys and are never merged with each other.
//
// After hydration the only mutation path is `BarSeries::apply`, which either
// redraws the in-progress last bucket, appends a new one, or drops an update
// that arrived too late.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLC bar. Derived from the raw Binance kline row
/// `[openTime, open, high, low, close, volume, ...]`; trailing elements are
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bucket open time, UNIX milliseconds.
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
        }
    }
}

/// Composite key that identifies a unique bar series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub interval: String,
}

impl SeriesKey {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

/// What `BarSeries::apply` did with a streamed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The update opened a new bucket and was appended.
    Appended,
    /// The update redrew the in-progress last bucket (last write wins).
    Replaced,
    /// The update was older than the last bucket and was discarded.
    DroppedStale,
}

// ---------------------------------------------------------------------------
// BarSeries
// ---------------------------------------------------------------------------

/// Ordered bar sequence for one (symbol, interval), ascending by open time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new() -> Self {
        Self { bars: Vec::new() }
    }

    /// Build a series from an already-ascending hydration result.
    pub fn from_bars(bars: Vec<Bar>) -> Self {
        Self { bars }
    }

    /// Merge one streamed update into the series.
    ///
    /// * If the update has the same bucket as the last bar it replaces it
    ///   (the in-progress bar being redrawn).
    /// * If it is strictly newer it is appended.
    /// * If it is strictly older it is dropped and the series is untouched.
    ///
    /// The replace/append split is what keeps open times strictly increasing
    /// and buckets unique.
    pub fn apply(&mut self, bar: Bar) -> ApplyOutcome {
        match self.bars.last_mut() {
            Some(last) if last.open_time == bar.open_time => {
                *last = bar;
                ApplyOutcome::Replaced
            }
            Some(last) if bar.open_time < last.open_time => ApplyOutcome::DroppedStale,
            _ => {
                self.bars.push(bar);
                ApplyOutcome::Appended
            }
        }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// The most recent `count` close prices, oldest first.
    pub fn trailing_closes(&self, count: usize) -> Vec<f64> {
        let start = self.bars.len().saturating_sub(count);
        self.bars[start..].iter().map(|b| b.close).collect()
    }
}

// ---------------------------------------------------------------------------
// SeriesStore — keyed store, single writer per key
// ---------------------------------------------------------------------------

/// Thread-safe map from `SeriesKey` to its `BarSeries`.
///
/// Mutation goes through `replace` (hydration) and `apply_update` (stream
/// reconciliation) only; everything else reads cloned snapshots, never the
/// live series.
pub struct SeriesStore {
    series: RwLock<HashMap<SeriesKey, BarSeries>>,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Install a hydrated series wholesale, superseding whatever the key held
    /// (including updates that streamed in while hydration was in flight).
    pub fn replace(&self, key: SeriesKey, bars: Vec<Bar>) {
        self.series.write().insert(key, BarSeries::from_bars(bars));
    }

    /// Reset a key to an empty series.
    pub fn clear(&self, key: &SeriesKey) {
        self.series.write().insert(key.clone(), BarSeries::new());
    }

    /// Route one streamed update through the reconciler.
    pub fn apply_update(&self, key: &SeriesKey, bar: Bar) -> ApplyOutcome {
        let mut map = self.series.write();
        let series = map.entry(key.clone()).or_default();
        let outcome = series.apply(bar);
        if outcome == ApplyOutcome::DroppedStale {
            debug!(key = %key, open_time = bar.open_time, "stale bar update dropped");
        }
        outcome
    }

    /// Cloned snapshot of a series, if the key exists.
    pub fn snapshot(&self, key: &SeriesKey) -> Option<BarSeries> {
        self.series.read().get(key).cloned()
    }

    pub fn len(&self, key: &SeriesKey) -> usize {
        self.series.read().get(key).map_or(0, BarSeries::len)
    }
}

impl Default for SeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_15: i64 = 15 * 60 * 1000;

    fn sample_bar(open_time: i64, close: f64) -> Bar {
        Bar::new(open_time, close, close + 1.0, close - 1.0, close)
    }

    fn make_key() -> SeriesKey {
        SeriesKey::new("ETHUSDT", "15m")
    }

    #[test]
    fn applied_updates_keep_open_times_strictly_increasing() {
        let mut series = BarSeries::new();
        for t in [0, 2, 1, 2, 5, 3, 5, 9] {
            series.apply(sample_bar(t * MIN_15, 100.0 + t as f64));
        }
        let times: Vec<i64> = series.bars().iter().map(|b| b.open_time).collect();
        let mut sorted = times.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(times, sorted);
    }

    #[test]
    fn same_bucket_update_is_last_write_wins() {
        let mut series = BarSeries::new();
        series.apply(sample_bar(0, 100.0));
        series.apply(Bar::new(0, 100.0, 105.0, 99.0, 104.0));
        assert_eq!(series.len(), 1);
        let last = series.last().unwrap();
        assert!((last.close - 104.0).abs() < f64::EPSILON);
        assert!((last.high - 105.0).abs() < f64::EPSILON);
    }

    #[test]
    fn newer_update_appends_exactly_one() {
        let mut series = BarSeries::from_bars(vec![sample_bar(0, 100.0)]);
        let outcome = series.apply(sample_bar(MIN_15, 101.0));
        assert_eq!(outcome, ApplyOutcome::Appended);
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn same_bucket_update_never_changes_length() {
        let mut series = BarSeries::from_bars(vec![sample_bar(0, 100.0), sample_bar(MIN_15, 101.0)]);
        let outcome = series.apply(sample_bar(MIN_15, 150.0));
        assert_eq!(outcome, ApplyOutcome::Replaced);
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn stale_update_leaves_series_unchanged() {
        let mut series = BarSeries::from_bars(vec![sample_bar(0, 100.0), sample_bar(MIN_15, 101.0)]);
        let before = series.bars().to_vec();
        let outcome = series.apply(sample_bar(0, 999.0));
        assert_eq!(outcome, ApplyOutcome::DroppedStale);
        assert_eq!(series.bars(), &before[..]);
    }

    #[test]
    fn first_update_on_empty_series_appends() {
        let mut series = BarSeries::new();
        assert_eq!(series.apply(sample_bar(0, 100.0)), ApplyOutcome::Appended);
        assert_eq!(series.len(), 1);
    }

    // Hydrate bars at t = 0, 15, 30 minutes; a streamed update at t=30 redraws
    // the last bucket, then t=45 opens a fourth.
    #[test]
    fn hydrate_then_stream_scenario() {
        let store = SeriesStore::new();
        let key = make_key();

        store.replace(
            key.clone(),
            vec![
                sample_bar(0, 100.0),
                sample_bar(MIN_15, 101.0),
                sample_bar(2 * MIN_15, 102.0),
            ],
        );

        let redraw = Bar::new(2 * MIN_15, 102.0, 103.5, 101.5, 103.0);
        assert_eq!(store.apply_update(&key, redraw), ApplyOutcome::Replaced);
        assert_eq!(store.len(&key), 3);

        assert_eq!(
            store.apply_update(&key, sample_bar(3 * MIN_15, 104.0)),
            ApplyOutcome::Appended
        );

        let snap = store.snapshot(&key).unwrap();
        assert_eq!(snap.len(), 4);
        let times: Vec<i64> = snap.bars().iter().map(|b| b.open_time).collect();
        assert_eq!(times, vec![0, MIN_15, 2 * MIN_15, 3 * MIN_15]);
        assert!((snap.bars()[2].close - 103.0).abs() < f64::EPSILON);
    }

    #[test]
    fn replace_supersedes_updates_streamed_during_hydration() {
        let store = SeriesStore::new();
        let key = make_key();

        // Updates arriving before hydration land in an empty series...
        store.apply_update(&key, sample_bar(2 * MIN_15, 102.5));
        // ...and are superseded when the hydration result is installed.
        store.replace(key.clone(), vec![sample_bar(0, 100.0), sample_bar(MIN_15, 101.0)]);
        assert_eq!(store.len(&key), 2);
    }

    #[test]
    fn live_and_daily_series_are_independent() {
        let store = SeriesStore::new();
        let live = SeriesKey::new("ETHUSDT", "15m");
        let daily = SeriesKey::new("ETHUSDT", "1d");

        store.replace(live.clone(), vec![sample_bar(0, 100.0)]);
        store.replace(daily.clone(), vec![sample_bar(0, 90.0), sample_bar(86_400_000, 95.0)]);

        assert_eq!(store.len(&live), 1);
        assert_eq!(store.len(&daily), 2);
    }

    #[test]
    fn trailing_closes_takes_most_recent() {
        let series = BarSeries::from_bars(vec![
            sample_bar(0, 1.0),
            sample_bar(MIN_15, 2.0),
            sample_bar(2 * MIN_15, 3.0),
        ]);
        assert_eq!(series.trailing_closes(2), vec![2.0, 3.0]);
        assert_eq!(series.trailing_closes(10), vec![1.0, 2.0, 3.0]);
    }
}
