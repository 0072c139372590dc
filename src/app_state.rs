// =============================================================================
// Central Application State — Borealis Market Watch
// =============================================================================
//
// The single source of truth for the engine. All subsystems hold Arc
// references; AppState ties them together and provides a unified snapshot for
// the REST API and WebSocket feed.
//
// Thread safety:
//   - Atomic counters for lock-free version and generation tracking.
//   - parking_lot::RwLock for mutable shared collections.
//   - Single-writer discipline per key: only the reconciler mutates series,
//     only the ticker pump mutates the board.
//
// Focus generations: every focus activation bumps `focus_generation`, and
// every asynchronous completion (hydration, overlay) carries the generation
// it started under.  `apply_hydration` / `apply_overlay` reject results from
// a superseded generation so a slow fetch can never land on another
// instrument's state.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::market_data::series::SeriesKey;
use crate::market_data::supervisor::{ChannelRegistry, ChannelStatus};
use crate::market_data::{Bar, SeriesStore, TickerBoard, TickerSnapshot};
use crate::prediction::PredictionOverlay;
use crate::runtime_config::WatchConfig;
use crate::types::PriceDirection;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the snapshot's error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Human-readable error message.
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

// =============================================================================
// AppState
// =============================================================================

/// Central application state shared across all async tasks via
/// `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter. Bumped on every meaningful
    /// mutation; the WebSocket feed uses it to detect changes.
    pub state_version: Arc<AtomicU64>,

    /// WebSocket message sequence number (incremented per message sent).
    pub ws_sequence_number: AtomicU64,

    pub runtime_config: Arc<RwLock<WatchConfig>>,

    // ── Market data ─────────────────────────────────────────────────────
    pub series: Arc<SeriesStore>,
    pub tickers: Arc<TickerBoard>,
    pub overlays: RwLock<HashMap<String, PredictionOverlay>>,

    // ── Channels ────────────────────────────────────────────────────────
    pub channels: ChannelRegistry,

    // ── Focus ───────────────────────────────────────────────────────────
    focus: RwLock<Option<String>>,
    focus_generation: AtomicU64,
    hydrating: AtomicBool,

    // ── Error log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    /// Instant when the engine was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            state_version: Arc::new(AtomicU64::new(1)),
            ws_sequence_number: AtomicU64::new(0),
            runtime_config: Arc::new(RwLock::new(config)),
            series: Arc::new(SeriesStore::new()),
            tickers: Arc::new(TickerBoard::new()),
            overlays: RwLock::new(HashMap::new()),
            channels: ChannelRegistry::new(),
            focus: RwLock::new(None),
            focus_generation: AtomicU64::new(0),
            hydrating: AtomicBool::new(false),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error logging ───────────────────────────────────────────────────

    /// Record an error message. Oldest entries are evicted past
    /// [`MAX_RECENT_ERRORS`].
    pub fn push_error(&self, message: String) {
        let record = ErrorRecord {
            message,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }

        self.increment_version();
    }

    // ── Focus & generations ─────────────────────────────────────────────

    /// Switch the focused instrument. Returns the new generation; results of
    /// work started under an earlier generation will be rejected at apply
    /// time.
    pub fn begin_focus(&self, symbol: &str) -> u64 {
        *self.focus.write() = Some(symbol.to_uppercase());
        self.hydrating.store(true, Ordering::SeqCst);
        let generation = self.focus_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.increment_version();
        generation
    }

    pub fn focus(&self) -> Option<String> {
        self.focus.read().clone()
    }

    pub fn focus_generation(&self) -> u64 {
        self.focus_generation.load(Ordering::SeqCst)
    }

    pub fn is_hydrating(&self) -> bool {
        self.hydrating.load(Ordering::SeqCst)
    }

    /// Clear the hydration flag once the live backfill completed or failed,
    /// unless the focus has already moved on.
    pub fn hydration_settled(&self, generation: u64) {
        if generation == self.focus_generation() {
            self.hydrating.store(false, Ordering::SeqCst);
            self.increment_version();
        }
    }

    // ── Generation-guarded applies ──────────────────────────────────────

    /// Install a hydrated series unless `generation` has been superseded.
    /// Returns whether the result was applied.
    pub fn apply_hydration(&self, key: SeriesKey, bars: Vec<Bar>, generation: u64) -> bool {
        if generation != self.focus_generation() {
            return false;
        }
        self.series.replace(key, bars);
        self.increment_version();
        true
    }

    /// Install a prediction overlay unless `generation` has been superseded.
    /// Returns whether the result was applied.
    pub fn apply_overlay(
        &self,
        symbol: &str,
        overlay: PredictionOverlay,
        generation: u64,
    ) -> bool {
        if generation != self.focus_generation() {
            return false;
        }
        self.overlays.write().insert(symbol.to_string(), overlay);
        self.increment_version();
        true
    }

    // ── Snapshot builder ────────────────────────────────────────────────

    /// Build a complete, serialisable snapshot of the engine state.
    ///
    /// This is the payload behind `GET /api/v1/state` and the WebSocket push
    /// feed.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let config = self.runtime_config.read();
        let focus = self.focus.read().clone();

        let instruments = config
            .instruments
            .iter()
            .map(|inst| {
                let ticker = self.tickers.snapshot(&inst.symbol);
                let direction = ticker.as_ref().map(TickerSnapshot::direction).unwrap_or_default();
                InstrumentSnapshot {
                    symbol: inst.symbol.clone(),
                    pair: inst.display_pair(),
                    logo: inst.logo.clone(),
                    route: inst.route.clone(),
                    direction,
                    ticker,
                }
            })
            .collect();

        let series = focus.as_ref().and_then(|symbol| {
            let key = SeriesKey::new(symbol.clone(), config.live_interval.clone());
            self.series.snapshot(&key).map(|s| SeriesSnapshot {
                symbol: symbol.clone(),
                interval: config.live_interval.clone(),
                bars: s.bars().to_vec(),
            })
        });

        let overlay = focus
            .as_ref()
            .and_then(|symbol| self.overlays.read().get(symbol).cloned());

        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_s: self.start_time.elapsed().as_secs(),
            focus,
            hydrating: self.is_hydrating(),
            instruments,
            series,
            overlay,
            channels: self.channels.health_snapshot(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

/// Full engine state snapshot sent to dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_s: u64,

    /// Currently focused instrument, if any.
    pub focus: Option<String>,
    /// True until the focused instrument's first backfill settles.
    pub hydrating: bool,

    pub instruments: Vec<InstrumentSnapshot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<SeriesSnapshot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<PredictionOverlay>,

    pub channels: HashMap<String, ChannelStatus>,
    pub recent_errors: Vec<ErrorRecord>,
}

/// Per-instrument dashboard card: descriptor + live ticker + direction.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentSnapshot {
    pub symbol: String,
    pub pair: String,
    pub logo: String,
    pub route: String,
    pub direction: PriceDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<TickerSnapshot>,
}

/// The focused instrument's live chart series.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesSnapshot {
    pub symbol: String,
    pub interval: String,
    pub bars: Vec<Bar>,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bars() -> Vec<Bar> {
        vec![
            Bar::new(0, 100.0, 101.0, 99.0, 100.5),
            Bar::new(900_000, 100.5, 102.0, 100.0, 101.5),
        ]
    }

    #[test]
    fn begin_focus_bumps_generation_and_sets_hydrating() {
        let state = AppState::new(WatchConfig::default());
        assert_eq!(state.focus_generation(), 0);
        assert!(!state.is_hydrating());

        let gen1 = state.begin_focus("ethusdt");
        assert_eq!(gen1, 1);
        assert_eq!(state.focus(), Some("ETHUSDT".to_string()));
        assert!(state.is_hydrating());
    }

    // Instrument A's backfill is in flight when the user switches to B; A's
    // result must not land.
    #[test]
    fn stale_generation_hydration_is_discarded() {
        let state = AppState::new(WatchConfig::default());

        let gen_a = state.begin_focus("BNBUSDT");
        let _gen_b = state.begin_focus("ETHUSDT");

        let key_a = SeriesKey::new("BNBUSDT", "15m");
        assert!(!state.apply_hydration(key_a.clone(), sample_bars(), gen_a));
        assert_eq!(state.series.len(&key_a), 0);
    }

    #[test]
    fn current_generation_hydration_applies() {
        let state = AppState::new(WatchConfig::default());
        let generation = state.begin_focus("ETHUSDT");

        let key = SeriesKey::new("ETHUSDT", "15m");
        assert!(state.apply_hydration(key.clone(), sample_bars(), generation));
        assert_eq!(state.series.len(&key), 2);
    }

    #[test]
    fn stale_generation_overlay_is_discarded() {
        let state = AppState::new(WatchConfig::default());

        let gen_a = state.begin_focus("BNBUSDT");
        let overlay = PredictionOverlay::build(&sample_bars(), &[1.0]);
        let _gen_b = state.begin_focus("ETHUSDT");

        assert!(!state.apply_overlay("BNBUSDT", overlay, gen_a));
        assert!(state.overlays.read().is_empty());
    }

    #[test]
    fn hydration_settles_only_for_the_current_generation() {
        let state = AppState::new(WatchConfig::default());
        let gen_a = state.begin_focus("BNBUSDT");
        let _gen_b = state.begin_focus("ETHUSDT");

        state.hydration_settled(gen_a);
        assert!(state.is_hydrating());

        state.hydration_settled(state.focus_generation());
        assert!(!state.is_hydrating());
    }

    #[test]
    fn error_ring_is_bounded() {
        let state = AppState::new(WatchConfig::default());
        for i in 0..80 {
            state.push_error(format!("error {i}"));
        }
        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors.last().unwrap().message, "error 79");
    }

    #[test]
    fn snapshot_reflects_focus_and_series() {
        let state = AppState::new(WatchConfig::default());
        let generation = state.begin_focus("ETHUSDT");
        state.apply_hydration(SeriesKey::new("ETHUSDT", "15m"), sample_bars(), generation);
        state.hydration_settled(generation);

        let snapshot = state.build_snapshot();
        assert_eq!(snapshot.focus, Some("ETHUSDT".to_string()));
        assert!(!snapshot.hydrating);
        assert_eq!(snapshot.instruments.len(), 2);
        assert_eq!(snapshot.series.as_ref().unwrap().bars.len(), 2);
        assert!(snapshot.overlay.is_none());
    }
}
