// =============================================================================
// Runtime Configuration — watch-engine settings with atomic save
// =============================================================================
//
// Every tunable of the engine lives here: the tracked instrument list, bar
// granularities, lookback windows, the predictor endpoint, and the stream
// retry policy.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Instrument;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_instruments() -> Vec<Instrument> {
    vec![
        Instrument::new("BNB", "USDT", "./assets/bnb.svg", "/bnb"),
        Instrument::new("ETH", "USDT", "./assets/ethereum.svg", "/eth"),
    ]
}

fn default_live_interval() -> String {
    "15m".to_string()
}

fn default_chart_lookback_hours() -> u64 {
    48
}

fn default_prediction_interval() -> String {
    "1d".to_string()
}

fn default_prediction_lookback_days() -> u64 {
    180
}

fn default_prediction_window() -> usize {
    60
}

fn default_predictor_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_klines_page_limit() -> u32 {
    500
}

fn default_max_history_pages() -> u32 {
    64
}

fn default_stream_max_attempts() -> u32 {
    10
}

fn default_stream_backoff_base_ms() -> u64 {
    500
}

fn default_stream_backoff_cap_ms() -> u64 {
    30_000
}

// =============================================================================
// WatchConfig
// =============================================================================

/// Top-level runtime configuration for the Borealis watch engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    // --- Instruments ---------------------------------------------------------

    /// Trading pairs the engine tracks.
    #[serde(default = "default_instruments")]
    pub instruments: Vec<Instrument>,

    // --- Chart series --------------------------------------------------------

    /// Bar granularity of the live price-chart series.
    #[serde(default = "default_live_interval")]
    pub live_interval: String,

    /// How far back the live series is hydrated on focus (hours).
    #[serde(default = "default_chart_lookback_hours")]
    pub chart_lookback_hours: u64,

    // --- Prediction ----------------------------------------------------------

    /// Bar granularity of the series fed to the predictor.
    #[serde(default = "default_prediction_interval")]
    pub prediction_interval: String,

    /// How far back the prediction series is loaded (days).
    #[serde(default = "default_prediction_lookback_days")]
    pub prediction_lookback_days: u64,

    /// Number of trailing close prices submitted to the predictor.
    #[serde(default = "default_prediction_window")]
    pub prediction_window: usize,

    /// Base URL of the forecasting service.
    #[serde(default = "default_predictor_base_url")]
    pub predictor_base_url: String,

    // --- Historical loader ---------------------------------------------------

    /// Rows requested per klines page.
    #[serde(default = "default_klines_page_limit")]
    pub klines_page_limit: u32,

    /// Hard bound on pages fetched per backfill, independent of provider
    /// behaviour.
    #[serde(default = "default_max_history_pages")]
    pub max_history_pages: u32,

    // --- Stream retry policy -------------------------------------------------

    /// Consecutive failed connection attempts before a channel parks in the
    /// Failed phase.
    #[serde(default = "default_stream_max_attempts")]
    pub stream_max_attempts: u32,

    /// First reconnect delay (milliseconds); doubles per attempt.
    #[serde(default = "default_stream_backoff_base_ms")]
    pub stream_backoff_base_ms: u64,

    /// Ceiling on the reconnect delay (milliseconds).
    #[serde(default = "default_stream_backoff_cap_ms")]
    pub stream_backoff_cap_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            instruments: default_instruments(),
            live_interval: default_live_interval(),
            chart_lookback_hours: default_chart_lookback_hours(),
            prediction_interval: default_prediction_interval(),
            prediction_lookback_days: default_prediction_lookback_days(),
            prediction_window: default_prediction_window(),
            predictor_base_url: default_predictor_base_url(),
            klines_page_limit: default_klines_page_limit(),
            max_history_pages: default_max_history_pages(),
            stream_max_attempts: default_stream_max_attempts(),
            stream_backoff_base_ms: default_stream_backoff_base_ms(),
            stream_backoff_cap_ms: default_stream_backoff_cap_ms(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read watch config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse watch config from {}", path.display()))?;

        info!(
            path = %path.display(),
            instruments = config.instruments.len(),
            live_interval = %config.live_interval,
            "watch config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise watch config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "watch config saved (atomic)");
        Ok(())
    }

    /// Look up a configured instrument by its exchange symbol
    /// (case-insensitive).
    pub fn instrument(&self, symbol: &str) -> Option<&Instrument> {
        self.instruments
            .iter()
            .find(|i| i.symbol.eq_ignore_ascii_case(symbol))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = WatchConfig::default();
        assert_eq!(cfg.instruments.len(), 2);
        assert_eq!(cfg.instruments[0].symbol, "BNBUSDT");
        assert_eq!(cfg.instruments[1].symbol, "ETHUSDT");
        assert_eq!(cfg.live_interval, "15m");
        assert_eq!(cfg.chart_lookback_hours, 48);
        assert_eq!(cfg.prediction_interval, "1d");
        assert_eq!(cfg.prediction_lookback_days, 180);
        assert_eq!(cfg.prediction_window, 60);
        assert_eq!(cfg.klines_page_limit, 500);
        assert_eq!(cfg.stream_max_attempts, 10);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: WatchConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.instruments.len(), 2);
        assert_eq!(cfg.live_interval, "15m");
        assert_eq!(cfg.predictor_base_url, "http://127.0.0.1:8000");
        assert_eq!(cfg.stream_backoff_cap_ms, 30_000);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "live_interval": "5m", "prediction_window": 30 }"#;
        let cfg: WatchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.live_interval, "5m");
        assert_eq!(cfg.prediction_window, 30);
        assert_eq!(cfg.prediction_interval, "1d");
        assert_eq!(cfg.max_history_pages, 64);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = WatchConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: WatchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.live_interval, cfg2.live_interval);
        assert_eq!(cfg.instruments.len(), cfg2.instruments.len());
        assert_eq!(cfg.prediction_window, cfg2.prediction_window);
    }

    #[test]
    fn instrument_lookup_is_case_insensitive() {
        let cfg = WatchConfig::default();
        assert!(cfg.instrument("ethusdt").is_some());
        assert!(cfg.instrument("ETHUSDT").is_some());
        assert!(cfg.instrument("DOGEUSDT").is_none());
    }
}
