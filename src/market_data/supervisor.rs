// =============================================================================
// Channel supervision — bounded reconnect policy over the base subscribers
// =============================================================================
//
// The base stream contracts in kline_stream / ticker_stream never reconnect.
// This layer owns the retry loop: bounded exponential backoff with capped
// attempts, a registry that keeps exactly one live task per
// (symbol, topic), and a per-channel phase readout for the state snapshot.
//
// A kline channel is tied to the focus generation it was spawned under and
// stops retrying once superseded; ticker channels run for the process
// lifetime.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::market_data::series::SeriesKey;
use crate::market_data::{kline_stream, ticker_stream};
use crate::runtime_config::WatchConfig;
use crate::types::StreamTopic;

// ---------------------------------------------------------------------------
// Channel identity & health
// ---------------------------------------------------------------------------

/// Identifies one push channel: a (symbol, topic) pair.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ChannelKey {
    pub symbol: String,
    pub topic: StreamTopic,
}

impl ChannelKey {
    pub fn new(symbol: impl Into<String>, topic: StreamTopic) -> Self {
        Self {
            symbol: symbol.into(),
            topic,
        }
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.symbol, self.topic)
    }
}

/// Lifecycle phase of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelPhase {
    Connecting,
    Open,
    Closed,
    /// Retry budget exhausted; the channel will not come back on its own.
    Failed,
}

/// Phase plus consecutive failed attempts, exposed in the state snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChannelStatus {
    pub phase: ChannelPhase,
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff: base * 2^(attempt-1), capped, for at most
/// `max_attempts` consecutive failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            max_attempts: config.stream_max_attempts.max(1),
            base_delay: Duration::from_millis(config.stream_backoff_base_ms),
            max_delay: Duration::from_millis(config.stream_backoff_cap_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Channel registry
// ---------------------------------------------------------------------------

/// Tracks the live task and health per channel.  Installing a new task for a
/// key aborts the previous one, so at most one channel per (symbol, topic)
/// exists at any time.
pub struct ChannelRegistry {
    tasks: RwLock<HashMap<ChannelKey, JoinHandle<()>>>,
    health: RwLock<HashMap<ChannelKey, ChannelStatus>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handle` as the live task for `key`, aborting any
    /// predecessor.
    pub fn install(&self, key: ChannelKey, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.write();
        if let Some(old) = tasks.insert(key.clone(), handle) {
            debug!(channel = %key, "aborting superseded channel task");
            old.abort();
        }
    }

    /// Abort and forget the channel for `key`, if any.
    pub fn shutdown(&self, key: &ChannelKey) {
        if let Some(handle) = self.tasks.write().remove(key) {
            handle.abort();
            info!(channel = %key, "channel shut down");
        }
        self.set_status(key, ChannelPhase::Closed, 0);
    }

    pub fn set_status(&self, key: &ChannelKey, phase: ChannelPhase, attempts: u32) {
        self.health
            .write()
            .insert(key.clone(), ChannelStatus { phase, attempts });
    }

    /// Health of every known channel, keyed by display name.
    pub fn health_snapshot(&self) -> HashMap<String, ChannelStatus> {
        self.health
            .read()
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Supervised channel tasks
// ---------------------------------------------------------------------------

/// Spawn the supervised bar-update channel for the focused instrument,
/// replacing whatever channel previously held the key.
pub fn spawn_kline_channel(state: &Arc<AppState>, symbol: &str, interval: &str, generation: u64) {
    let key = ChannelKey::new(symbol, StreamTopic::BarUpdates);
    let handle = tokio::spawn(supervise_kline(
        state.clone(),
        symbol.to_string(),
        interval.to_string(),
        generation,
    ));
    state.channels.install(key, handle);
}

/// Spawn the supervised ticker channel for one instrument.  Ticker channels
/// are not focus-bound; they run for every configured instrument.
pub fn spawn_ticker_channel(state: &Arc<AppState>, symbol: &str) {
    let key = ChannelKey::new(symbol, StreamTopic::TickerUpdates);
    let handle = tokio::spawn(supervise_ticker(state.clone(), symbol.to_string()));
    state.channels.install(key, handle);
}

async fn supervise_kline(state: Arc<AppState>, symbol: String, interval: String, generation: u64) {
    let key = ChannelKey::new(symbol.clone(), StreamTopic::BarUpdates);
    let series_key = SeriesKey::new(symbol.clone(), interval.clone());
    let policy = RetryPolicy::from_config(&state.runtime_config.read());
    let mut attempts: u32 = 0;

    loop {
        if state.focus_generation() != generation {
            debug!(channel = %key, "channel superseded by focus change — stopping");
            state.channels.set_status(&key, ChannelPhase::Closed, attempts);
            return;
        }

        state.channels.set_status(&key, ChannelPhase::Connecting, attempts);

        match kline_stream::connect(&symbol, &interval).await {
            Ok(ws) => {
                attempts = 0;
                state.channels.set_status(&key, ChannelPhase::Open, attempts);

                let result =
                    kline_stream::pump(ws, &state.series, &series_key, &state.state_version).await;
                state.channels.set_status(&key, ChannelPhase::Closed, attempts);

                match result {
                    Ok(()) => warn!(channel = %key, "kline channel closed by remote"),
                    Err(e) => {
                        error!(channel = %key, error = %e, "kline channel failed");
                        state.push_error(format!("kline channel {key}: {e}"));
                    }
                }
            }
            Err(e) => {
                warn!(channel = %key, error = %e, "kline channel connect failed");
            }
        }

        attempts += 1;
        if attempts >= policy.max_attempts {
            error!(channel = %key, attempts, "kline channel retry budget exhausted");
            state.push_error(format!("kline channel {key} gave up after {attempts} attempts"));
            state.channels.set_status(&key, ChannelPhase::Failed, attempts);
            return;
        }
        tokio::time::sleep(policy.delay_for(attempts)).await;
    }
}

async fn supervise_ticker(state: Arc<AppState>, symbol: String) {
    let key = ChannelKey::new(symbol.clone(), StreamTopic::TickerUpdates);
    let policy = RetryPolicy::from_config(&state.runtime_config.read());
    let mut attempts: u32 = 0;

    loop {
        state.channels.set_status(&key, ChannelPhase::Connecting, attempts);

        match ticker_stream::connect(&symbol).await {
            Ok(ws) => {
                attempts = 0;
                state.channels.set_status(&key, ChannelPhase::Open, attempts);

                let result =
                    ticker_stream::pump(ws, &symbol, &state.tickers, &state.state_version).await;
                state.channels.set_status(&key, ChannelPhase::Closed, attempts);

                // The last snapshot stays visible while the channel is down;
                // only the channel health readout reflects the outage.
                match result {
                    Ok(()) => warn!(channel = %key, "ticker channel closed by remote"),
                    Err(e) => {
                        error!(channel = %key, error = %e, "ticker channel failed");
                        state.push_error(format!("ticker channel {key}: {e}"));
                    }
                }
            }
            Err(e) => {
                warn!(channel = %key, error = %e, "ticker channel connect failed");
            }
        }

        attempts += 1;
        if attempts >= policy.max_attempts {
            error!(channel = %key, attempts, "ticker channel retry budget exhausted");
            state.push_error(format!("ticker channel {key} gave up after {attempts} attempts"));
            state.channels.set_status(&key, ChannelPhase::Failed, attempts);
            return;
        }
        tokio::time::sleep(policy.delay_for(attempts)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, cap_ms: u64, max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(cap_ms),
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let p = policy(500, 60_000, 10);
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(2), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(3), Duration::from_millis(2_000));
        assert_eq!(p.delay_for(5), Duration::from_millis(8_000));
    }

    #[test]
    fn backoff_is_capped() {
        let p = policy(500, 4_000, 10);
        assert_eq!(p.delay_for(4), Duration::from_millis(4_000));
        assert_eq!(p.delay_for(12), Duration::from_millis(4_000));
    }

    #[test]
    fn from_config_floors_attempts_at_one() {
        let mut cfg = WatchConfig::default();
        cfg.stream_max_attempts = 0;
        assert_eq!(RetryPolicy::from_config(&cfg).max_attempts, 1);
    }

    #[tokio::test]
    async fn install_aborts_the_previous_task() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::new("ETHUSDT", StreamTopic::BarUpdates);

        let first = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        registry.install(key.clone(), first);

        let second = tokio::spawn(async {});
        registry.install(key.clone(), second);

        // Let the abort land.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let handle = registry.tasks.write().remove(&key).unwrap();
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_marks_channel_closed() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::new("ETHUSDT", StreamTopic::TickerUpdates);

        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        registry.install(key.clone(), task);
        registry.set_status(&key, ChannelPhase::Open, 0);

        registry.shutdown(&key);

        let health = registry.health_snapshot();
        assert_eq!(health["ETHUSDT/ticker"].phase, ChannelPhase::Closed);
        assert!(registry.tasks.read().is_empty());
    }
}
