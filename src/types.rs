// =============================================================================
// Shared types used across the Borealis watch engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Static identity and display metadata for one tracked trading pair.
///
/// Carries no behaviour beyond symbol-formatting helpers. The default set
/// (BNB/USDT and ETH/USDT) lives in `runtime_config.rs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Exchange symbol, e.g. "ETHUSDT".
    pub symbol: String,
    /// Base asset, e.g. "ETH".
    pub base: String,
    /// Quote asset, e.g. "USDT".
    pub quote: String,
    /// Logo asset reference for dashboards.
    #[serde(default)]
    pub logo: String,
    /// Detail-view route for dashboards, e.g. "/eth".
    #[serde(default)]
    pub route: String,
}

impl Instrument {
    pub fn new(
        base: impl Into<String>,
        quote: impl Into<String>,
        logo: impl Into<String>,
        route: impl Into<String>,
    ) -> Self {
        let base = base.into();
        let quote = quote.into();
        Self {
            symbol: format!("{base}{quote}"),
            base,
            quote,
            logo: logo.into(),
            route: route.into(),
        }
    }

    /// Display pair, e.g. "ETH/USDT".
    pub fn display_pair(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    /// Lower-cased symbol as used in Binance stream names.
    pub fn stream_symbol(&self) -> String {
        self.symbol.to_lowercase()
    }

    /// Lower-cased base asset as used in the predictor's URL path.
    pub fn prediction_symbol(&self) -> String {
        self.base.to_lowercase()
    }
}

/// The two push-channel topics a tracked instrument can subscribe to.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum StreamTopic {
    BarUpdates,
    TickerUpdates,
}

impl std::fmt::Display for StreamTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BarUpdates => write!(f, "kline"),
            Self::TickerUpdates => write!(f, "ticker"),
        }
    }
}

/// Directional movement of the last price relative to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceDirection {
    Up,
    Down,
    Neutral,
}

impl PriceDirection {
    /// Neutral when there is no previous price or no movement, Up on a rise,
    /// Down otherwise.
    pub fn from_prices(current: f64, previous: Option<f64>) -> Self {
        match previous {
            None => Self::Neutral,
            Some(prev) if current == prev => Self::Neutral,
            Some(prev) if current > prev => Self::Up,
            Some(_) => Self::Down,
        }
    }
}

impl Default for PriceDirection {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for PriceDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_symbol_helpers() {
        let inst = Instrument::new("ETH", "USDT", "./assets/ethereum.svg", "/eth");
        assert_eq!(inst.symbol, "ETHUSDT");
        assert_eq!(inst.display_pair(), "ETH/USDT");
        assert_eq!(inst.stream_symbol(), "ethusdt");
        assert_eq!(inst.prediction_symbol(), "eth");
    }

    #[test]
    fn direction_without_previous_is_neutral() {
        assert_eq!(PriceDirection::from_prices(100.0, None), PriceDirection::Neutral);
    }

    #[test]
    fn direction_unchanged_is_neutral() {
        assert_eq!(
            PriceDirection::from_prices(100.0, Some(100.0)),
            PriceDirection::Neutral
        );
    }

    #[test]
    fn direction_rise_is_up() {
        assert_eq!(PriceDirection::from_prices(101.0, Some(100.0)), PriceDirection::Up);
    }

    #[test]
    fn direction_fall_is_down() {
        assert_eq!(PriceDirection::from_prices(99.0, Some(100.0)), PriceDirection::Down);
    }
}
