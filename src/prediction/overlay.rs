// =============================================================================
// Prediction overlay — historical + forecast lanes on one label axis
// =============================================================================

use chrono::DateTime;
use serde::Serialize;

use crate::market_data::history::DAY_MS;
use crate::market_data::Bar;

/// Chart-ready overlay for the prediction view.
///
/// The three vectors always have the same length N + M, where N is the number
/// of historical bars and M the forecast horizon.  `historical[i]` holds the
/// close for i < N and is absent after; `forecast[i]` is absent for i < N and
/// holds the (i - N)-th predicted value after.  Recomputed wholesale whenever
/// a forecast response arrives, never patched in place.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionOverlay {
    pub labels: Vec<String>,
    pub historical: Vec<Option<f64>>,
    pub forecast: Vec<Option<f64>>,
}

impl PredictionOverlay {
    /// Build the overlay from daily bars and forecast values.
    ///
    /// Each forecast step extends the label axis by one calendar day past the
    /// last bar.  With no bars there is no date to anchor the axis, so the
    /// overlay comes back empty regardless of the forecast.
    pub fn build(bars: &[Bar], forecast: &[f64]) -> Self {
        let Some(last) = bars.last() else {
            return Self {
                labels: Vec::new(),
                historical: Vec::new(),
                forecast: Vec::new(),
            };
        };

        let n = bars.len();
        let m = forecast.len();

        let mut labels = Vec::with_capacity(n + m);
        let mut historical = Vec::with_capacity(n + m);
        let mut forecast_lane = Vec::with_capacity(n + m);

        for bar in bars {
            labels.push(day_label(bar.open_time));
            historical.push(Some(bar.close));
            forecast_lane.push(None);
        }

        for (i, value) in forecast.iter().enumerate() {
            labels.push(day_label(last.open_time + ((i as i64) + 1) * DAY_MS));
            historical.push(None);
            forecast_lane.push(Some(*value));
        }

        Self {
            labels,
            historical,
            forecast: forecast_lane,
        }
    }

    /// Overlay with no forecast lane — the degraded form used when the
    /// predictor is unavailable.
    pub fn historical_only(bars: &[Bar]) -> Self {
        Self::build(bars, &[])
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// True when no forecast value is present.
    pub fn forecast_is_empty(&self) -> bool {
        self.forecast.iter().all(Option::is_none)
    }
}

/// Calendar-date label for a UNIX-millisecond timestamp.
fn day_label(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ms.to_string())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn daily_bars(count: usize) -> Vec<Bar> {
        (0..count)
            .map(|i| {
                let t = (i as i64) * DAY_MS;
                Bar::new(t, 100.0 + i as f64, 101.0 + i as f64, 99.0, 100.5 + i as f64)
            })
            .collect()
    }

    #[test]
    fn lanes_align_to_n_plus_m() {
        let bars = daily_bars(5);
        let overlay = PredictionOverlay::build(&bars, &[1.0, 2.0, 3.0]);

        assert_eq!(overlay.labels.len(), 8);
        assert_eq!(overlay.historical.len(), 8);
        assert_eq!(overlay.forecast.len(), 8);
    }

    #[test]
    fn forecast_absent_over_the_historical_range() {
        let bars = daily_bars(4);
        let overlay = PredictionOverlay::build(&bars, &[7.0, 8.0]);

        for i in 0..4 {
            assert!(overlay.historical[i].is_some());
            assert!(overlay.forecast[i].is_none());
        }
        for i in 4..6 {
            assert!(overlay.historical[i].is_none());
        }
        assert_eq!(overlay.forecast[4], Some(7.0));
        assert_eq!(overlay.forecast[5], Some(8.0));
    }

    #[test]
    fn labels_extend_one_day_per_forecast_step() {
        let bars = daily_bars(2); // 1970-01-01, 1970-01-02
        let overlay = PredictionOverlay::build(&bars, &[5.0, 6.0]);

        assert_eq!(
            overlay.labels,
            vec!["1970-01-01", "1970-01-02", "1970-01-03", "1970-01-04"]
        );
    }

    #[test]
    fn empty_forecast_degrades_to_historical_only() {
        let bars = daily_bars(3);
        let overlay = PredictionOverlay::historical_only(&bars);

        assert_eq!(overlay.len(), 3);
        assert!(overlay.forecast_is_empty());
        assert!(overlay.historical.iter().all(Option::is_some));
    }

    #[test]
    fn no_bars_means_an_empty_overlay() {
        let overlay = PredictionOverlay::build(&[], &[1.0, 2.0]);
        assert!(overlay.is_empty());
        assert_eq!(overlay.historical.len(), overlay.labels.len());
        assert_eq!(overlay.forecast.len(), overlay.labels.len());
    }
}
