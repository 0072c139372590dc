// =============================================================================
// Prediction service client
// =============================================================================
//
// The forecasting service is an opaque collaborator: POST a window of recent
// prices, get back an ordered list of predicted values.  A response without a
// `prediction` field means "no prediction available" and yields an empty
// forecast; transport errors and non-2xx statuses are the caller's cue to
// degrade to a historical-only overlay.
// =============================================================================

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument};

#[derive(Serialize)]
struct PredictRequest<'a> {
    prices: &'a [f64],
}

/// HTTP client for `POST {base_url}/predict/{symbol}`.
pub struct PredictionClient {
    base_url: String,
    client: reqwest::Client,
}

impl PredictionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            // Model inference can take a while; allow far more than a market
            // data call would get.
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Submit `prices` for `symbol` (lower-cased base asset) and return the
    /// forecast values in order.
    #[instrument(skip(self, prices), name = "predictor::predict")]
    pub async fn predict(&self, symbol: &str, prices: &[f64]) -> Result<Vec<f64>> {
        let url = format!("{}/predict/{}", self.base_url, symbol);

        let resp = self
            .client
            .post(&url)
            .json(&PredictRequest { prices })
            .send()
            .await
            .with_context(|| format!("POST {url} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse prediction response")?;

        if !status.is_success() {
            anyhow::bail!("predictor POST /predict/{symbol} returned {status}: {body}");
        }

        let forecast = extract_forecast(&body);
        debug!(symbol, window = prices.len(), horizon = forecast.len(), "forecast received");
        Ok(forecast)
    }
}

impl std::fmt::Debug for PredictionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Pull the forecast values out of a response body.  Values are coerced to
/// f64; anything non-numeric is skipped.  A missing or non-array `prediction`
/// field yields an empty forecast.
fn extract_forecast(body: &serde_json::Value) -> Vec<f64> {
    body.get("prediction")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_f64()).collect())
        .unwrap_or_default()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_forecast_reads_values_in_order() {
        let body = serde_json::json!({ "prediction": [1.0, 2.5, 3.25] });
        assert_eq!(extract_forecast(&body), vec![1.0, 2.5, 3.25]);
    }

    #[test]
    fn missing_prediction_field_means_no_forecast() {
        let body = serde_json::json!({ "detail": "Unsupported coin: doge" });
        assert!(extract_forecast(&body).is_empty());
    }

    #[test]
    fn non_numeric_entries_are_skipped() {
        let body = serde_json::json!({ "prediction": [1.0, "junk", null, 4.0] });
        assert_eq!(extract_forecast(&body), vec![1.0, 4.0]);
    }

    #[test]
    fn non_array_prediction_means_no_forecast() {
        let body = serde_json::json!({ "prediction": "soon" });
        assert!(extract_forecast(&body).is_empty());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = PredictionClient::new("http://127.0.0.1:8000/");
        assert_eq!(client.base_url, "http://127.0.0.1:8000");
    }
}
