use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::CoreError;
use crate::models::price::{PricePoint, PriceSeries};
use super::traits::PriceSeriesProvider;

const BASE_URL: &str = "https://www.alphavantage.co/query";
const PROVIDER: &str = "Alpha Vantage";

/// The compact output only carries the latest 100 trading days (~140 calendar days).
const COMPACT_WINDOW_DAYS: i64 = 140;

/// Alpha Vantage API provider, used as the secondary source for equities.
///
/// - **Free tier**: 25 requests/day (across ALL endpoints).
/// - **Requires**: API key (set via settings as "alphavantage").
/// - **Coverage**: 100k+ global equity symbols.
///
/// Rate-limit and error responses come back as HTTP 200 with a `Note`,
/// `Information` or `Error Message` field instead of data; those are mapped to
/// provider errors so the quote cache can fall back.
pub struct AlphaVantageProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AlphaVantageProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, BASE_URL)
    }

    /// Point the provider at a different endpoint (proxies, test servers).
    pub fn with_base_url(api_key: String, base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            base_url: base_url.into(),
        }
    }
}

// ── Alpha Vantage API response types ────────────────────────────────

#[derive(Deserialize)]
struct TimeSeriesResponse {
    #[serde(rename = "Time Series (Daily)")]
    time_series: Option<HashMap<String, DailyData>>,

    #[serde(rename = "Note")]
    note: Option<String>,

    #[serde(rename = "Information")]
    information: Option<String>,

    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct DailyData {
    #[serde(rename = "4. close")]
    close: String,
}

#[async_trait]
impl PriceSeriesProvider for AlphaVantageProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, CoreError> {
        let today = chrono::Utc::now().date_naive();
        let output_size = if (today - start).num_days() > COMPACT_WINDOW_DAYS {
            "full"
        } else {
            "compact"
        };

        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", &ticker.to_uppercase()),
                ("outputsize", output_size),
                ("apikey", &self.api_key),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CoreError::provider(PROVIDER, format!("Rate limited for {ticker}")));
        }
        if !status.is_success() {
            return Err(CoreError::provider(
                PROVIDER,
                format!("Request for {ticker} failed with status {status}"),
            ));
        }

        let body: TimeSeriesResponse = resp.json().await.map_err(|e| {
            CoreError::provider(PROVIDER, format!("Failed to parse time series for {ticker}: {e}"))
        })?;

        let time_series = match body.time_series {
            Some(series) => series,
            None => {
                let reason = body
                    .note
                    .or(body.information)
                    .or(body.error_message)
                    .unwrap_or_else(|| "response carried no time series".into());
                return Err(CoreError::provider(
                    PROVIDER,
                    format!("No time series data for {ticker}: {reason}"),
                ));
            }
        };

        let mut points = Vec::new();
        for (date_str, data) in &time_series {
            let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|e| {
                CoreError::InvalidSeries(format!("{ticker}: bad date '{date_str}': {e}"))
            })?;
            if date < start || date > end {
                continue;
            }
            let close: f64 = data.close.trim().parse().map_err(|e| {
                CoreError::InvalidSeries(format!("{ticker}: bad close '{}' on {date}: {e}", data.close))
            })?;
            points.push(PricePoint::new(date, close));
        }

        if points.is_empty() {
            return Err(CoreError::provider(
                PROVIDER,
                format!("No quotes for {ticker} between {start} and {end}"),
            ));
        }

        // JSON object order is arbitrary
        points.sort_by_key(|p| p.date);
        PriceSeries::new(ticker, points)
    }
}
