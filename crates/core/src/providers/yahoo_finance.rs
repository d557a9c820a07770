use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use time::OffsetDateTime;

use crate::errors::CoreError;
use crate::models::price::{PricePoint, PriceSeries};
use super::traits::PriceSeriesProvider;

const PROVIDER: &str = "Yahoo Finance";

/// Yahoo Finance provider for equities, ETFs and indices (e.g. `^GSPC`).
///
/// - **Free**: No API key required.
/// - **No strict rate limits** (unofficial public API).
/// - **Data**: full daily history, closes in the instrument's native currency.
///
/// Uses the `yahoo_finance_api` crate which wraps Yahoo Finance's public
/// chart endpoint.
pub struct YahooFinanceProvider {
    connector: yahoo_finance_api::YahooConnector,
}

impl YahooFinanceProvider {
    pub fn new() -> Result<Self, CoreError> {
        let connector = yahoo_finance_api::YahooConnector::new().map_err(|e| {
            CoreError::provider(PROVIDER, format!("Failed to create connector: {e}"))
        })?;
        Ok(Self { connector })
    }

    /// Midnight UTC of `date` as a `time::OffsetDateTime`.
    fn to_offset_datetime(date: NaiveDate) -> Result<OffsetDateTime, CoreError> {
        let month = u8::try_from(date.month())
            .ok()
            .and_then(|m| time::Month::try_from(m).ok())
            .ok_or_else(|| CoreError::provider(PROVIDER, format!("Invalid month in {date}")))?;

        let odt = time::Date::from_calendar_date(date.year(), month, date.day() as u8)
            .map_err(|e| CoreError::provider(PROVIDER, format!("Invalid date {date}: {e}")))?
            .with_hms(0, 0, 0)
            .map_err(|e| CoreError::provider(PROVIDER, format!("Invalid time for {date}: {e}")))?
            .assume_utc();
        Ok(odt)
    }

    fn timestamp_to_naive_date(ts: i64) -> Option<NaiveDate> {
        chrono::DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive())
    }
}

#[async_trait]
impl PriceSeriesProvider for YahooFinanceProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, CoreError> {
        let from = Self::to_offset_datetime(start)?;
        let to = Self::to_offset_datetime(end + chrono::Duration::days(1))?; // inclusive end

        let resp = self
            .connector
            .get_quote_history(ticker, from, to)
            .await
            .map_err(|e| {
                CoreError::provider(PROVIDER, format!("Failed to fetch history for {ticker}: {e}"))
            })?;

        let quotes = resp.quotes().map_err(|e| {
            CoreError::provider(PROVIDER, format!("Failed to parse quotes for {ticker}: {e}"))
        })?;

        // Intraday bars for the current session share a date with the daily
        // bar; keep the last close seen per date.
        let mut points: Vec<PricePoint> = Vec::with_capacity(quotes.len());
        for quote in &quotes {
            let Some(date) = Self::timestamp_to_naive_date(quote.timestamp) else {
                continue;
            };
            if date < start || date > end {
                continue;
            }
            match points.last_mut() {
                Some(last) if last.date == date => last.close = quote.close,
                _ => points.push(PricePoint::new(date, quote.close)),
            }
        }

        if points.is_empty() {
            return Err(CoreError::provider(
                PROVIDER,
                format!("No quotes for {ticker} between {start} and {end}"),
            ));
        }

        PriceSeries::new(ticker, points)
    }
}
