use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::CoreError;

/// A single daily close (date → price).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, close: f64) -> Self {
        Self { date, close }
    }
}

/// Historical daily closing prices for one ticker.
///
/// Points are strictly ascending by date (no duplicates) and every close is
/// finite and non-negative. The only way to build one is [`PriceSeries::new`],
/// which is where raw provider payloads get validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSeries {
    ticker: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Validate `points` into a series. Rejects out-of-order or duplicate dates
    /// and negative / non-finite closes.
    pub fn new(ticker: impl Into<String>, points: Vec<PricePoint>) -> Result<Self, CoreError> {
        let ticker = ticker.into().trim().to_uppercase();
        if ticker.is_empty() {
            return Err(CoreError::InvalidSeries("ticker must not be empty".into()));
        }

        for point in &points {
            if !point.close.is_finite() || point.close < 0.0 {
                return Err(CoreError::InvalidSeries(format!(
                    "{ticker}: close {} on {} must be finite and non-negative",
                    point.close, point.date
                )));
            }
        }

        if let Some(pair) = points.windows(2).find(|w| w[1].date <= w[0].date) {
            return Err(CoreError::InvalidSeries(format!(
                "{ticker}: dates must be strictly ascending ({} followed by {})",
                pair[0].date, pair[1].date
            )));
        }

        Ok(Self { ticker, points })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The most recent point, if any.
    pub fn latest(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    /// Close on an exact date. Binary search (O(log n)).
    pub fn close_on(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|idx| self.points[idx].close)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }
}

/// Cache key: (ticker uppercased, start day, end day).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey {
    pub ticker: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl CacheKey {
    pub fn new(ticker: &str, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            ticker: ticker.trim().to_uppercase(),
            start,
            end,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}..{}", self.ticker, self.start, self.end)
    }
}

/// One memoized provider response.
///
/// Entries are replaced on refresh, never mutated. An entry past its TTL is
/// stale but is kept around as a fallback for when the provider fails, until
/// it outlives the cache's retention window.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub series: Arc<PriceSeries>,
    pub fetched_at: Instant,
    pub fetched_at_utc: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(series: Arc<PriceSeries>, ttl: Duration) -> Self {
        Self {
            series,
            fetched_at: Instant::now(),
            fetched_at_utc: Utc::now(),
            ttl,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }

    /// Live while `age <= ttl`.
    pub fn is_live(&self, now: Instant) -> bool {
        self.age(now) <= self.ttl
    }
}

/// Snapshot of the quote cache for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub live_entries: usize,
    pub stale_entries: usize,
    /// Distinct tickers with at least one entry
    pub tickers: usize,
    pub total_points: usize,
    pub oldest_fetch: Option<DateTime<Utc>>,
    pub newest_fetch: Option<DateTime<Utc>>,
    pub hits: u64,
    pub misses: u64,
    pub provider_calls: u64,
    pub stale_served: u64,
    /// Entries dropped for outliving the retention window
    pub evicted: u64,
    /// Keys with a provider fetch currently running
    pub in_flight: usize,
}
