use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::CoreError;
use crate::models::price::PriceSeries;

/// Source of historical daily closes.
///
/// Implementations turn whatever their upstream returns into a validated
/// [`PriceSeries`]; malformed payloads must fail here rather than travel
/// downstream. A provider that has nothing for the range should return an
/// error, not an empty series.
#[async_trait]
pub trait PriceSeriesProvider: Send + Sync {
    /// Human-readable name of this provider (for logs/errors).
    fn name(&self) -> &str;

    /// Upstream sources one `fetch` may try in turn. Callers that bound a
    /// fetch with a timeout scale it by this.
    fn sources(&self) -> usize {
        1
    }

    /// Daily closes for `ticker` with `start <= date <= end`, ascending by date.
    async fn fetch(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, CoreError>;
}
