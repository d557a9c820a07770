use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::errors::CoreError;
use crate::models::price::PriceSeries;

use super::alphavantage::AlphaVantageProvider;
use super::traits::PriceSeriesProvider;
use super::yahoo_finance::YahooFinanceProvider;

/// Ordered list of price providers tried one after another.
///
/// The first provider that returns a non-empty series wins; if every provider
/// fails, the last error is returned. Each provider gets its own `timeout`, so
/// a hung source falls through to the next one instead of eating the whole
/// budget. The chain is itself a [`PriceSeriesProvider`].
pub struct ProviderChain {
    providers: Vec<Box<dyn PriceSeriesProvider>>,
    timeout: Duration,
}

/// Per-provider bound when none is configured.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

impl ProviderChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Bound each provider call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Yahoo Finance first (no key needed), Alpha Vantage as fallback when a key is configured.
    pub fn new_with_defaults(api_keys: &HashMap<String, String>) -> Self {
        let mut chain = Self::new();

        match YahooFinanceProvider::new() {
            Ok(yahoo) => chain.register(Box::new(yahoo)),
            Err(e) => warn!(error = %e, "Yahoo Finance provider unavailable"),
        }

        if let Some(key) = api_keys.get("alphavantage") {
            chain.register(Box::new(AlphaVantageProvider::new(key.clone())));
        }

        chain
    }

    /// Append a provider; registration order is fallback order.
    pub fn register(&mut self, provider: Box<dyn PriceSeriesProvider>) {
        self.providers.push(provider);
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }
}

impl Default for ProviderChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSeriesProvider for ProviderChain {
    fn name(&self) -> &str {
        "ProviderChain"
    }

    fn sources(&self) -> usize {
        self.providers.len().max(1)
    }

    async fn fetch(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, CoreError> {
        let mut last_error = None;

        for provider in &self.providers {
            let call = provider.fetch(ticker, start, end);
            let result = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::Timeout {
                    provider: provider.name().to_string(),
                    seconds: self.timeout.as_secs(),
                }),
            };

            match result {
                Ok(series) if !series.is_empty() => {
                    debug!(provider = provider.name(), %ticker, points = series.len(), "series fetched");
                    return Ok(series);
                }
                Ok(_) => {
                    warn!(provider = provider.name(), %ticker, "provider returned no data, trying next");
                    last_error = Some(CoreError::provider(
                        provider.name(),
                        format!("No data for {ticker} between {start} and {end}"),
                    ));
                }
                Err(e) => {
                    warn!(provider = provider.name(), %ticker, error = %e, "provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(CoreError::NoProvider))
    }
}
