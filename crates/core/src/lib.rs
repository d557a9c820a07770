pub mod errors;
pub mod models;
pub mod providers;
pub mod services;

use models::{
    analytics::{
        CorrelationMatrix, PortfolioSummary, RebalanceSuggestion, RiskReport, StressScenario,
        StressTestReport, ValueAtRisk,
    },
    asset::Asset,
    portfolio::Portfolio,
    price::CacheStats,
    settings::Settings,
};
use providers::registry::ProviderChain;
use providers::traits::PriceSeriesProvider;
use services::{
    aggregator::PortfolioAggregator, portfolio_service::PortfolioService, quote_cache::QuoteCache,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use errors::CoreError;

/// Main entry point for the portfolio risk core library.
/// Holds the portfolios in memory plus the shared quote cache and services.
#[must_use]
pub struct PortfolioTracker {
    settings: Settings,
    portfolios: Vec<Portfolio>,
    portfolio_service: PortfolioService,
    cache: Arc<QuoteCache>,
    aggregator: PortfolioAggregator,
}

impl std::fmt::Debug for PortfolioTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioTracker")
            .field("portfolios", &self.portfolios.len())
            .field("settings", &self.settings)
            .field("provider", &self.cache.provider_name())
            .finish()
    }
}

impl PortfolioTracker {
    /// Create a tracker backed by the default provider chain
    /// (Yahoo Finance, then Alpha Vantage when an "alphavantage" key is set).
    pub fn new(settings: Settings) -> Result<Self, CoreError> {
        let chain = ProviderChain::new_with_defaults(&settings.api_keys)
            .with_timeout(settings.cache.provider_timeout());
        info!(providers = ?chain.provider_names(), "provider chain ready");
        Self::with_provider(settings, Arc::new(chain))
    }

    /// Create a tracker with an explicit price provider (custom chains, test fakes).
    pub fn with_provider(
        settings: Settings,
        provider: Arc<dyn PriceSeriesProvider>,
    ) -> Result<Self, CoreError> {
        settings.validate()?;
        Ok(Self::build(settings, provider))
    }

    /// Load settings from a TOML file (plus `PORTFOLIO_RISK_*` overrides) and
    /// create a tracker with the default provider chain.
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        Self::new(Settings::load(path)?)
    }

    // ── Portfolio Management ────────────────────────────────────────

    /// Create an empty portfolio. Name is trimmed, non-empty, at most 100 characters.
    pub fn create_portfolio(
        &mut self,
        name: &str,
        description: Option<String>,
    ) -> Result<Uuid, CoreError> {
        let id = self
            .portfolio_service
            .create(&mut self.portfolios, name, description)?;
        info!(portfolio = %id, "portfolio created");
        Ok(id)
    }

    /// All portfolios, in creation order.
    #[must_use]
    pub fn list_portfolios(&self) -> &[Portfolio] {
        &self.portfolios
    }

    pub fn get_portfolio(&self, id: Uuid) -> Result<&Portfolio, CoreError> {
        self.portfolio_service.find(&self.portfolios, id)
    }

    /// Rename / re-describe a portfolio.
    pub fn update_portfolio(
        &mut self,
        id: Uuid,
        name: &str,
        description: Option<String>,
    ) -> Result<(), CoreError> {
        let portfolio = self.portfolio_service.find_mut(&mut self.portfolios, id)?;
        self.portfolio_service.update(portfolio, name, description)
    }

    pub fn delete_portfolio(&mut self, id: Uuid) -> Result<Portfolio, CoreError> {
        let removed = self.portfolio_service.delete(&mut self.portfolios, id)?;
        info!(portfolio = %id, "portfolio deleted");
        Ok(removed)
    }

    // ── Holdings ────────────────────────────────────────────────────

    /// Add a holding; an already-held symbol is merged into the existing line.
    pub fn add_asset(&mut self, id: Uuid, asset: Asset) -> Result<(), CoreError> {
        let portfolio = self.portfolio_service.find_mut(&mut self.portfolios, id)?;
        self.portfolio_service.add_asset(portfolio, asset)
    }

    pub fn remove_asset(&mut self, id: Uuid, symbol: &str) -> Result<Asset, CoreError> {
        let portfolio = self.portfolio_service.find_mut(&mut self.portfolios, id)?;
        self.portfolio_service.remove_asset(portfolio, symbol)
    }

    // ── Analytics ───────────────────────────────────────────────────

    /// Total value, allocation, value history and per-holding lines.
    pub async fn portfolio_summary(&self, id: Uuid) -> Result<PortfolioSummary, CoreError> {
        let portfolio = self.get_portfolio(id)?;
        Ok(self.aggregator.summarize(portfolio).await)
    }

    /// Beta, Sharpe ratio and volatility against the configured benchmark.
    pub async fn portfolio_risk(&self, id: Uuid) -> Result<RiskReport, CoreError> {
        let portfolio = self.get_portfolio(id)?;
        Ok(self.aggregator.risk_metrics(portfolio).await)
    }

    /// Historical Value at Risk at `confidence` (e.g. 0.95).
    pub async fn portfolio_var(&self, id: Uuid, confidence: f64) -> Result<ValueAtRisk, CoreError> {
        let portfolio = self.get_portfolio(id)?;
        self.aggregator.value_at_risk(portfolio, confidence).await
    }

    pub async fn portfolio_correlation(&self, id: Uuid) -> Result<CorrelationMatrix, CoreError> {
        let portfolio = self.get_portfolio(id)?;
        Ok(self.aggregator.correlation(portfolio).await)
    }

    /// Stress test with the given scenarios, or the default set when `None`.
    pub async fn portfolio_stress_test(
        &self,
        id: Uuid,
        scenarios: Option<&[StressScenario]>,
    ) -> Result<StressTestReport, CoreError> {
        let portfolio = self.get_portfolio(id)?;
        self.aggregator
            .stress_test(portfolio, scenarios.unwrap_or_default())
            .await
    }

    pub async fn rebalancing_suggestions(
        &self,
        id: Uuid,
    ) -> Result<Vec<RebalanceSuggestion>, CoreError> {
        let portfolio = self.get_portfolio(id)?;
        Ok(self.aggregator.rebalancing_suggestions(portfolio).await)
    }

    /// Dashboard totals across every portfolio: holdings are merged by
    /// symbol, then summarized like a single portfolio.
    pub async fn overall_summary(&self) -> Result<PortfolioSummary, CoreError> {
        let combined = self.portfolio_service.combine(&self.portfolios)?;
        Ok(self.aggregator.summarize(&combined).await)
    }

    /// Beta, Sharpe ratio and volatility of all holdings taken together.
    pub async fn overall_risk(&self) -> Result<RiskReport, CoreError> {
        let combined = self.portfolio_service.combine(&self.portfolios)?;
        Ok(self.aggregator.risk_metrics(&combined).await)
    }

    // ── Cache Management ────────────────────────────────────────────

    /// Drop cached series for one symbol, or everything when `None`.
    /// Returns the number of entries removed.
    pub async fn clear_cache(&self, symbol: Option<&str>) -> usize {
        self.cache.invalidate(symbol).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    // ── Export / Import ─────────────────────────────────────────────

    /// Export all portfolios as a JSON array.
    pub fn export_to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string_pretty(&self.portfolios)
            .map_err(|e| CoreError::Serialization(format!("Failed to serialize portfolios to JSON: {e}")))
    }

    /// Import portfolios from a JSON array produced by [`export_to_json`](Self::export_to_json).
    /// All-or-nothing: if any portfolio fails validation, nothing changes.
    /// Returns the number of portfolios imported.
    pub fn import_from_json(&mut self, json: &str) -> Result<usize, CoreError> {
        let imported: Vec<Portfolio> = serde_json::from_str(json)?;
        let count = self.portfolio_service.import(&mut self.portfolios, imported)?;
        info!(count, "portfolios imported");
        Ok(count)
    }

    // ── Settings ────────────────────────────────────────────────────

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn provider_name(&self) -> &str {
        self.cache.provider_name()
    }

    // ── Internal ────────────────────────────────────────────────────

    fn build(settings: Settings, provider: Arc<dyn PriceSeriesProvider>) -> Self {
        let cache = Arc::new(QuoteCache::new(provider, settings.cache.clone()));
        let aggregator = PortfolioAggregator::new(cache.clone(), settings.clone());

        Self {
            settings,
            portfolios: Vec::new(),
            portfolio_service: PortfolioService::new(),
            cache,
            aggregator,
        }
    }
}
