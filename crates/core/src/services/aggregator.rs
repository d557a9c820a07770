use chrono::{Duration, NaiveDate, Utc};
use futures::future::{join, join_all};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::errors::CoreError;
use crate::models::analytics::{
    CorrelationMatrix, DataSource, HoldingSummary, PortfolioSummary, RebalanceAction,
    RebalanceSuggestion, RiskReport, StressScenario, StressTestReport, ValueAtRisk, ValuePoint,
};
use crate::models::asset::AssetType;
use crate::models::portfolio::Portfolio;
use crate::models::price::PriceSeries;
use crate::models::settings::Settings;
use crate::services::quote_cache::{Quote, QuoteCache, QuoteSource};
use crate::services::risk_engine::{paired_returns, simple_returns, RiskEngine};

/// A summary plus the series it was built from, shared by every risk endpoint.
struct Snapshot {
    summary: PortfolioSummary,
    /// Available series keyed by symbol
    series: BTreeMap<String, Arc<PriceSeries>>,
}

/// Turns a portfolio into dashboard numbers: value, allocation, value history
/// and the risk statistics derived from it.
///
/// Nothing is stored; every call reads prices through the shared
/// [`QuoteCache`] over `[today − lookback_days, today]`.
pub struct PortfolioAggregator {
    cache: Arc<QuoteCache>,
    settings: Settings,
    engine: RiskEngine,
}

impl PortfolioAggregator {
    pub fn new(cache: Arc<QuoteCache>, settings: Settings) -> Self {
        Self {
            cache,
            settings,
            engine: RiskEngine::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Total value, allocation by asset type, value history and per-holding lines.
    ///
    /// Assets without any price data are valued at 0 and listed in
    /// `unavailable`; this never fails because of market data.
    #[instrument(skip(self, portfolio), fields(portfolio = %portfolio.id))]
    pub async fn summarize(&self, portfolio: &Portfolio) -> PortfolioSummary {
        self.snapshot(portfolio).await.summary
    }

    /// Beta, Sharpe ratio and volatility of the portfolio value history against
    /// the configured benchmark.
    #[instrument(skip(self, portfolio), fields(portfolio = %portfolio.id))]
    pub async fn risk_metrics(&self, portfolio: &Portfolio) -> RiskReport {
        let benchmark = self.settings.benchmark_symbol.trim().to_uppercase();
        let (start, end) = self.window();

        // Benchmark goes out alongside the holdings, not after them.
        let (snapshot, benchmark_quote) =
            join(self.snapshot(portfolio), self.cache.get(&benchmark, start, end)).await;
        let mut degraded = snapshot.summary.degraded;
        let mut unavailable = snapshot.summary.unavailable.clone();

        let metrics = match benchmark_quote {
            Ok(quote) => {
                degraded |= quote.is_degraded();

                // Common dates only, never forward-filled.
                let (values, bench_values): (Vec<f64>, Vec<f64>) = snapshot
                    .summary
                    .value_history
                    .iter()
                    .filter_map(|vp| quote.series.close_on(vp.date).map(|b| (vp.value, b)))
                    .unzip();

                let (portfolio_returns, benchmark_returns) = paired_returns(&values, &bench_values);
                self.engine.compute(
                    &portfolio_returns,
                    &benchmark_returns,
                    self.settings.risk_free_rate,
                )
            }
            Err(e) => {
                warn!(%benchmark, error = %e, "benchmark unavailable, risk metrics zeroed");
                unavailable.push(benchmark.clone());
                self.engine.compute(&[], &[], self.settings.risk_free_rate)
            }
        };

        info!(
            beta = metrics.beta,
            sharpe = metrics.sharpe_ratio,
            volatility = metrics.volatility,
            observations = metrics.observations,
            "risk metrics computed"
        );

        RiskReport {
            metrics,
            benchmark,
            risk_free_rate: self.settings.risk_free_rate,
            degraded,
            unavailable,
        }
    }

    /// Historical VaR of the daily portfolio value changes.
    #[instrument(skip(self, portfolio), fields(portfolio = %portfolio.id))]
    pub async fn value_at_risk(
        &self,
        portfolio: &Portfolio,
        confidence: f64,
    ) -> Result<ValueAtRisk, CoreError> {
        // Reject bad input before touching the network.
        self.engine.value_at_risk(&[], 0.0, confidence)?;

        let snapshot = self.snapshot(portfolio).await;
        let values: Vec<f64> = snapshot.summary.value_history.iter().map(|vp| vp.value).collect();
        self.engine
            .value_at_risk(&simple_returns(&values), snapshot.summary.total_value, confidence)
    }

    /// Pairwise correlation of asset returns over the dates all available
    /// series share. Symbols without data are left out.
    #[instrument(skip(self, portfolio), fields(portfolio = %portfolio.id))]
    pub async fn correlation(&self, portfolio: &Portfolio) -> CorrelationMatrix {
        let snapshot = self.snapshot(portfolio).await;
        let dates = common_dates(snapshot.series.values().map(Arc::as_ref));

        let returns: BTreeMap<String, Vec<f64>> = snapshot
            .series
            .iter()
            .map(|(symbol, series)| {
                let closes: Vec<f64> = dates.iter().filter_map(|d| series.close_on(*d)).collect();
                (symbol.clone(), simple_returns(&closes))
            })
            .collect();

        self.engine.correlation_matrix(&returns)
    }

    /// Apply scenario shocks to each holding's current value. An empty scenario
    /// list runs [`StressScenario::defaults`].
    #[instrument(skip(self, portfolio, scenarios), fields(portfolio = %portfolio.id))]
    pub async fn stress_test(
        &self,
        portfolio: &Portfolio,
        scenarios: &[StressScenario],
    ) -> Result<StressTestReport, CoreError> {
        let defaults;
        let scenarios = if scenarios.is_empty() {
            defaults = StressScenario::defaults();
            &defaults
        } else {
            scenarios
        };

        let summary = self.snapshot(portfolio).await.summary;
        let holdings: Vec<(&str, f64)> = summary
            .holdings
            .iter()
            .map(|h| (h.symbol.as_str(), h.value))
            .collect();
        self.engine.stress_test(&holdings, scenarios)
    }

    /// Buy/sell suggestions for every asset type whose allocation drifts from
    /// its target by more than `rebalance_threshold_pct`. Types without a
    /// target count as a 0% target.
    #[instrument(skip(self, portfolio), fields(portfolio = %portfolio.id))]
    pub async fn rebalancing_suggestions(&self, portfolio: &Portfolio) -> Vec<RebalanceSuggestion> {
        let summary = self.snapshot(portfolio).await.summary;
        if summary.total_value <= 0.0 {
            return Vec::new();
        }
        rebalance(
            &summary.asset_allocation,
            &self.settings.target_allocation,
            self.settings.rebalance_threshold_pct,
        )
    }

    // ── Internal ────────────────────────────────────────────────────

    fn window(&self) -> (NaiveDate, NaiveDate) {
        let today = Utc::now().date_naive();
        (today - Duration::days(self.settings.lookback_days), today)
    }

    /// Fetch every distinct symbol concurrently through the cache.
    async fn fetch_quotes(&self, portfolio: &Portfolio) -> BTreeMap<String, Result<Quote, CoreError>> {
        let (start, end) = self.window();
        let fetches = portfolio.symbols().into_iter().map(|symbol| async move {
            (symbol.to_string(), self.cache.get(symbol, start, end).await)
        });

        join_all(fetches).await.into_iter().collect()
    }

    async fn snapshot(&self, portfolio: &Portfolio) -> Snapshot {
        let quotes = self.fetch_quotes(portfolio).await;

        let mut holdings = Vec::with_capacity(portfolio.assets.len());
        let mut series = BTreeMap::new();
        let mut unavailable = Vec::new();
        let mut degraded = false;
        let mut total_value = 0.0;

        for asset in &portfolio.assets {
            let quote = match quotes.get(&asset.symbol) {
                Some(Ok(quote)) if !quote.series.is_empty() => Some(quote),
                Some(Err(e)) => {
                    warn!(symbol = %asset.symbol, error = %e, "no price data, valuing at 0");
                    None
                }
                _ => None,
            };

            let (current_price, data_source) = match quote {
                Some(quote) => {
                    degraded |= quote.is_degraded();
                    series.insert(asset.symbol.clone(), quote.series.clone());
                    let source = match quote.source {
                        QuoteSource::Provider => DataSource::Live,
                        QuoteSource::Cache => DataSource::Cached,
                        QuoteSource::StaleFallback => DataSource::Stale,
                    };
                    (quote.series.latest().map(|p| p.close), source)
                }
                None => {
                    unavailable.push(asset.symbol.clone());
                    (None, DataSource::Unavailable)
                }
            };

            let value = current_price.map_or(0.0, |price| asset.quantity * price);
            total_value += value;

            let gain_loss_pct = match current_price {
                Some(price) if asset.purchase_price > 0.0 => {
                    (price - asset.purchase_price) / asset.purchase_price * 100.0
                }
                _ => 0.0,
            };

            holdings.push(HoldingSummary {
                symbol: asset.symbol.clone(),
                name: asset.name.clone(),
                asset_type: asset.asset_type,
                quantity: asset.quantity,
                current_price,
                purchase_price: asset.purchase_price,
                value,
                gain_loss_pct,
                allocation_pct: 0.0, // filled below
                data_source,
            });
        }

        let mut asset_allocation: BTreeMap<AssetType, f64> = BTreeMap::new();
        for holding in &mut holdings {
            holding.allocation_pct = if total_value > 0.0 {
                holding.value / total_value * 100.0
            } else {
                0.0
            };
            *asset_allocation.entry(holding.asset_type).or_insert(0.0) += holding.allocation_pct;
        }

        let positions: Vec<(f64, &PriceSeries)> = portfolio
            .assets
            .iter()
            .filter_map(|a| series.get(&a.symbol).map(|s| (a.quantity, s.as_ref())))
            .collect();
        let value_history = value_history(&positions);

        debug!(
            total_value,
            holdings = holdings.len(),
            history_points = value_history.len(),
            unavailable = unavailable.len(),
            "portfolio snapshot built"
        );

        Snapshot {
            summary: PortfolioSummary {
                portfolio_id: portfolio.id,
                total_value,
                asset_allocation,
                value_history,
                holdings,
                degraded,
                unavailable,
                as_of: Utc::now(),
            },
            series,
        }
    }
}

impl std::fmt::Debug for PortfolioAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioAggregator")
            .field("cache", &self.cache)
            .field("benchmark", &self.settings.benchmark_symbol)
            .field("lookback_days", &self.settings.lookback_days)
            .finish()
    }
}

/// Dates present in every series.
fn common_dates<'a>(mut series: impl Iterator<Item = &'a PriceSeries>) -> Vec<NaiveDate> {
    let Some(first) = series.next() else {
        return Vec::new();
    };
    let mut dates: BTreeSet<NaiveDate> = first.points().iter().map(|p| p.date).collect();
    for s in series {
        dates.retain(|d| s.close_on(*d).is_some());
    }
    dates.into_iter().collect()
}

/// Σ quantity × close for each date every position has a close on.
fn value_history(positions: &[(f64, &PriceSeries)]) -> Vec<ValuePoint> {
    common_dates(positions.iter().map(|(_, s)| *s))
        .into_iter()
        .map(|date| ValuePoint {
            date,
            value: positions
                .iter()
                .filter_map(|(qty, s)| s.close_on(date).map(|close| qty * close))
                .sum(),
        })
        .collect()
}

fn rebalance(
    current: &BTreeMap<AssetType, f64>,
    target: &BTreeMap<AssetType, f64>,
    threshold_pct: f64,
) -> Vec<RebalanceSuggestion> {
    let types: BTreeSet<AssetType> = current.keys().chain(target.keys()).copied().collect();

    types
        .into_iter()
        .filter_map(|asset_type| {
            let current_percentage = current.get(&asset_type).copied().unwrap_or(0.0);
            let target_percentage = target.get(&asset_type).copied().unwrap_or(0.0);
            let diff = current_percentage - target_percentage;
            if diff.abs() <= threshold_pct {
                return None;
            }
            Some(RebalanceSuggestion {
                asset_type,
                current_percentage,
                target_percentage,
                action: if diff > 0.0 {
                    RebalanceAction::Sell
                } else {
                    RebalanceAction::Buy
                },
                adjustment_needed: (diff.abs() * 100.0).round() / 100.0,
            })
        })
        .collect()
}
