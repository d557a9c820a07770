use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::asset::AssetType;

/// Where the price data behind a number came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Fetched from a provider during this request
    Live,
    /// Served from a live cache entry
    Cached,
    /// Provider failed; an expired cache entry was used instead
    Stale,
    /// No data at all; valued at zero
    Unavailable,
}

/// Beta, Sharpe ratio and volatility of a return sequence against a benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub beta: f64,

    pub sharpe_ratio: f64,

    /// Annualized standard deviation of returns, in percent
    pub volatility: f64,

    /// Number of aligned return observations the metrics were computed from
    pub observations: usize,

    /// Fewer than 2 observations; all metrics are 0.0
    pub insufficient_data: bool,
}

/// One point of the portfolio value history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuePoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Per-asset line of a portfolio summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingSummary {
    pub symbol: String,

    pub name: String,

    pub asset_type: AssetType,

    pub quantity: f64,

    /// Latest close, `None` when no data is available
    pub current_price: Option<f64>,

    pub purchase_price: f64,

    /// quantity × current_price (0 when unavailable)
    pub value: f64,

    /// (current_price − purchase_price) / purchase_price × 100
    pub gain_loss_pct: f64,

    /// This holding's value / total value × 100
    pub allocation_pct: f64,

    pub data_source: DataSource,
}

/// Portfolio-level aggregate, recomputed on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub portfolio_id: uuid::Uuid,

    pub total_value: f64,

    /// Percent of total value per asset type
    pub asset_allocation: BTreeMap<AssetType, f64>,

    /// Daily portfolio value over the dates every available series shares
    pub value_history: Vec<ValuePoint>,

    pub holdings: Vec<HoldingSummary>,

    /// At least one series was served from an expired cache entry
    pub degraded: bool,

    /// Symbols with no price data at all
    pub unavailable: Vec<String>,

    pub as_of: DateTime<Utc>,
}

/// Risk metrics of a portfolio together with data-quality flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub metrics: RiskMetrics,

    pub benchmark: String,

    pub risk_free_rate: f64,

    pub degraded: bool,

    pub unavailable: Vec<String>,
}

/// Historical Value at Risk.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueAtRisk {
    pub confidence_level: f64,

    /// Loss threshold as a positive currency amount
    pub var_amount: f64,

    /// Loss threshold as a positive percentage of the portfolio value
    pub var_percentage: f64,

    pub observations: usize,

    pub insufficient_data: bool,
}

/// Pairwise Pearson correlation of asset returns.
///
/// `None` marks a pair where correlation is undefined (flat series or fewer
/// than 2 shared observations).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub symbols: Vec<String>,

    pub matrix: BTreeMap<String, BTreeMap<String, Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        self.matrix.get(a).and_then(|row| row.get(b)).copied().flatten()
    }
}

/// A shock applied to every holding, e.g. -0.20 for a 20% drop.
///
/// `symbol_shocks` overrides `impact` for individual symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,

    pub impact: f64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub symbol_shocks: BTreeMap<String, f64>,
}

impl StressScenario {
    pub fn new(name: impl Into<String>, impact: f64) -> Self {
        Self {
            name: name.into(),
            impact,
            symbol_shocks: BTreeMap::new(),
        }
    }

    /// Shock `symbol` by `impact` instead of the scenario-wide one.
    pub fn with_symbol_shock(mut self, symbol: &str, impact: f64) -> Self {
        self.symbol_shocks.insert(symbol.trim().to_uppercase(), impact);
        self
    }

    /// Shock that applies to `symbol` under this scenario.
    pub fn shock_for(&self, symbol: &str) -> f64 {
        self.symbol_shocks.get(symbol).copied().unwrap_or(self.impact)
    }

    /// Market Crash, Recession, Interest Rate Hike, Inflation Spike.
    pub fn defaults() -> Vec<StressScenario> {
        vec![
            StressScenario::new("Market Crash", -0.20),
            StressScenario::new("Recession", -0.10),
            StressScenario::new("Interest Rate Hike", -0.05),
            StressScenario::new("Inflation Spike", -0.15),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressResult {
    pub scenario: String,

    pub impact: f64,

    pub portfolio_value: f64,

    /// Scenario value − base value (negative for losses)
    pub loss_amount: f64,

    pub loss_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressTestReport {
    pub base_value: f64,
    pub scenarios: Vec<StressResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceAction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceSuggestion {
    pub asset_type: AssetType,

    pub current_percentage: f64,

    pub target_percentage: f64,

    pub action: RebalanceAction,

    /// Absolute drift in percentage points, rounded to 2 decimals
    pub adjustment_needed: f64,
}
