use std::collections::BTreeMap;

use crate::errors::CoreError;
use crate::models::analytics::{
    CorrelationMatrix, RiskMetrics, StressResult, StressScenario, StressTestReport, ValueAtRisk,
};

/// Trading days per year used for annualization.
pub const TRADING_DAYS: f64 = 252.0;

/// Variances at or below this are treated as zero.
const ZERO_VARIANCE: f64 = 1e-15;

/// Simple percentage change between consecutive values.
///
/// A pair whose earlier value is 0 has no defined return and is skipped.
pub fn simple_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter_map(|w| {
            if w[0] != 0.0 {
                Some((w[1] - w[0]) / w[0])
            } else {
                None
            }
        })
        .collect()
}

/// Returns of two value sequences that are already aligned by date.
///
/// Index `i` of both outputs covers the same pair of dates; a pair is dropped
/// from both sides when either sequence has a zero at its start.
pub fn paired_returns(asset_values: &[f64], benchmark_values: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = asset_values.len().min(benchmark_values.len());
    let mut asset = Vec::with_capacity(n.saturating_sub(1));
    let mut benchmark = Vec::with_capacity(n.saturating_sub(1));

    for i in 1..n {
        let (a0, a1) = (asset_values[i - 1], asset_values[i]);
        let (b0, b1) = (benchmark_values[i - 1], benchmark_values[i]);
        if a0 == 0.0 || b0 == 0.0 {
            continue;
        }
        asset.push((a1 - a0) / a0);
        benchmark.push((b1 - b0) / b0);
    }

    (asset, benchmark)
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population covariance (divides by n).
fn covariance(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return 0.0;
    }
    let (mx, my) = (mean(&xs[..n]), mean(&ys[..n]));
    xs[..n]
        .iter()
        .zip(&ys[..n])
        .map(|(x, y)| (x - mx) * (y - my))
        .sum::<f64>()
        / n as f64
}

/// Population variance (divides by n).
fn variance(xs: &[f64]) -> f64 {
    covariance(xs, xs)
}

/// The most recent `min(len)` observations of both sequences.
fn trailing_window<'a>(a: &'a [f64], b: &'a [f64]) -> (&'a [f64], &'a [f64]) {
    let n = a.len().min(b.len());
    (&a[a.len() - n..], &b[b.len() - n..])
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

fn round_to(x: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (x * factor).round() / factor
}

/// Linear interpolation between closest ranks (numpy's default percentile).
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Stateless risk statistics over return sequences.
///
/// Never sees prices, only returns produced by [`simple_returns`] /
/// [`paired_returns`]. Degenerate inputs (too few points, flat series) give
/// zeros instead of errors so a dashboard can always render.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskEngine;

impl RiskEngine {
    pub fn new() -> Self {
        Self
    }

    /// Beta, annualized volatility (percent) and Sharpe ratio.
    ///
    /// - beta = cov(asset, benchmark) / var(benchmark), 0 for a flat benchmark
    /// - volatility = std(asset) × √252 × 100
    /// - sharpe = (mean(asset) × 252 − risk_free_rate) / (std(asset) × √252), 0 when std is 0
    ///
    /// Sequences of different length are cut to their common trailing window.
    pub fn compute(
        &self,
        asset_returns: &[f64],
        benchmark_returns: &[f64],
        risk_free_rate: f64,
    ) -> RiskMetrics {
        let (asset, benchmark) = trailing_window(asset_returns, benchmark_returns);
        let n = asset.len();
        if n < 2 {
            return RiskMetrics {
                observations: n,
                insufficient_data: true,
                ..RiskMetrics::default()
            };
        }

        let benchmark_variance = variance(benchmark);
        let beta = if benchmark_variance <= ZERO_VARIANCE {
            0.0
        } else {
            covariance(asset, benchmark) / benchmark_variance
        };

        let annual_std = variance(asset).sqrt() * TRADING_DAYS.sqrt();
        let sharpe_ratio = if annual_std <= ZERO_VARIANCE.sqrt() {
            0.0
        } else {
            (mean(asset) * TRADING_DAYS - risk_free_rate) / annual_std
        };

        RiskMetrics {
            beta: finite_or_zero(beta),
            sharpe_ratio: finite_or_zero(sharpe_ratio),
            volatility: finite_or_zero(annual_std * 100.0),
            observations: n,
            insufficient_data: false,
        }
    }

    /// Historical VaR: the `(1 − confidence)` percentile of `returns`, reported
    /// as a positive loss against `portfolio_value`.
    pub fn value_at_risk(
        &self,
        returns: &[f64],
        portfolio_value: f64,
        confidence: f64,
    ) -> Result<ValueAtRisk, CoreError> {
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(CoreError::ValidationError(format!(
                "confidence level must be between 0 and 1 (exclusive), got {confidence}"
            )));
        }

        let mut sorted: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
        if sorted.len() < 2 {
            return Ok(ValueAtRisk {
                confidence_level: confidence,
                observations: sorted.len(),
                insufficient_data: true,
                ..ValueAtRisk::default()
            });
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        let var = percentile(&sorted, (1.0 - confidence) * 100.0);
        Ok(ValueAtRisk {
            confidence_level: confidence,
            var_amount: finite_or_zero((var * portfolio_value).abs()),
            var_percentage: finite_or_zero((var * 100.0).abs()),
            observations: sorted.len(),
            insufficient_data: false,
        })
    }

    /// Pearson correlation for every pair of symbols, rounded to 3 decimals.
    pub fn correlation_matrix(&self, returns: &BTreeMap<String, Vec<f64>>) -> CorrelationMatrix {
        let symbols: Vec<String> = returns.keys().cloned().collect();
        let mut matrix = BTreeMap::new();

        for (a, ra) in returns {
            let row: BTreeMap<String, Option<f64>> = returns
                .iter()
                .map(|(b, rb)| (b.clone(), Self::pearson(ra, rb).map(|c| round_to(c, 3))))
                .collect();
            matrix.insert(a.clone(), row);
        }

        CorrelationMatrix { symbols, matrix }
    }

    /// Apply each scenario to `holdings` (symbol, current value). A holding
    /// moves by its symbol override when the scenario has one, otherwise by
    /// the scenario-wide impact.
    pub fn stress_test(
        &self,
        holdings: &[(&str, f64)],
        scenarios: &[StressScenario],
    ) -> Result<StressTestReport, CoreError> {
        let base_value: f64 = holdings.iter().map(|(_, value)| value).sum();
        let mut results = Vec::with_capacity(scenarios.len());

        for scenario in scenarios {
            let mut shocks =
                std::iter::once(scenario.impact).chain(scenario.symbol_shocks.values().copied());
            if let Some(bad) = shocks.find(|s| !s.is_finite() || *s < -1.0) {
                return Err(CoreError::ValidationError(format!(
                    "scenario '{}' shock {} must be a finite fraction >= -1",
                    scenario.name, bad
                )));
            }

            let portfolio_value: f64 = holdings
                .iter()
                .map(|(symbol, value)| value * (1.0 + scenario.shock_for(symbol)))
                .sum();
            let loss_amount = portfolio_value - base_value;
            let loss_percentage = if base_value > 0.0 {
                loss_amount / base_value * 100.0
            } else {
                0.0
            };

            results.push(StressResult {
                scenario: scenario.name.clone(),
                impact: scenario.impact,
                portfolio_value,
                loss_amount,
                loss_percentage,
            });
        }

        Ok(StressTestReport {
            base_value,
            scenarios: results,
        })
    }

    fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
        let (a, b) = trailing_window(a, b);
        if a.len() < 2 {
            return None;
        }
        let (va, vb) = (variance(a), variance(b));
        if va <= ZERO_VARIANCE || vb <= ZERO_VARIANCE {
            return None;
        }
        let r = covariance(a, b) / (va.sqrt() * vb.sqrt());
        r.is_finite().then(|| r.clamp(-1.0, 1.0))
    }
}
