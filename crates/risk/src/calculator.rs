//! Risk calculator
//!
//! Every metric has a fallible `try_*` form that says why it could not be computed,
//! and a graceful form that logs the reason and returns the neutral value (0.0 or an
//! empty map). Reporting pipelines use the graceful forms so partial data never
//! aborts an assessment.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use itertools::Itertools;
use ndarray::Array2;
use ndarray_stats::CorrelationExt;
use pocket_hedge_core::{AssetType, PortfolioSnapshot};
use tracing::debug;

use crate::config::RiskCalculatorConfig;
use crate::metrics::{DegradedMetric, RiskMetrics};
use crate::stats;
use crate::{RiskError, RiskResult};

/// Return series supplied to [`RiskCalculator::calculate_metrics`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricInputs<'a> {
    /// Periodic portfolio returns, chronologically ordered
    pub returns: &'a [f64],

    /// Optional benchmark returns aligned with `returns`
    pub benchmark: Option<&'a [f64]>,

    /// Optional per-asset returns, one row per asset
    pub asset_returns: Option<&'a Array2<f64>>,
}

impl<'a> MetricInputs<'a> {
    /// Inputs with portfolio returns only
    pub fn new(returns: &'a [f64]) -> Self {
        Self {
            returns,
            benchmark: None,
            asset_returns: None,
        }
    }

    /// Attach a benchmark return series
    pub fn with_benchmark(mut self, benchmark: &'a [f64]) -> Self {
        self.benchmark = Some(benchmark);
        self
    }

    /// Attach per-asset returns (rows are assets, columns are periods)
    pub fn with_asset_returns(mut self, asset_returns: &'a Array2<f64>) -> Self {
        self.asset_returns = Some(asset_returns);
        self
    }
}

/// Risk calculator
#[derive(Debug, Clone, Default)]
pub struct RiskCalculator {
    config: RiskCalculatorConfig,
}

impl RiskCalculator {
    /// Create a new risk calculator
    pub fn new(config: RiskCalculatorConfig) -> Self {
        Self { config }
    }

    /// Calculator configuration
    pub fn config(&self) -> &RiskCalculatorConfig {
        &self.config
    }

    /// Value at Risk at `confidence` (e.g. 0.95), in percent. Losses are negative.
    pub fn try_value_at_risk(&self, returns: &[f64], confidence: f64) -> RiskResult<f64> {
        let returns = non_empty(returns)?;
        let threshold = tail_threshold(&returns, confidence)?;
        Ok(threshold * 100.0)
    }

    /// Conditional Value at Risk: mean of returns at or below the VaR threshold, in percent
    pub fn try_conditional_value_at_risk(&self, returns: &[f64], confidence: f64) -> RiskResult<f64> {
        let returns = non_empty(returns)?;
        let threshold = tail_threshold(&returns, confidence)?;

        let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= threshold).collect();
        let tail_mean = stats::mean(&tail)
            .ok_or_else(|| RiskError::Degenerate("empty loss tail".to_string()))?;
        Ok(tail_mean * 100.0)
    }

    /// Annualized Sharpe ratio. Degenerate when returns have zero deviation.
    pub fn try_sharpe_ratio(&self, returns: &[f64]) -> RiskResult<f64> {
        let returns = at_least_two(returns)?;
        let sd = stats::std_dev(&returns).unwrap_or(0.0);
        if sd == 0.0 {
            return Err(RiskError::Degenerate("zero return deviation".to_string()));
        }

        Ok(self.mean_excess_return(&returns) / sd * self.config.periods_per_year.sqrt())
    }

    /// Annualized Sortino ratio using the deviation of negative returns only
    pub fn try_sortino_ratio(&self, returns: &[f64]) -> RiskResult<f64> {
        let returns = at_least_two(returns)?;
        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        if downside.is_empty() {
            return Err(RiskError::Degenerate("no negative returns".to_string()));
        }

        let downside_sd = stats::std_dev(&downside).unwrap_or(0.0);
        if downside_sd == 0.0 {
            return Err(RiskError::Degenerate("zero downside deviation".to_string()));
        }

        Ok(self.mean_excess_return(&returns) / downside_sd * self.config.periods_per_year.sqrt())
    }

    /// Calmar ratio: total return over the magnitude of the maximum drawdown
    pub fn try_calmar_ratio(&self, returns: &[f64]) -> RiskResult<f64> {
        let returns = non_empty(returns)?;
        let max_drawdown = self.max_drawdown(&returns);
        if max_drawdown == 0.0 {
            return Err(RiskError::Degenerate("no drawdown".to_string()));
        }
        Ok(self.total_return(&returns) / max_drawdown.abs())
    }

    /// Maximum drawdown over the compounded return curve, as a fraction <= 0
    pub fn max_drawdown(&self, returns: &[f64]) -> f64 {
        let returns = stats::clean(returns);

        let mut cumulative = 1.0;
        let mut running_max = f64::NEG_INFINITY;
        let mut max_drawdown: f64 = 0.0;

        for r in returns {
            cumulative *= 1.0 + r;
            running_max = running_max.max(cumulative);
            if running_max > 0.0 {
                max_drawdown = max_drawdown.min((cumulative - running_max) / running_max);
            }
        }

        max_drawdown
    }

    /// Compounded return over the series, as a fraction
    pub fn total_return(&self, returns: &[f64]) -> f64 {
        let returns = stats::clean(returns);
        if returns.is_empty() {
            return 0.0;
        }
        returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
    }

    /// Annualized volatility in percent
    pub fn try_volatility(&self, returns: &[f64]) -> RiskResult<f64> {
        let returns = at_least_two(returns)?;
        let sd = stats::std_dev(&returns).unwrap_or(0.0);
        Ok(sd * self.config.periods_per_year.sqrt() * 100.0)
    }

    /// Beta of `returns` against `benchmark`, aligned on the most recent common periods
    pub fn try_beta(&self, returns: &[f64], benchmark: &[f64]) -> RiskResult<f64> {
        let (returns, benchmark) = align_tail(&stats::clean(returns), &stats::clean(benchmark));
        if returns.len() < 2 {
            return Err(RiskError::InsufficientData(format!(
                "beta needs at least 2 aligned observations, got {}",
                returns.len()
            )));
        }

        let benchmark_var = stats::std_dev(&benchmark).map(|sd| sd * sd).unwrap_or(0.0);
        if benchmark_var == 0.0 {
            return Err(RiskError::Degenerate("zero benchmark variance".to_string()));
        }

        let cov = stats::covariance(&returns, &benchmark)
            .ok_or_else(|| RiskError::Degenerate("undefined covariance".to_string()))?;
        Ok(cov / benchmark_var)
    }

    /// Average off-diagonal Pearson correlation of asset returns (rows are assets)
    pub fn try_average_correlation(&self, asset_returns: &Array2<f64>) -> RiskResult<f64> {
        let (assets, periods) = asset_returns.dim();
        if assets < 2 || periods < 2 {
            return Err(RiskError::InsufficientData(format!(
                "correlation needs 2 assets and 2 periods, got {}x{}",
                assets, periods
            )));
        }

        let correlation = asset_returns
            .pearson_correlation()
            .map_err(|e| RiskError::InsufficientData(e.to_string()))?;

        let pairs: Vec<f64> = (0..assets)
            .tuple_combinations()
            .map(|(i, j)| correlation[[i, j]])
            .filter(|c| c.is_finite())
            .collect();

        stats::mean(&pairs).ok_or_else(|| RiskError::Degenerate("no finite correlations".to_string()))
    }

    /// Herfindahl index of position weights: 1.0 for a single position, 1/N for N equal ones
    pub fn herfindahl_index(&self, snapshot: &PortfolioSnapshot) -> f64 {
        snapshot
            .weights()
            .values()
            .map(|w| (w / 100.0).powi(2))
            .sum()
    }

    /// Largest position weight in percent
    pub fn max_position_weight(&self, snapshot: &PortfolioSnapshot) -> f64 {
        snapshot.weights().values().copied().fold(0.0, f64::max)
    }

    /// Combined weight per sector in percent
    pub fn sector_concentration(&self, snapshot: &PortfolioSnapshot) -> BTreeMap<String, f64> {
        snapshot.sector_allocation()
    }

    /// Largest sector weight in percent
    pub fn max_sector_weight(&self, snapshot: &PortfolioSnapshot) -> f64 {
        snapshot.sector_allocation().values().copied().fold(0.0, f64::max)
    }

    /// Combined weight per asset class in percent
    pub fn asset_class_concentration(&self, snapshot: &PortfolioSnapshot) -> BTreeMap<AssetType, f64> {
        snapshot.asset_allocation()
    }

    /// Graceful VaR, 0.0 when it cannot be computed
    pub fn value_at_risk(&self, returns: &[f64], confidence: f64) -> f64 {
        neutral("var", self.try_value_at_risk(returns, confidence))
    }

    /// Graceful CVaR, 0.0 when it cannot be computed
    pub fn conditional_value_at_risk(&self, returns: &[f64], confidence: f64) -> f64 {
        neutral("cvar", self.try_conditional_value_at_risk(returns, confidence))
    }

    /// Graceful Sharpe ratio, 0.0 when it cannot be computed
    pub fn sharpe_ratio(&self, returns: &[f64]) -> f64 {
        neutral("sharpe_ratio", self.try_sharpe_ratio(returns))
    }

    /// Graceful Sortino ratio, 0.0 when it cannot be computed
    pub fn sortino_ratio(&self, returns: &[f64]) -> f64 {
        neutral("sortino_ratio", self.try_sortino_ratio(returns))
    }

    /// Graceful Calmar ratio, 0.0 when it cannot be computed
    pub fn calmar_ratio(&self, returns: &[f64]) -> f64 {
        neutral("calmar_ratio", self.try_calmar_ratio(returns))
    }

    /// Graceful volatility, 0.0 when it cannot be computed
    pub fn volatility(&self, returns: &[f64]) -> f64 {
        neutral("volatility", self.try_volatility(returns))
    }

    /// Compute the full metric set for a snapshot. Never fails.
    pub fn calculate_metrics(&self, snapshot: &PortfolioSnapshot, inputs: MetricInputs<'_>) -> RiskMetrics {
        let returns = stats::clean(inputs.returns);
        let mut degraded = DegradedLog::default();
        let c95 = self.config.confidence_95;
        let c99 = self.config.confidence_99;

        let beta = match inputs.benchmark {
            Some(benchmark) => degraded.take("beta", self.try_beta(&returns, benchmark)),
            None => 0.0,
        };
        let average_correlation = match inputs.asset_returns {
            Some(matrix) => degraded.take("average_correlation", self.try_average_correlation(matrix)),
            None => 0.0,
        };

        let metrics = RiskMetrics {
            portfolio_id: snapshot.portfolio_id.clone(),
            calculated_at: Utc::now(),
            total_value: snapshot.total_value,
            observations: returns.len(),
            var_95: degraded.take("var_95", self.try_value_at_risk(&returns, c95)),
            var_99: degraded.take("var_99", self.try_value_at_risk(&returns, c99)),
            cvar_95: degraded.take("cvar_95", self.try_conditional_value_at_risk(&returns, c95)),
            cvar_99: degraded.take("cvar_99", self.try_conditional_value_at_risk(&returns, c99)),
            sharpe_ratio: degraded.take("sharpe_ratio", self.try_sharpe_ratio(&returns)),
            sortino_ratio: degraded.take("sortino_ratio", self.try_sortino_ratio(&returns)),
            calmar_ratio: degraded.take("calmar_ratio", self.try_calmar_ratio(&returns)),
            max_drawdown: self.max_drawdown(&returns),
            volatility: degraded.take("volatility", self.try_volatility(&returns)),
            total_return: self.total_return(&returns),
            beta,
            herfindahl_index: self.herfindahl_index(snapshot),
            max_position_weight: self.max_position_weight(snapshot),
            sector_concentration: self.sector_concentration(snapshot),
            asset_class_concentration: self.asset_class_concentration(snapshot),
            leverage: snapshot.leverage(),
            average_correlation,
            degraded: degraded.into_inner(),
        };

        debug!(
            portfolio_id = %metrics.portfolio_id,
            observations = metrics.observations,
            var_95 = metrics.var_95,
            volatility = metrics.volatility,
            degraded = metrics.degraded.len(),
            "risk metrics calculated"
        );
        metrics
    }

    fn mean_excess_return(&self, returns: &[f64]) -> f64 {
        let per_period_rf = self.config.risk_free_rate / self.config.periods_per_year;
        stats::mean(returns).unwrap_or(0.0) - per_period_rf
    }
}

/// Collects the reasons metrics fell back to neutral values
#[derive(Default)]
struct DegradedLog {
    entries: Vec<DegradedMetric>,
}

impl DegradedLog {
    fn take(&mut self, metric: &str, result: RiskResult<f64>) -> f64 {
        match result {
            Ok(value) => value,
            Err(e) => {
                self.entries.push(DegradedMetric {
                    metric: metric.to_string(),
                    reason: e.to_string(),
                });
                0.0
            }
        }
    }

    fn into_inner(self) -> Vec<DegradedMetric> {
        // One entry per metric
        let mut seen = BTreeSet::new();
        self.entries
            .into_iter()
            .filter(|d| seen.insert(d.metric.clone()))
            .collect()
    }
}

fn neutral(metric: &str, result: RiskResult<f64>) -> f64 {
    result.unwrap_or_else(|e| {
        debug!(metric, reason = %e, "metric degraded to neutral value");
        0.0
    })
}

fn non_empty(returns: &[f64]) -> RiskResult<Vec<f64>> {
    let returns = stats::clean(returns);
    if returns.is_empty() {
        return Err(RiskError::InsufficientData("empty return series".to_string()));
    }
    Ok(returns)
}

fn at_least_two(returns: &[f64]) -> RiskResult<Vec<f64>> {
    let returns = stats::clean(returns);
    if returns.len() < 2 {
        return Err(RiskError::InsufficientData(format!(
            "need at least 2 returns, got {}",
            returns.len()
        )));
    }
    Ok(returns)
}

fn tail_threshold(returns: &[f64], confidence: f64) -> RiskResult<f64> {
    if !(0.0..1.0).contains(&confidence) {
        return Err(RiskError::InvalidParameter(format!(
            "confidence must be in [0, 1), got {}",
            confidence
        )));
    }
    stats::percentile(returns, (1.0 - confidence) * 100.0)
        .ok_or_else(|| RiskError::InsufficientData("empty return series".to_string()))
}

/// Keep the most recent `min(len)` observations of both series
pub(crate) fn align_tail(a: &[f64], b: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = a.len().min(b.len());
    (a[a.len() - n..].to_vec(), b[b.len() - n..].to_vec())
}
