//! Risk metrics records
//!
//! Plain data produced by the [`RiskCalculator`](crate::RiskCalculator) and handed to
//! reporting collaborators for serialization.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pocket_hedge_core::AssetType;
use serde::{Deserialize, Serialize};

/// A metric that fell back to its neutral value, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedMetric {
    /// Metric name
    pub metric: String,

    /// Reason reported by the calculator
    pub reason: String,
}

/// Portfolio risk metrics
///
/// VaR and CVaR are percentages of the return distribution, negative for losses.
/// Weights and concentrations are percentages, ratios are annualized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Portfolio identifier
    pub portfolio_id: String,

    /// Calculation timestamp
    pub calculated_at: DateTime<Utc>,

    /// Gross portfolio value
    pub total_value: f64,

    /// Number of return observations used
    pub observations: usize,

    /// 95% Value at Risk
    pub var_95: f64,

    /// 99% Value at Risk
    pub var_99: f64,

    /// 95% Conditional Value at Risk
    pub cvar_95: f64,

    /// 99% Conditional Value at Risk
    pub cvar_99: f64,

    /// Sharpe ratio
    pub sharpe_ratio: f64,

    /// Sortino ratio
    pub sortino_ratio: f64,

    /// Calmar ratio
    pub calmar_ratio: f64,

    /// Maximum drawdown as a fraction (always <= 0)
    pub max_drawdown: f64,

    /// Annualized volatility in percent
    pub volatility: f64,

    /// Compounded return over the sample, as a fraction
    pub total_return: f64,

    /// Beta against the benchmark series, 0 without one
    pub beta: f64,

    /// Herfindahl index of position weights
    pub herfindahl_index: f64,

    /// Largest position weight in percent
    pub max_position_weight: f64,

    /// Weight per sector in percent
    pub sector_concentration: BTreeMap<String, f64>,

    /// Weight per asset class in percent
    pub asset_class_concentration: BTreeMap<AssetType, f64>,

    /// Gross over net exposure
    pub leverage: f64,

    /// Average pairwise correlation of asset returns
    pub average_correlation: f64,

    /// Metrics that fell back to a neutral value
    pub degraded: Vec<DegradedMetric>,
}

impl RiskMetrics {
    /// Zeroed metrics for a portfolio
    pub fn empty(portfolio_id: impl Into<String>) -> Self {
        Self {
            portfolio_id: portfolio_id.into(),
            calculated_at: Utc::now(),
            total_value: 0.0,
            observations: 0,
            var_95: 0.0,
            var_99: 0.0,
            cvar_95: 0.0,
            cvar_99: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            calmar_ratio: 0.0,
            max_drawdown: 0.0,
            volatility: 0.0,
            total_return: 0.0,
            beta: 0.0,
            herfindahl_index: 0.0,
            max_position_weight: 0.0,
            sector_concentration: BTreeMap::new(),
            asset_class_concentration: BTreeMap::new(),
            leverage: 0.0,
            average_correlation: 0.0,
            degraded: Vec::new(),
        }
    }

    /// Whether any metric fell back to its neutral value
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Whether a given metric fell back to its neutral value
    pub fn is_metric_degraded(&self, metric: &str) -> bool {
        self.degraded.iter().any(|d| d.metric == metric)
    }
}
