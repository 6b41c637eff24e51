//! Configuration for the optimizer and the rebalance planner

use std::time::Duration;

use pocket_hedge_risk::Severity;
use serde::{Deserialize, Serialize};

use crate::planner::RebalanceStrategy;
use crate::{RebalanceError, RebalanceResult};

/// Rebalance planner configuration. Thresholds are weight fractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Strategy used when the caller does not pick one
    pub strategy: RebalanceStrategy,

    /// Drift threshold for threshold-based rebalancing
    pub threshold: f64,

    /// Drift threshold once a time-based rebalance is due
    pub time_based_threshold: f64,

    /// Days between time-based rebalances
    pub frequency_days: i64,

    /// Annualized volatility, in percent, above which the portfolio counts as volatile
    pub volatility_trigger: f64,

    /// Drift threshold for volatile portfolios
    pub volatile_threshold: f64,

    /// 95% VaR magnitude, in percent, above which the portfolio counts as risky
    pub risk_trigger: f64,

    /// Drift threshold for risky portfolios
    pub risky_threshold: f64,

    /// Drift threshold for calm portfolios under the volatility and risk strategies
    pub calm_threshold: f64,

    /// Estimated fee per unit of traded value
    pub fee_rate: f64,

    /// Only plan when a limit breach of at least this severity exists
    pub gate: Option<Severity>,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            strategy: RebalanceStrategy::ThresholdBased,
            threshold: 0.05,
            time_based_threshold: 0.02,
            frequency_days: 30,
            volatility_trigger: 25.0,
            volatile_threshold: 0.08,
            risk_trigger: 5.0,
            risky_threshold: 0.10,
            calm_threshold: 0.05,
            fee_rate: 0.001,
            gate: None,
        }
    }
}

impl RebalanceConfig {
    /// Check thresholds and rates
    pub fn validate(&self) -> RebalanceResult<()> {
        let thresholds = [
            ("threshold", self.threshold),
            ("time_based_threshold", self.time_based_threshold),
            ("volatile_threshold", self.volatile_threshold),
            ("risky_threshold", self.risky_threshold),
            ("calm_threshold", self.calm_threshold),
        ];
        for (name, value) in thresholds {
            if !(value > 0.0 && value <= 1.0) {
                return Err(RebalanceError::InvalidConfig(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if !(0.0..1.0).contains(&self.fee_rate) {
            return Err(RebalanceError::InvalidConfig(format!(
                "fee_rate must be in [0, 1), got {}",
                self.fee_rate
            )));
        }
        if self.frequency_days < 0 {
            return Err(RebalanceError::InvalidConfig(format!(
                "frequency_days must not be negative, got {}",
                self.frequency_days
            )));
        }
        if self.volatility_trigger < 0.0 || self.risk_trigger < 0.0 {
            return Err(RebalanceError::InvalidConfig(
                "volatility and risk triggers must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Portfolio optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Iteration cap for the iterative solvers
    pub max_iterations: usize,

    /// Convergence tolerance on the largest weight change per iteration
    pub tolerance: f64,

    /// Return periods per year used for annualization
    pub periods_per_year: f64,

    /// Annual risk-free rate, as a fraction
    pub risk_free_rate: f64,

    /// Wall-clock limit for a solve run through the worker pool, in milliseconds
    pub timeout_ms: u64,

    /// Concurrent solves allowed on the worker pool
    pub max_concurrent: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            tolerance: 1e-9,
            periods_per_year: 252.0,
            risk_free_rate: 0.02,
            timeout_ms: 2_000,
            max_concurrent: 4,
        }
    }
}

impl OptimizerConfig {
    /// Solve deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check solver settings
    pub fn validate(&self) -> RebalanceResult<()> {
        if self.max_iterations == 0 {
            return Err(RebalanceError::InvalidConfig("max_iterations must be positive".to_string()));
        }
        if !(self.tolerance > 0.0) {
            return Err(RebalanceError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if !(self.periods_per_year > 0.0) {
            return Err(RebalanceError::InvalidConfig(format!(
                "periods_per_year must be positive, got {}",
                self.periods_per_year
            )));
        }
        if self.timeout_ms == 0 || self.max_concurrent == 0 {
            return Err(RebalanceError::InvalidConfig(
                "timeout_ms and max_concurrent must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RebalanceConfig::default().validate().is_ok());
        assert!(OptimizerConfig::default().validate().is_ok());
        assert_eq!(RebalanceConfig::default().threshold, 0.05);
    }

    #[test]
    fn test_invalid_threshold() {
        let config = RebalanceConfig {
            threshold: 0.0,
            ..RebalanceConfig::default()
        };
        assert!(matches!(config.validate(), Err(RebalanceError::InvalidConfig(_))));

        let config = RebalanceConfig {
            calm_threshold: 1.5,
            ..RebalanceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let config: RebalanceConfig =
            serde_json::from_str(r#"{"strategy": "risk_based", "gate": "high"}"#).unwrap();
        assert_eq!(config.strategy, RebalanceStrategy::RiskBased);
        assert_eq!(config.gate, Some(Severity::High));
        assert_eq!(config.frequency_days, 30);
    }
}
