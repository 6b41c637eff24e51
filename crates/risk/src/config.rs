//! Configuration for the risk analytics module
//!
//! This module provides configuration structures for the risk calculator and the
//! full risk report.

use serde::{Deserialize, Serialize};

use crate::monte_carlo::MonteCarloConfig;
use crate::stress_testing::StressTestConfig;

/// Risk calculator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskCalculatorConfig {
    /// Annual risk-free rate, as a fraction
    pub risk_free_rate: f64,

    /// Return periods per year used for annualization
    pub periods_per_year: f64,

    /// Lower VaR/CVaR confidence level
    pub confidence_95: f64,

    /// Upper VaR/CVaR confidence level
    pub confidence_99: f64,
}

impl Default for RiskCalculatorConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.02,
            periods_per_year: 252.0,
            confidence_95: 0.95,
            confidence_99: 0.99,
        }
    }
}

/// Configuration for a full risk assessment
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Metric calculation
    pub calculator: RiskCalculatorConfig,

    /// Stress testing
    pub stress: StressTestConfig,

    /// Monte Carlo simulation
    pub monte_carlo: MonteCarloConfig,

    /// Whether the full report includes a Monte Carlo run
    pub run_monte_carlo: bool,
}
