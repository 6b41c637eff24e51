//! Risk management module for the pocket hedge fund
//!
//! This module provides the portfolio risk analytics:
//! - Return-based metrics (VaR, CVaR, Sharpe, Sortino, Calmar, drawdown, volatility)
//! - Concentration metrics (Herfindahl index, sector and asset class weights)
//! - Risk limit checking against a typed limit table
//! - Deterministic stress scenarios and Monte Carlo simulation
//! - A combined report that never fails on partial data

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pocket_hedge_core::PortfolioSnapshot;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub mod calculator;
pub mod config;
pub mod history;
pub mod limits;
pub mod metrics;
pub mod monte_carlo;
mod stats;
pub mod stress_testing;

pub use calculator::{MetricInputs, RiskCalculator};
pub use config::{RiskCalculatorConfig, RiskConfig};
pub use history::{ReturnHistory, ReturnModel};
pub use limits::{LimitType, RiskLimit, RiskLimitChecker, Severity};
pub use metrics::{DegradedMetric, RiskMetrics};
pub use monte_carlo::{MonteCarloConfig, MonteCarloResult, MonteCarloSimulator, SimulationStatus};
pub use stress_testing::{
    CustomScenario, PositionImpact, ShockFilter, ShockRule, StressScenario, StressTestConfig,
    StressTestResult, StressTester,
};

/// Error types for the risk module
#[derive(thiserror::Error, Debug)]
pub enum RiskError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Degenerate input: {0}")]
    Degenerate(String),

    #[error("Unknown stress scenario: {0}")]
    UnknownScenario(String),

    #[error("Invalid stress scenario: {0}")]
    InvalidScenario(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Result type for the risk module
pub type RiskResult<T> = std::result::Result<T, RiskError>;

/// A report component that failed or degraded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportError {
    /// Component name, e.g. `stress:market_crash`
    pub component: String,

    /// What went wrong
    pub message: String,
}

/// Complete risk assessment of one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    /// Portfolio identifier
    pub portfolio_id: String,

    /// Report timestamp
    pub generated_at: DateTime<Utc>,

    /// Risk metrics
    pub metrics: RiskMetrics,

    /// Limit breaches
    pub breaches: Vec<RiskLimit>,

    /// Stress results keyed by scenario name
    pub stress_results: BTreeMap<String, StressTestResult>,

    /// Monte Carlo summary, when requested
    pub monte_carlo: Option<MonteCarloResult>,

    /// Components that failed or degraded
    pub errors: Vec<ReportError>,
}

impl RiskReport {
    /// Whether any limit is breached
    pub fn has_breaches(&self) -> bool {
        !self.breaches.is_empty()
    }

    /// Scenarios whose loss exceeds the acceptable limit
    pub fn failed_scenarios(&self) -> impl Iterator<Item = &StressTestResult> {
        self.stress_results.values().filter(|r| !r.passed)
    }
}

/// Historical inputs for a report
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportInputs<'a> {
    /// Portfolio returns, oldest first
    pub returns: &'a [f64],

    /// Optional benchmark returns
    pub benchmark: Option<&'a [f64]>,

    /// Optional per-asset return model
    pub model: Option<&'a ReturnModel>,
}

/// Risk engine combining the calculator, limit checker, stress tester and simulator
pub struct RiskEngine {
    calculator: RiskCalculator,
    checker: RiskLimitChecker,
    stress_tester: StressTester,
    simulator: MonteCarloSimulator,
    run_monte_carlo: bool,
}

impl RiskEngine {
    /// Create a new risk engine
    pub fn new(config: RiskConfig) -> Self {
        let calculator = RiskCalculator::new(config.calculator);
        Self {
            stress_tester: StressTester::new(config.stress, calculator.clone()),
            calculator,
            checker: RiskLimitChecker::new(),
            simulator: MonteCarloSimulator::new(config.monte_carlo),
            run_monte_carlo: config.run_monte_carlo,
        }
    }

    pub fn calculator(&self) -> &RiskCalculator {
        &self.calculator
    }

    pub fn checker(&self) -> &RiskLimitChecker {
        &self.checker
    }

    pub fn stress_tester(&self) -> &StressTester {
        &self.stress_tester
    }

    pub fn simulator(&self) -> &MonteCarloSimulator {
        &self.simulator
    }

    /// Metrics for a snapshot
    pub fn metrics(&self, snapshot: &PortfolioSnapshot, inputs: ReportInputs<'_>) -> RiskMetrics {
        let mut metric_inputs = MetricInputs::new(inputs.returns);
        if let Some(benchmark) = inputs.benchmark {
            metric_inputs = metric_inputs.with_benchmark(benchmark);
        }
        if let Some(history) = inputs.model.and_then(|m| m.history.as_ref()) {
            metric_inputs = metric_inputs.with_asset_returns(history);
        }
        self.calculator.calculate_metrics(snapshot, metric_inputs)
    }

    /// Run metrics, limits, the given stress scenarios (the standard set when empty) and,
    /// if configured, a Monte Carlo simulation. Partial failures are collected in `errors`.
    pub fn full_report(
        &self,
        snapshot: &PortfolioSnapshot,
        inputs: ReportInputs<'_>,
        scenarios: &[StressScenario],
    ) -> RiskReport {
        let mut errors = Vec::new();

        let metrics = self.metrics(snapshot, inputs);
        errors.extend(metrics.degraded.iter().map(|d| ReportError {
            component: format!("metrics:{}", d.metric),
            message: d.reason.clone(),
        }));

        let breaches = self.checker.check(snapshot, &metrics);

        let standard;
        let scenarios = if scenarios.is_empty() {
            standard = StressScenario::standard_set();
            &standard[..]
        } else {
            scenarios
        };
        let returns = (!inputs.returns.is_empty()).then_some(inputs.returns);
        let mut stress_results = BTreeMap::new();
        for scenario in scenarios {
            match self.stress_tester.run(snapshot, scenario, returns) {
                Ok(result) => {
                    stress_results.insert(result.scenario_name.clone(), result);
                }
                Err(e) => {
                    warn!(scenario = %scenario, error = %e, "stress scenario failed");
                    errors.push(ReportError {
                        component: format!("stress:{}", scenario.name()),
                        message: e.to_string(),
                    });
                }
            }
        }

        let monte_carlo = self.run_monte_carlo.then(|| {
            let result = self.simulator.simulate(snapshot, inputs.model);
            if let Some(reason) = &result.reason {
                errors.push(ReportError {
                    component: "monte_carlo".to_string(),
                    message: reason.clone(),
                });
            }
            result
        });

        let report = RiskReport {
            portfolio_id: snapshot.portfolio_id.clone(),
            generated_at: Utc::now(),
            metrics,
            breaches,
            stress_results,
            monte_carlo,
            errors,
        };

        info!(
            portfolio_id = %report.portfolio_id,
            breaches = report.breaches.len(),
            scenarios = report.stress_results.len(),
            errors = report.errors.len(),
            "risk report generated"
        );
        report
    }
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

/// Module version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use pocket_hedge_core::{Asset, AssetType, Position, PositionType};

    fn snapshot() -> PortfolioSnapshot {
        let positions: Vec<Position> = [("A", "Tech"), ("B", "Tech"), ("C", "Energy"), ("D", "Health")]
            .iter()
            .map(|(id, sector)| {
                let asset = Asset::new(*id, *id, AssetType::Stock).with_sector(*sector);
                Position::open("pf", asset, 25.0, 1.0, PositionType::Long).unwrap()
            })
            .collect();
        PortfolioSnapshot::from_positions("pf", &positions)
    }

    #[test]
    fn test_full_report_with_empty_history_is_structurally_valid() {
        let config = RiskConfig {
            run_monte_carlo: true,
            ..RiskConfig::default()
        };
        let report = RiskEngine::new(config).full_report(&snapshot(), ReportInputs::default(), &[]);

        assert_eq!(report.metrics.var_95, 0.0);
        assert_eq!(report.metrics.sharpe_ratio, 0.0);
        assert!((report.metrics.herfindahl_index - 0.25).abs() < 1e-12);
        assert_eq!(report.stress_results.len(), 6);
        let monte_carlo = report.monte_carlo.as_ref().unwrap();
        assert_eq!(monte_carlo.status, SimulationStatus::InsufficientData);
        assert!(report.errors.iter().any(|e| e.component == "monte_carlo"));
        assert!(report.errors.iter().any(|e| e.component == "metrics:var_95"));
    }

    #[test]
    fn test_full_report_collects_scenario_errors() {
        let broken = StressScenario::Custom(CustomScenario {
            name: "broken".to_string(),
            description: String::new(),
            shocks: Vec::new(),
            recommendations: Vec::new(),
        });
        let scenarios = vec![StressScenario::market_crash(), broken];
        let returns = vec![0.01, -0.02, 0.005, -0.01, 0.015];

        let inputs = ReportInputs {
            returns: &returns,
            ..ReportInputs::default()
        };
        let report = RiskEngine::default().full_report(&snapshot(), inputs, &scenarios);

        assert_eq!(report.stress_results.len(), 1);
        assert!(report.errors.iter().any(|e| e.component == "stress:broken"));
        assert!(report.monte_carlo.is_none());
        assert!(report.metrics.var_95 < 0.0);
        // Tech at 50% over the default 30% sector limit
        assert!(report
            .breaches
            .iter()
            .any(|b| b.limit_type == LimitType::SectorExposure && b.subject.as_deref() == Some("Tech")));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = RiskEngine::default().full_report(&snapshot(), ReportInputs::default(), &[]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["portfolio_id"], "pf");
        assert!(json["stress_results"]["market_crash"]["estimated_loss"].is_number());
    }
}
