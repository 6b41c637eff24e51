//! Monte Carlo simulation of portfolio value
//!
//! Draws correlated normal returns from a [`ReturnModel`] and reports the simulated
//! distribution of portfolio value. Runs are bounded by a simulation cap and a
//! wall-clock budget.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use pocket_hedge_core::PortfolioSnapshot;
use pocket_hedge_logging::HighResTimer;
use rand::distributions::Distribution;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use tracing::{info, warn};

use crate::history::ReturnModel;
use crate::stats;
use crate::{RiskError, RiskResult};

/// How often, in samples, the wall-clock budget is checked
const BUDGET_CHECK_INTERVAL: usize = 256;

/// Monte Carlo configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    /// Number of simulated scenarios
    pub num_simulations: usize,

    /// Hard cap applied to `num_simulations`
    pub max_simulations: usize,

    /// Horizon in return periods
    pub horizon_days: u32,

    /// Seed for reproducible runs
    pub seed: Option<u64>,

    /// Wall-clock budget in milliseconds
    pub time_budget_ms: u64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            num_simulations: 10_000,
            max_simulations: 100_000,
            horizon_days: 1,
            seed: None,
            time_budget_ms: 5_000,
        }
    }
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    /// Every requested scenario was simulated
    Completed,
    /// The time budget stopped sampling early
    Truncated,
    /// Inputs were missing or degenerate, the result is zeroed
    InsufficientData,
}

/// Simulated distribution summary
///
/// Values are in currency units. VaR/CVaR are percentage returns, negative for losses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub initial_value: f64,
    pub mean_value: f64,
    pub std_value: f64,
    pub var_95: f64,
    pub var_99: f64,
    pub cvar_95: f64,
    pub cvar_99: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub simulations_requested: usize,
    pub simulations_run: usize,
    pub horizon_days: u32,
    pub status: SimulationStatus,
    /// Why the result is zeroed
    pub reason: Option<String>,
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl MonteCarloResult {
    /// Zeroed result for missing or degenerate inputs
    pub fn insufficient(initial_value: f64, reason: impl Into<String>) -> Self {
        Self {
            initial_value,
            mean_value: 0.0,
            std_value: 0.0,
            var_95: 0.0,
            var_99: 0.0,
            cvar_95: 0.0,
            cvar_99: 0.0,
            min_value: 0.0,
            max_value: 0.0,
            simulations_requested: 0,
            simulations_run: 0,
            horizon_days: 0,
            status: SimulationStatus::InsufficientData,
            reason: Some(reason.into()),
            elapsed_ms: 0,
            timestamp: Utc::now(),
        }
    }

    /// Whether the time budget cut the run short
    pub fn truncated(&self) -> bool {
        self.status == SimulationStatus::Truncated
    }
}

/// Monte Carlo simulator
#[derive(Debug, Clone, Default)]
pub struct MonteCarloSimulator {
    config: MonteCarloConfig,
}

impl MonteCarloSimulator {
    /// Create a new simulator
    pub fn new(config: MonteCarloConfig) -> Self {
        Self { config }
    }

    /// Configuration
    pub fn config(&self) -> &MonteCarloConfig {
        &self.config
    }

    /// Simulate a snapshot. Missing or degenerate inputs give a zeroed result.
    pub fn simulate(&self, snapshot: &PortfolioSnapshot, model: Option<&ReturnModel>) -> MonteCarloResult {
        let result = match model {
            Some(model) => self.try_simulate(snapshot, model),
            None => Err(RiskError::InsufficientData("no historical return model".to_string())),
        };
        result.unwrap_or_else(|e| {
            warn!(portfolio_id = %snapshot.portfolio_id, reason = %e, "monte carlo simulation degraded");
            MonteCarloResult::insufficient(snapshot.total_value, e.to_string())
        })
    }

    /// Simulate a snapshot, reporting why it could not be simulated
    pub fn try_simulate(&self, snapshot: &PortfolioSnapshot, model: &ReturnModel) -> RiskResult<MonteCarloResult> {
        if snapshot.is_empty() || snapshot.total_value <= 0.0 {
            return Err(RiskError::InsufficientData("portfolio has no value".to_string()));
        }

        let mut weights = Array1::<f64>::zeros(model.len());
        for position in &snapshot.positions {
            let index = model.index_of(&position.asset_id).ok_or_else(|| {
                RiskError::InsufficientData(format!("no return model for {}", position.asset_id))
            })?;
            weights[index] += position.net_exposure() / snapshot.total_value;
        }

        self.try_simulate_weights(snapshot.total_value, &weights, model)
    }

    /// Simulate an explicit weight vector in model order
    pub fn try_simulate_weights(
        &self,
        initial_value: f64,
        weights: &Array1<f64>,
        model: &ReturnModel,
    ) -> RiskResult<MonteCarloResult> {
        if weights.len() != model.len() {
            return Err(RiskError::DimensionMismatch {
                expected: model.len(),
                actual: weights.len(),
            });
        }
        if model.is_empty() {
            return Err(RiskError::InsufficientData("empty return model".to_string()));
        }

        let requested = self.config.num_simulations.min(self.config.max_simulations);
        if requested == 0 {
            return Err(RiskError::InvalidParameter("num_simulations must be positive".to_string()));
        }

        let mut timer = HighResTimer::new("monte_carlo");
        timer
            .with_context("assets", model.len().to_string())
            .with_context("simulations", requested.to_string());

        let horizon = self.config.horizon_days.max(1) as f64;
        let mean = &model.expected_returns * horizon;
        let covariance = &model.covariance * horizon;
        let factor = cholesky_with_jitter(&covariance)
            .ok_or_else(|| RiskError::Degenerate("covariance is not positive semi-definite".to_string()))?;
        timer.checkpoint("decomposed");

        let normal = Normal::new(0.0, 1.0).map_err(|e| RiskError::InvalidParameter(e.to_string()))?;
        let mut rng = match self.config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        let budget = Duration::from_millis(self.config.time_budget_ms);
        let started = Instant::now();
        let mut returns = Vec::with_capacity(requested);
        let mut truncated = false;

        // Portfolio return is w·(mu + L z) = w·mu + (L'w)·z
        let expected = weights.dot(&mean);
        let loading = factor.t().dot(weights);

        for i in 0..requested {
            if i > 0 && i % BUDGET_CHECK_INTERVAL == 0 && started.elapsed() >= budget {
                truncated = true;
                break;
            }
            let shock: f64 = loading.iter().map(|l| l * normal.sample(&mut rng)).sum();
            returns.push(expected + shock);
        }
        timer.checkpoint("sampled");

        let result = summarize(initial_value, &returns, requested, self.config.horizon_days, truncated, &timer)?;
        timer.stop();

        info!(
            simulations = result.simulations_run,
            truncated = result.truncated(),
            var_95 = result.var_95,
            "monte carlo simulation completed"
        );
        Ok(result)
    }
}

fn summarize(
    initial_value: f64,
    returns: &[f64],
    requested: usize,
    horizon_days: u32,
    truncated: bool,
    timer: &HighResTimer,
) -> RiskResult<MonteCarloResult> {
    let values: Vec<f64> = returns.iter().map(|r| initial_value * (1.0 + r)).collect();
    let empty = || RiskError::InsufficientData("no simulated scenarios".to_string());

    let tail = |confidence: f64| -> RiskResult<(f64, f64)> {
        let threshold = stats::percentile(returns, (1.0 - confidence) * 100.0).ok_or_else(empty)?;
        let losses: Vec<f64> = returns.iter().copied().filter(|r| *r <= threshold).collect();
        let cvar = stats::mean(&losses).unwrap_or(threshold);
        Ok((threshold * 100.0, cvar * 100.0))
    };
    let (var_95, cvar_95) = tail(0.95)?;
    let (var_99, cvar_99) = tail(0.99)?;

    Ok(MonteCarloResult {
        initial_value,
        mean_value: stats::mean(&values).ok_or_else(empty)?,
        std_value: stats::std_dev(&values).unwrap_or(0.0),
        var_95,
        var_99,
        cvar_95,
        cvar_99,
        min_value: values.iter().copied().fold(f64::INFINITY, f64::min),
        max_value: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        simulations_requested: requested,
        simulations_run: values.len(),
        horizon_days,
        status: if truncated {
            SimulationStatus::Truncated
        } else {
            SimulationStatus::Completed
        },
        reason: None,
        elapsed_ms: timer.elapsed().as_millis() as u64,
        timestamp: Utc::now(),
    })
}

/// Lower-triangular Cholesky factor, `None` if the matrix is not positive definite
fn cholesky(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    let n = matrix.nrows();
    let mut lower = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| lower[[i, k]] * lower[[j, k]]).sum();
            if i == j {
                let pivot = matrix[[i, i]] - sum;
                if !pivot.is_finite() || pivot <= 0.0 {
                    return None;
                }
                lower[[i, j]] = pivot.sqrt();
            } else {
                lower[[i, j]] = (matrix[[i, j]] - sum) / lower[[j, j]];
            }
        }
    }

    Some(lower)
}

/// Cholesky factor, adding growing diagonal jitter for semi-definite matrices
fn cholesky_with_jitter(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    if let Some(lower) = cholesky(matrix) {
        return Some(lower);
    }

    let n = matrix.nrows();
    let mean_diagonal = matrix.diag().iter().map(|d| d.abs()).sum::<f64>() / n.max(1) as f64;
    let scale = if mean_diagonal > 0.0 { mean_diagonal } else { 1.0 };

    (0..6).find_map(|attempt| {
        let jitter = scale * 1e-10 * 10f64.powi(attempt);
        let mut adjusted = matrix.clone();
        adjusted.diag_mut().mapv_inplace(|d| d + jitter);
        cholesky(&adjusted)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pocket_hedge_core::{Asset, AssetType, Position, PositionType};

    fn snapshot(ids: &[&str]) -> PortfolioSnapshot {
        let positions: Vec<Position> = ids
            .iter()
            .map(|id| {
                let asset = Asset::new(*id, *id, AssetType::Stock);
                Position::open("pf", asset, 50.0, 10.0, PositionType::Long).unwrap()
            })
            .collect();
        PortfolioSnapshot::from_positions("pf", &positions)
    }

    fn single_asset_model() -> ReturnModel {
        ReturnModel::new(vec!["A".to_string()], array![0.001], array![[0.0004]]).unwrap()
    }

    fn seeded(num_simulations: usize) -> MonteCarloSimulator {
        MonteCarloSimulator::new(MonteCarloConfig {
            num_simulations,
            seed: Some(42),
            ..MonteCarloConfig::default()
        })
    }

    #[test]
    fn test_distribution_matches_model() {
        let result = seeded(20_000).simulate(&snapshot(&["A"]), Some(&single_asset_model()));

        assert_eq!(result.status, SimulationStatus::Completed);
        assert_eq!(result.simulations_run, 20_000);
        assert!((result.initial_value - 500.0).abs() < 1e-9);
        // mean return 0.1%, sd 2%
        assert!((result.mean_value - 500.5).abs() < 0.5);
        assert!((result.std_value - 10.0).abs() < 0.5);
        assert!((result.var_95 - (-3.19)).abs() < 0.3);
        assert!(result.var_99 <= result.var_95);
        assert!(result.cvar_95 <= result.var_95);
        assert!(result.cvar_99 <= result.cvar_95 + 1e-9);
        assert!(result.min_value < result.mean_value && result.mean_value < result.max_value);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let model = single_asset_model();
        let a = seeded(1_000).simulate(&snapshot(&["A"]), Some(&model));
        let b = seeded(1_000).simulate(&snapshot(&["A"]), Some(&model));
        assert_eq!(a.var_95, b.var_95);
        assert_eq!(a.mean_value, b.mean_value);
    }

    #[test]
    fn test_missing_model_gives_zeroed_result() {
        let result = seeded(100).simulate(&snapshot(&["A"]), None);
        assert_eq!(result.status, SimulationStatus::InsufficientData);
        assert_eq!(result.var_95, 0.0);
        assert_eq!(result.mean_value, 0.0);
        assert!(result.reason.is_some());

        let uncovered = seeded(100).simulate(&snapshot(&["A", "B"]), Some(&single_asset_model()));
        assert_eq!(uncovered.status, SimulationStatus::InsufficientData);
    }

    #[test]
    fn test_simulation_cap() {
        let simulator = MonteCarloSimulator::new(MonteCarloConfig {
            num_simulations: 5_000,
            max_simulations: 300,
            seed: Some(7),
            ..MonteCarloConfig::default()
        });
        let result = simulator.simulate(&snapshot(&["A"]), Some(&single_asset_model()));
        assert_eq!(result.simulations_requested, 300);
        assert_eq!(result.simulations_run, 300);
    }

    #[test]
    fn test_time_budget_truncates() {
        let simulator = MonteCarloSimulator::new(MonteCarloConfig {
            num_simulations: 50_000,
            seed: Some(7),
            time_budget_ms: 0,
            ..MonteCarloConfig::default()
        });
        let result = simulator.simulate(&snapshot(&["A"]), Some(&single_asset_model()));
        assert!(result.truncated());
        assert_eq!(result.simulations_run, BUDGET_CHECK_INTERVAL);
    }

    #[test]
    fn test_correlated_assets_and_singular_covariance() {
        // perfectly correlated pair: singular covariance needs jitter
        let model = ReturnModel::new(
            vec!["A".to_string(), "B".to_string()],
            array![0.001, 0.001],
            array![[0.0004, 0.0004], [0.0004, 0.0004]],
        )
        .unwrap();
        let result = seeded(2_000).simulate(&snapshot(&["A", "B"]), Some(&model));
        assert_eq!(result.status, SimulationStatus::Completed);
        assert!((result.std_value - 20.0).abs() < 2.0);
    }

    #[test]
    fn test_cholesky_factor() {
        let matrix = array![[4.0, 2.0], [2.0, 3.0]];
        let lower = cholesky(&matrix).unwrap();
        let rebuilt = lower.dot(&lower.t());
        for (a, b) in rebuilt.iter().zip(matrix.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!(cholesky(&array![[0.0, 0.0], [0.0, 0.0]]).is_none());
    }
}
