//! Long-only portfolio optimization
//!
//! Every strategy returns weights in [0, 1] that sum to one. When a solver fails to
//! converge, or produces something unusable, the result falls back to equal weights and
//! records why in `reason`.
//!
//! The quadratic objectives are solved by projected gradient descent onto the unit
//! simplex, cut by the return target when one is set, with a fixed step of `1 / L`
//! where `L` bounds the gradient's Lipschitz constant. A target outside the range of
//! the expected returns is rejected before solving. Risk parity uses a damped
//! multiplicative update on risk contributions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2};
use pocket_hedge_logging::HighResTimer;
use pocket_hedge_risk::ReturnModel;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OptimizerConfig;
use crate::RebalanceError;

const MAX_BRACKET_DOUBLINGS: usize = 200;
const MAX_BISECTION_STEPS: usize = 400;

/// Allocation objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    /// Minimum variance, optionally at a target return or with a return preference
    MeanVariance,
    /// Equal risk contribution
    RiskParity,
    /// `1 / N` for every asset
    EqualWeight,
    /// Weights proportional to positive expected returns
    Momentum,
    /// Minimum variance, no return term
    MinimumVariance,
}

impl OptimizationStrategy {
    /// Every strategy, in display order
    pub const ALL: [OptimizationStrategy; 5] = [
        OptimizationStrategy::MeanVariance,
        OptimizationStrategy::RiskParity,
        OptimizationStrategy::EqualWeight,
        OptimizationStrategy::Momentum,
        OptimizationStrategy::MinimumVariance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationStrategy::MeanVariance => "mean_variance",
            OptimizationStrategy::RiskParity => "risk_parity",
            OptimizationStrategy::EqualWeight => "equal_weight",
            OptimizationStrategy::Momentum => "momentum",
            OptimizationStrategy::MinimumVariance => "minimum_variance",
        }
    }
}

impl fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OptimizationStrategy {
    type Err = RebalanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| RebalanceError::UnknownStrategy(s.to_string()))
    }
}

/// What to optimize for
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub strategy: OptimizationStrategy,

    /// Annualized target return, mean-variance only
    #[serde(default)]
    pub target_return: Option<f64>,

    /// Return preference `λ` in `w'Σw - λ w'μ`, mean-variance only
    #[serde(default)]
    pub risk_tolerance: Option<f64>,
}

impl OptimizationRequest {
    pub fn new(strategy: OptimizationStrategy) -> Self {
        Self {
            strategy,
            target_return: None,
            risk_tolerance: None,
        }
    }

    pub fn with_target_return(mut self, target_return: f64) -> Self {
        self.target_return = Some(target_return);
        self
    }

    pub fn with_risk_tolerance(mut self, risk_tolerance: f64) -> Self {
        self.risk_tolerance = Some(risk_tolerance);
        self
    }
}

impl From<OptimizationStrategy> for OptimizationRequest {
    fn from(strategy: OptimizationStrategy) -> Self {
        Self::new(strategy)
    }
}

/// Optimized allocation and its characteristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Requested strategy
    pub strategy: OptimizationStrategy,

    /// Target weight per asset, as fractions summing to one
    pub weights: BTreeMap<String, f64>,

    /// Annualized expected return of the weights, as a fraction
    pub expected_return: f64,

    /// Annualized volatility of the weights, as a fraction
    pub volatility: f64,

    /// Sharpe ratio of the weights, 0 when volatility is 0
    pub sharpe_ratio: f64,

    /// Solver iterations used
    pub iterations: usize,

    /// Whether the solver met its tolerance
    pub converged: bool,

    /// Whether equal weights were substituted
    pub fallback_used: bool,

    /// Why the fallback happened
    pub reason: Option<String>,
}

struct Solution {
    weights: Array1<f64>,
    iterations: usize,
    converged: bool,
}

/// Portfolio optimizer
#[derive(Debug, Clone, Default)]
pub struct PortfolioOptimizer {
    config: OptimizerConfig,
}

impl PortfolioOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Optimize weights over the model's assets
    pub fn optimize(&self, model: &ReturnModel, request: &OptimizationRequest) -> OptimizationResult {
        let n = model.len();
        if n == 0 {
            return OptimizationResult {
                strategy: request.strategy,
                weights: BTreeMap::new(),
                expected_return: 0.0,
                volatility: 0.0,
                sharpe_ratio: 0.0,
                iterations: 0,
                converged: false,
                fallback_used: true,
                reason: Some("no assets to optimize".to_string()),
            };
        }

        let mut timer = HighResTimer::new("optimizer.solve");
        timer
            .with_context("strategy", request.strategy.as_str())
            .with_context("assets", n.to_string());

        let outcome = match request.strategy {
            OptimizationStrategy::EqualWeight => Ok(Solution {
                weights: equal_weights(n),
                iterations: 0,
                converged: true,
            }),
            OptimizationStrategy::Momentum => momentum_weights(&model.expected_returns),
            OptimizationStrategy::MinimumVariance => self.projected_gradient(model, None, None),
            OptimizationStrategy::MeanVariance => {
                let target = request.target_return.map(|t| t / self.config.periods_per_year);
                self.projected_gradient(model, target, request.risk_tolerance)
            }
            OptimizationStrategy::RiskParity => self.risk_parity(&model.covariance),
        };
        timer.checkpoint("solved");

        let (weights, iterations, converged, reason) = match outcome {
            Ok(solution) if !solution.converged => (
                None,
                solution.iterations,
                false,
                Some(format!("no convergence after {} iterations", solution.iterations)),
            ),
            Ok(solution) => match finalize(&solution.weights) {
                Some(weights) => (Some(weights), solution.iterations, true, None),
                None => (None, solution.iterations, true, Some("solver produced unusable weights".to_string())),
            },
            Err(reason) => (None, 0, false, Some(reason)),
        };

        let fallback_used = weights.is_none();
        if let Some(reason) = &reason {
            warn!(strategy = %request.strategy, reason = %reason, "optimizer falling back to equal weights");
        }
        let weights = weights.unwrap_or_else(|| equal_weights(n));
        timer.stop();

        let result = self.summarize(model, request.strategy, &weights, iterations, converged, fallback_used, reason);
        debug!(
            strategy = %result.strategy,
            expected_return = result.expected_return,
            volatility = result.volatility,
            iterations = result.iterations,
            "optimization finished"
        );
        result
    }

    /// Minimize `(w'Σw - λ w'μ) / s_v` over the simplex, where `s_v` is the mean variance
    /// used for scaling. With a target return `t` every iterate is projected onto the
    /// simplex cut by `w'μ = t`, so the constraint holds exactly at the solution.
    fn projected_gradient(
        &self,
        model: &ReturnModel,
        target: Option<f64>,
        risk_tolerance: Option<f64>,
    ) -> Result<Solution, String> {
        let covariance = &model.covariance;
        let mu = &model.expected_returns;
        let n = mu.len();

        let variance_scale = covariance.diag().mean().unwrap_or(0.0);
        if !(variance_scale > 0.0) {
            return Err("covariance has no positive variance".to_string());
        }
        let target = match target {
            Some(t) => self.feasible_target(mu, t)?,
            None => None,
        };
        let project = |v: &Array1<f64>| match target {
            Some(t) => project_to_target(v, mu, t),
            None => project_to_simplex(v),
        };
        let lambda = risk_tolerance.unwrap_or(0.0);

        let row_bound = covariance
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max);
        let step = variance_scale / (2.0 * row_bound);

        let mut weights = project(&equal_weights(n));
        for iteration in 1..=self.config.max_iterations {
            let gradient = (covariance.dot(&weights) * 2.0 - mu * lambda) / variance_scale;

            let next = project(&(&weights - &(gradient * step)));
            if next.iter().any(|w| !w.is_finite()) {
                return Err("non-finite weights during descent".to_string());
            }
            let change = max_abs_diff(&next, &weights);
            weights = next;
            if change < self.config.tolerance {
                if let Some(t) = target {
                    let residual = (weights.dot(mu) - t).abs();
                    if residual > self.config.tolerance * max_abs(mu) {
                        return Err(format!(
                            "target return missed by {:.3e}",
                            residual * self.config.periods_per_year
                        ));
                    }
                }
                return Ok(Solution {
                    weights,
                    iterations: iteration,
                    converged: true,
                });
            }
        }

        Ok(Solution {
            weights,
            iterations: self.config.max_iterations,
            converged: false,
        })
    }

    /// Per-period target if some long-only weights reach it. `None` when every asset has
    /// the same expected return, since the sum constraint then fixes `w'μ` already.
    fn feasible_target(&self, mu: &Array1<f64>, target: f64) -> Result<Option<f64>, String> {
        let lowest = mu.iter().copied().fold(f64::INFINITY, f64::min);
        let highest = mu.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let slack = f64::EPSILON * max_abs(mu).max(target.abs()) * 16.0;

        if !target.is_finite() || target < lowest - slack || target > highest + slack {
            let periods = self.config.periods_per_year;
            return Err(format!(
                "target return {:.4} outside the achievable range [{:.4}, {:.4}]",
                target * periods,
                lowest * periods,
                highest * periods
            ));
        }
        if highest - lowest <= slack {
            return Ok(None);
        }
        Ok(Some(target.clamp(lowest, highest)))
    }

    /// Equalize each asset's share `w_i (Σw)_i / w'Σw` at `1 / N`
    fn risk_parity(&self, covariance: &Array2<f64>) -> Result<Solution, String> {
        let n = covariance.nrows();
        let target_share = 1.0 / n as f64;
        let mut weights = equal_weights(n);

        for iteration in 1..=self.config.max_iterations {
            let marginal = covariance.dot(&weights);
            let variance = weights.dot(&marginal);
            if !(variance > 0.0) {
                return Err("portfolio variance is not positive".to_string());
            }

            let shares = &weights * &marginal / variance;
            if shares.iter().any(|s| !(*s > 0.0)) {
                return Err("non-positive risk contribution".to_string());
            }
            let deviation = shares.iter().map(|s| (s - target_share).abs()).fold(0.0, f64::max);
            if deviation < self.config.tolerance {
                return Ok(Solution {
                    weights,
                    iterations: iteration,
                    converged: true,
                });
            }

            let adjusted = &weights * &shares.mapv(|s| (target_share / s).sqrt());
            let total = adjusted.sum();
            weights = adjusted / total;
        }

        Ok(Solution {
            weights,
            iterations: self.config.max_iterations,
            converged: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn summarize(
        &self,
        model: &ReturnModel,
        strategy: OptimizationStrategy,
        weights: &Array1<f64>,
        iterations: usize,
        converged: bool,
        fallback_used: bool,
        reason: Option<String>,
    ) -> OptimizationResult {
        let periods = self.config.periods_per_year;
        let expected_return = model.portfolio_return(weights) * periods;
        let volatility = (model.portfolio_variance(weights).max(0.0) * periods).sqrt();
        let sharpe_ratio = if volatility > 0.0 {
            (expected_return - self.config.risk_free_rate) / volatility
        } else {
            0.0
        };

        OptimizationResult {
            strategy,
            weights: model
                .asset_ids
                .iter()
                .cloned()
                .zip(weights.iter().copied())
                .collect(),
            expected_return,
            volatility,
            sharpe_ratio,
            iterations,
            converged,
            fallback_used,
            reason,
        }
    }
}

fn equal_weights(n: usize) -> Array1<f64> {
    Array1::from_elem(n, 1.0 / n as f64)
}

fn momentum_weights(scores: &Array1<f64>) -> Result<Solution, String> {
    let positive = scores.mapv(|s| if s.is_finite() { s.max(0.0) } else { 0.0 });
    let total = positive.sum();
    if !(total > 0.0) {
        return Err("no positive momentum scores".to_string());
    }
    Ok(Solution {
        weights: positive / total,
        iterations: 0,
        converged: true,
    })
}

/// Euclidean projection onto `{w : w >= 0, sum(w) = 1}`
fn project_to_simplex(v: &Array1<f64>) -> Array1<f64> {
    let mut sorted = v.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (j, u) in sorted.iter().enumerate() {
        cumulative += u;
        let candidate = (cumulative - 1.0) / (j + 1) as f64;
        if u - candidate > 0.0 {
            theta = candidate;
        }
    }
    v.mapv(|x| (x - theta).max(0.0))
}

/// Euclidean projection onto `{w : w >= 0, sum(w) = 1, w'μ = t}`
///
/// The projection is `P(v - βμ)` for the multiplier `β` of the return constraint, with
/// `P` the simplex projection. `w'μ` is non-increasing in `β`, so `β` is bracketed by
/// doubling and then bisected. `t` must lie within the range of `μ`.
fn project_to_target(v: &Array1<f64>, mu: &Array1<f64>, target: f64) -> Array1<f64> {
    let shifted = |beta: f64| project_to_simplex(&(v - &(mu * beta)));
    let gap = |beta: f64| shifted(beta).dot(mu) - target;

    let mut lo = -1.0_f64;
    let mut hi = 1.0_f64;
    for _ in 0..MAX_BRACKET_DOUBLINGS {
        let below = gap(lo) < 0.0;
        let above = gap(hi) > 0.0;
        if !below && !above {
            break;
        }
        if below {
            lo *= 2.0;
        }
        if above {
            hi *= 2.0;
        }
    }

    for _ in 0..MAX_BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if hi - lo <= f64::EPSILON * mid.abs().max(1.0) {
            break;
        }
        if gap(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    shifted(0.5 * (lo + hi))
}

/// Clamp rounding noise and renormalize, `None` when the weights are unusable
fn finalize(weights: &Array1<f64>) -> Option<Array1<f64>> {
    if weights.iter().any(|w| !w.is_finite()) {
        return None;
    }
    let clamped = weights.mapv(|w| w.clamp(0.0, 1.0));
    let total = clamped.sum();
    (total > 0.0).then(|| clamped / total)
}

fn max_abs(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

fn max_abs_diff(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("A{}", i)).collect()
    }

    fn diagonal_model() -> ReturnModel {
        ReturnModel::new(ids(2), array![0.0004, 0.0002], array![[0.04, 0.0], [0.0, 0.01]]).unwrap()
    }

    fn correlated_model() -> ReturnModel {
        ReturnModel::new(
            ids(3),
            array![0.0008, 0.0005, 0.0001],
            array![
                [0.0009, 0.0003, 0.0001],
                [0.0003, 0.0004, 0.00005],
                [0.0001, 0.00005, 0.0001]
            ],
        )
        .unwrap()
    }

    fn assert_simplex(result: &OptimizationResult) {
        let total: f64 = result.weights.values().sum();
        assert!((total - 1.0).abs() < 1e-9, "weights sum to {}", total);
        assert!(result.weights.values().all(|w| (0.0..=1.0).contains(w)));
    }

    #[test]
    fn test_equal_weight_five_assets() {
        let n = 5;
        let model = ReturnModel::new(ids(n), Array1::zeros(n), Array2::eye(n) * 0.01).unwrap();
        let result = PortfolioOptimizer::default().optimize(&model, &OptimizationStrategy::EqualWeight.into());

        assert_eq!(result.weights.len(), 5);
        assert!(result.weights.values().all(|w| (w - 0.2).abs() < 1e-12));
        assert!(result.converged);
        assert!(!result.fallback_used);
    }

    #[test]
    fn test_minimum_variance_inverse_variance() {
        let result = PortfolioOptimizer::default()
            .optimize(&diagonal_model(), &OptimizationStrategy::MinimumVariance.into());

        assert!(result.converged);
        assert!((result.weights["A0"] - 0.2).abs() < 1e-6);
        assert!((result.weights["A1"] - 0.8).abs() < 1e-6);
        // variance = 0.04 * 0.04 + 0.64 * 0.01 = 0.008
        assert!((result.volatility - (0.008_f64 * 252.0).sqrt()).abs() < 1e-4);
    }

    #[test]
    fn test_risk_parity_inverse_volatility() {
        let result = PortfolioOptimizer::default()
            .optimize(&diagonal_model(), &OptimizationStrategy::RiskParity.into());

        assert!(result.converged);
        assert!((result.weights["A0"] - 1.0 / 3.0).abs() < 1e-6);
        assert!((result.weights["A1"] - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_variance_meets_target_return() {
        let optimizer = PortfolioOptimizer::default();
        let model = diagonal_model();
        let unconstrained = optimizer.optimize(&model, &OptimizationStrategy::MeanVariance.into());
        let request = OptimizationRequest::new(OptimizationStrategy::MeanVariance).with_target_return(0.08);
        let targeted = optimizer.optimize(&model, &request);

        assert_simplex(&targeted);
        assert!(targeted.converged);
        assert!(!targeted.fallback_used);
        assert!((targeted.expected_return - 0.08).abs() < 1e-6);
        assert!(targeted.weights["A0"] > unconstrained.weights["A0"]);
        // two assets: 0.0004 w + 0.0002 (1 - w) = 0.08 / 252
        let w0 = (0.08 / 252.0 - 0.0002) / 0.0002;
        assert!((targeted.weights["A0"] - w0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_variance_target_with_correlated_assets() {
        let optimizer = PortfolioOptimizer::default();
        let model = correlated_model();
        for target in [0.05, 0.10, 0.15] {
            let request = OptimizationRequest::new(OptimizationStrategy::MeanVariance).with_target_return(target);
            let result = optimizer.optimize(&model, &request);

            assert_simplex(&result);
            assert!(!result.fallback_used, "target {} fell back: {:?}", target, result.reason);
            assert!((result.expected_return - target).abs() < 1e-6, "target {} gave {}", target, result.expected_return);
        }
    }

    #[test]
    fn test_mean_variance_unreachable_target_falls_back() {
        let optimizer = PortfolioOptimizer::default();
        // the best single asset returns 0.0004 * 252 = 0.1008
        let request = OptimizationRequest::new(OptimizationStrategy::MeanVariance).with_target_return(0.5);
        let result = optimizer.optimize(&diagonal_model(), &request);

        assert!(result.fallback_used);
        assert!(!result.converged);
        assert!(result.reason.as_deref().unwrap_or_default().contains("achievable range"));
        assert!(result.weights.values().all(|w| (w - 0.5).abs() < 1e-12));

        let below = OptimizationRequest::new(OptimizationStrategy::MeanVariance).with_target_return(0.01);
        assert!(optimizer.optimize(&diagonal_model(), &below).fallback_used);
    }

    #[test]
    fn test_target_projection_lands_on_hyperplane() {
        let mu = array![0.03, 0.01, -0.02];
        let projected = project_to_target(&array![0.9, 0.4, -0.3], &mu, 0.005);

        assert!((projected.sum() - 1.0).abs() < 1e-12);
        assert!(projected.iter().all(|w| *w >= 0.0));
        assert!((projected.dot(&mu) - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_momentum_proportional_and_fallback() {
        let optimizer = PortfolioOptimizer::default();
        let model = ReturnModel::new(ids(3), array![0.03, 0.01, -0.02], Array2::eye(3) * 0.01).unwrap();
        let result = optimizer.optimize(&model, &OptimizationStrategy::Momentum.into());

        assert!((result.weights["A0"] - 0.75).abs() < 1e-12);
        assert!((result.weights["A1"] - 0.25).abs() < 1e-12);
        assert_eq!(result.weights["A2"], 0.0);

        let negative = ReturnModel::new(ids(2), array![-0.01, -0.02], Array2::eye(2) * 0.01).unwrap();
        let fallback = optimizer.optimize(&negative, &OptimizationStrategy::Momentum.into());
        assert!(fallback.fallback_used);
        assert!(fallback.weights.values().all(|w| (w - 0.5).abs() < 1e-12));
    }

    #[test]
    fn test_non_convergence_falls_back_to_equal_weight() {
        let optimizer = PortfolioOptimizer::new(OptimizerConfig {
            max_iterations: 1,
            tolerance: 1e-15,
            ..OptimizerConfig::default()
        });
        let result = optimizer.optimize(&correlated_model(), &OptimizationStrategy::MinimumVariance.into());

        assert!(!result.converged);
        assert!(result.fallback_used);
        assert!(result.reason.is_some());
        assert!(result.weights.values().all(|w| (w - 1.0 / 3.0).abs() < 1e-12));
    }

    #[test]
    fn test_zero_covariance_falls_back() {
        let model = ReturnModel::new(ids(2), array![0.01, 0.02], Array2::zeros((2, 2))).unwrap();
        let optimizer = PortfolioOptimizer::default();
        for strategy in [OptimizationStrategy::MinimumVariance, OptimizationStrategy::RiskParity] {
            let result = optimizer.optimize(&model, &strategy.into());
            assert!(result.fallback_used);
            assert_eq!(result.sharpe_ratio, 0.0);
            assert_simplex(&result);
        }
    }

    #[test]
    fn test_weights_on_simplex_for_every_strategy() {
        let optimizer = PortfolioOptimizer::default();
        let model = correlated_model();
        for strategy in OptimizationStrategy::ALL {
            let result = optimizer.optimize(&model, &strategy.into());
            assert_simplex(&result);
            assert_eq!(result.strategy, strategy);
        }
    }

    #[test]
    fn test_simplex_projection() {
        let projected = project_to_simplex(&array![0.5, 0.5, 0.5]);
        assert!(projected.iter().all(|w| (w - 1.0 / 3.0).abs() < 1e-12));

        let projected = project_to_simplex(&array![2.0, -1.0]);
        assert_eq!(projected, array![1.0, 0.0]);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "risk-parity".parse::<OptimizationStrategy>().unwrap(),
            OptimizationStrategy::RiskParity
        );
        assert_eq!(
            "Minimum_Variance".parse::<OptimizationStrategy>().unwrap(),
            OptimizationStrategy::MinimumVariance
        );
        assert!(matches!(
            "black_litterman".parse::<OptimizationStrategy>(),
            Err(RebalanceError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_empty_model() {
        let model = ReturnModel::new(Vec::new(), Array1::zeros(0), Array2::zeros((0, 0))).unwrap();
        let result = PortfolioOptimizer::default().optimize(&model, &OptimizationStrategy::EqualWeight.into());
        assert!(result.weights.is_empty());
        assert!(result.fallback_used);
    }
}
