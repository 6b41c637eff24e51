//! Rebalance planning
//!
//! The planner diffs current against target weights. Strategies only decide the drift
//! threshold in effect, or whether to plan at all; the action generation is shared.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use pocket_hedge_core::PortfolioSnapshot;
use pocket_hedge_risk::{RiskLimit, RiskMetrics};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RebalanceConfig;
use crate::plan::{ActionStatus, ActionType, RebalanceAction, RebalancePlan};
use crate::{RebalanceError, RebalanceResult};

/// Weight above which reducing a position earns the concentration bonus
const CONCENTRATED_WEIGHT: f64 = 0.20;
/// Target below which opening a position earns the new-position bonus
const SMALL_TARGET_WEIGHT: f64 = 0.10;
const CONCENTRATION_BONUS: u32 = 20;
const NEW_POSITION_BONUS: u32 = 10;
const MAX_PRIORITY: u32 = 100;

/// When and how tightly to rebalance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceStrategy {
    /// Fixed drift threshold
    ThresholdBased,
    /// Only after the configured number of days, with a tighter threshold
    TimeBased,
    /// Wider threshold for volatile portfolios
    VolatilityBased,
    /// Wider threshold for portfolios with a large VaR
    RiskBased,
}

impl RebalanceStrategy {
    pub const ALL: [RebalanceStrategy; 4] = [
        RebalanceStrategy::ThresholdBased,
        RebalanceStrategy::TimeBased,
        RebalanceStrategy::VolatilityBased,
        RebalanceStrategy::RiskBased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RebalanceStrategy::ThresholdBased => "threshold_based",
            RebalanceStrategy::TimeBased => "time_based",
            RebalanceStrategy::VolatilityBased => "volatility_based",
            RebalanceStrategy::RiskBased => "risk_based",
        }
    }
}

impl fmt::Display for RebalanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RebalanceStrategy {
    type Err = RebalanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|strategy| {
                let name = strategy.as_str();
                name == normalized || name.strip_suffix("_based") == Some(normalized.as_str())
            })
            .ok_or_else(|| RebalanceError::UnknownStrategy(s.to_string()))
    }
}

/// Portfolio state the planner needs besides the weights
#[derive(Debug, Clone, Default)]
pub struct RebalanceContext<'a> {
    pub portfolio_id: String,

    /// Portfolio value the weights refer to
    pub total_value: f64,

    /// Price estimates per asset
    pub prices: BTreeMap<String, f64>,

    /// Days since the last rebalance, `None` if never rebalanced
    pub days_since_last_rebalance: Option<i64>,

    /// Portfolio's own rebalancing cadence, overriding the configured frequency
    pub frequency_days: Option<i64>,

    /// Current risk metrics, for the volatility and risk strategies
    pub metrics: Option<&'a RiskMetrics>,

    /// Current limit assessments, for the risk gate
    pub breaches: &'a [RiskLimit],
}

impl<'a> RebalanceContext<'a> {
    pub fn new(portfolio_id: impl Into<String>, total_value: f64) -> Self {
        Self {
            portfolio_id: portfolio_id.into(),
            total_value,
            ..Self::default()
        }
    }

    /// Value, prices and rebalancing schedule taken from a snapshot
    pub fn from_snapshot(snapshot: &PortfolioSnapshot) -> Self {
        let mut context = Self::new(snapshot.portfolio_id.clone(), snapshot.total_value);
        context.prices = snapshot
            .positions
            .iter()
            .map(|p| (p.asset_id.clone(), p.current_price))
            .collect();
        context.days_since_last_rebalance = snapshot.days_since_last_rebalance();
        context.frequency_days = snapshot.rebalance_frequency_days;
        context
    }

    pub fn with_price(mut self, asset_id: impl Into<String>, price: f64) -> Self {
        self.prices.insert(asset_id.into(), price);
        self
    }

    pub fn with_days_since_last_rebalance(mut self, days: i64) -> Self {
        self.days_since_last_rebalance = Some(days);
        self
    }

    pub fn with_metrics(mut self, metrics: &'a RiskMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_breaches(mut self, breaches: &'a [RiskLimit]) -> Self {
        self.breaches = breaches;
        self
    }
}

enum Decision {
    Proceed(f64),
    Skip(f64, String),
}

/// Rebalance planner
#[derive(Debug, Clone, Default)]
pub struct RebalancePlanner {
    config: RebalanceConfig,
}

impl RebalancePlanner {
    pub fn new(config: RebalanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    /// Plan with the configured strategy
    pub fn plan(
        &self,
        current: &BTreeMap<String, f64>,
        target: &BTreeMap<String, f64>,
        context: &RebalanceContext<'_>,
    ) -> RebalanceResult<RebalancePlan> {
        self.plan_with(self.config.strategy, current, target, context)
    }

    /// Plan with an explicit strategy
    pub fn plan_with(
        &self,
        strategy: RebalanceStrategy,
        current: &BTreeMap<String, f64>,
        target: &BTreeMap<String, f64>,
        context: &RebalanceContext<'_>,
    ) -> RebalanceResult<RebalancePlan> {
        validate_weights("current", current)?;
        validate_weights("target", target)?;
        if !context.total_value.is_finite() || context.total_value < 0.0 {
            return Err(RebalanceError::InvalidWeights(format!(
                "total value must be finite and non-negative, got {}",
                context.total_value
            )));
        }

        let threshold = match self.decide(strategy, context) {
            Decision::Proceed(threshold) => threshold,
            Decision::Skip(threshold, reason) => {
                info!(portfolio_id = %context.portfolio_id, %strategy, reason = %reason, "rebalance skipped");
                return Ok(RebalancePlan::skipped(&context.portfolio_id, strategy, threshold, reason));
            }
        };

        let assets: BTreeSet<&String> = current.keys().chain(target.keys()).collect();
        let mut actions: Vec<RebalanceAction> = assets
            .into_iter()
            .filter_map(|asset_id| {
                let current_weight = current.get(asset_id).copied().unwrap_or(0.0);
                let target_weight = target.get(asset_id).copied().unwrap_or(0.0);
                let weight_diff = target_weight - current_weight;
                (weight_diff.abs() > threshold)
                    .then(|| self.action(asset_id, current_weight, target_weight, weight_diff, context))
            })
            .collect();

        actions.sort_by(compare_actions);
        for (index, action) in actions.iter_mut().enumerate() {
            action.execution_order = index + 1;
        }

        let plan = RebalancePlan::new(&context.portfolio_id, strategy, threshold, actions);
        info!(
            plan_id = %plan.id,
            portfolio_id = %plan.portfolio_id,
            %strategy,
            threshold,
            actions = plan.actions.len(),
            estimated_total_cost = plan.estimated_total_cost,
            "rebalance plan created"
        );
        Ok(plan)
    }

    /// Drift threshold for a strategy, `None` when the strategy says not to plan
    pub fn effective_threshold(&self, strategy: RebalanceStrategy, context: &RebalanceContext<'_>) -> Option<f64> {
        match self.decide(strategy, context) {
            Decision::Proceed(threshold) => Some(threshold),
            Decision::Skip(..) => None,
        }
    }

    fn decide(&self, strategy: RebalanceStrategy, context: &RebalanceContext<'_>) -> Decision {
        let config = &self.config;

        let threshold = match strategy {
            RebalanceStrategy::ThresholdBased => config.threshold,
            RebalanceStrategy::TimeBased => {
                let frequency_days = context.frequency_days.unwrap_or(config.frequency_days);
                if let Some(days) = context.days_since_last_rebalance {
                    if days < frequency_days {
                        return Decision::Skip(
                            config.time_based_threshold,
                            format!("rebalance not due: {} of {} days elapsed", days, frequency_days),
                        );
                    }
                }
                config.time_based_threshold
            }
            RebalanceStrategy::VolatilityBased => match context.metrics {
                Some(metrics) if metrics.volatility > config.volatility_trigger => config.volatile_threshold,
                Some(_) => config.calm_threshold,
                None => {
                    debug!("no metrics for volatility-based rebalance, using calm threshold");
                    config.calm_threshold
                }
            },
            RebalanceStrategy::RiskBased => match context.metrics {
                Some(metrics) if metrics.var_95.abs() > config.risk_trigger => config.risky_threshold,
                Some(_) => config.calm_threshold,
                None => {
                    debug!("no metrics for risk-based rebalance, using calm threshold");
                    config.calm_threshold
                }
            },
        };

        if let Some(minimum) = config.gate {
            let gated_open = context
                .breaches
                .iter()
                .any(|b| b.is_breached && b.severity >= minimum);
            if !gated_open {
                return Decision::Skip(threshold, format!("no limit breach at or above {} severity", minimum));
            }
        }

        Decision::Proceed(threshold)
    }

    fn action(
        &self,
        asset_id: &str,
        current_weight: f64,
        target_weight: f64,
        weight_diff: f64,
        context: &RebalanceContext<'_>,
    ) -> RebalanceAction {
        let required_trade_amount = context.total_value * weight_diff;
        let estimated_price = context.prices.get(asset_id).copied().unwrap_or(0.0);
        let trade_quantity = if estimated_price > 0.0 {
            required_trade_amount / estimated_price
        } else {
            0.0
        };

        RebalanceAction {
            asset_id: asset_id.to_string(),
            action_type: if weight_diff > 0.0 { ActionType::Buy } else { ActionType::Sell },
            current_weight,
            target_weight,
            weight_diff,
            required_trade_amount,
            trade_quantity,
            estimated_price,
            estimated_fees: required_trade_amount.abs() * self.config.fee_rate,
            priority: priority(current_weight, target_weight, weight_diff),
            execution_order: 0,
            status: ActionStatus::Pending,
            failure_reason: None,
            executed_price: None,
        }
    }
}

fn priority(current_weight: f64, target_weight: f64, weight_diff: f64) -> u32 {
    let mut priority = (weight_diff.abs() * 100.0).round() as u32;
    if weight_diff < 0.0 && current_weight > CONCENTRATED_WEIGHT {
        priority += CONCENTRATION_BONUS;
    }
    if weight_diff > 0.0 && current_weight <= 0.0 && target_weight < SMALL_TARGET_WEIGHT {
        priority += NEW_POSITION_BONUS;
    }
    priority.min(MAX_PRIORITY)
}

/// Priority, drift and trade size descending, then asset id
fn compare_actions(a: &RebalanceAction, b: &RebalanceAction) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.weight_diff.abs().total_cmp(&a.weight_diff.abs()))
        .then_with(|| b.required_trade_amount.abs().total_cmp(&a.required_trade_amount.abs()))
        .then_with(|| a.asset_id.cmp(&b.asset_id))
}

fn validate_weights(label: &str, weights: &BTreeMap<String, f64>) -> RebalanceResult<()> {
    match weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
        Some((asset_id, weight)) => Err(RebalanceError::InvalidWeights(format!(
            "{} weight for {} is {}",
            label, asset_id, weight
        ))),
        None => Ok(()),
    }
}
