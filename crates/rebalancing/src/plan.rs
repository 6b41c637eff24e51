//! Rebalance plans and their actions

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::planner::RebalanceStrategy;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Buy,
    Sell,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Buy => write!(f, "buy"),
            ActionType::Sell => write!(f, "sell"),
        }
    }
}

/// Action status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executed,
    Failed,
}

/// Plan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Not submitted yet
    Pending,
    /// Submitted, at least one action failed
    PartiallyExecuted,
    /// Every action executed
    Executed,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanStatus::Pending => "pending",
            PlanStatus::PartiallyExecuted => "partially_executed",
            PlanStatus::Executed => "executed",
        };
        write!(f, "{}", name)
    }
}

/// One buy or sell adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceAction {
    /// Asset identifier
    pub asset_id: String,

    /// Buy or sell
    pub action_type: ActionType,

    /// Current weight, as a fraction
    pub current_weight: f64,

    /// Target weight, as a fraction
    pub target_weight: f64,

    /// `target_weight - current_weight`
    pub weight_diff: f64,

    /// Signed trade value, negative for sells
    pub required_trade_amount: f64,

    /// Signed trade quantity, 0 when no price is known
    pub trade_quantity: f64,

    /// Price used for the quantity estimate
    pub estimated_price: f64,

    /// Estimated fees
    pub estimated_fees: f64,

    /// 0 to 100, higher runs first
    pub priority: u32,

    /// 1-based position in the execution sequence
    pub execution_order: usize,

    pub status: ActionStatus,

    /// Executor error for failed actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Fill price reported by the executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_price: Option<f64>,
}

/// Ordered set of actions for one rebalancing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancePlan {
    /// Plan identifier
    pub id: String,

    /// Portfolio identifier
    pub portfolio_id: String,

    /// Strategy that produced the plan
    pub strategy: RebalanceStrategy,

    /// Drift threshold in effect
    pub threshold: f64,

    pub created_at: DateTime<Utc>,

    /// Actions in execution order
    pub actions: Vec<RebalanceAction>,

    /// Sum of absolute trade amounts
    pub estimated_total_cost: f64,

    /// Sum of estimated fees
    pub estimated_fees: f64,

    /// Signed sum of trade amounts, positive when buys dominate
    pub net_cash_flow: f64,

    pub status: PlanStatus,

    /// Why no actions were generated, when gated or not due
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

impl RebalancePlan {
    /// Build a plan from ordered actions, deriving the totals
    pub fn new(
        portfolio_id: impl Into<String>,
        strategy: RebalanceStrategy,
        threshold: f64,
        actions: Vec<RebalanceAction>,
    ) -> Self {
        let estimated_total_cost = actions.iter().map(|a| a.required_trade_amount.abs()).sum();
        let estimated_fees = actions.iter().map(|a| a.estimated_fees).sum();
        let net_cash_flow = actions.iter().map(|a| a.required_trade_amount).sum();

        Self {
            id: Uuid::new_v4().to_string(),
            portfolio_id: portfolio_id.into(),
            strategy,
            threshold,
            created_at: Utc::now(),
            actions,
            estimated_total_cost,
            estimated_fees,
            net_cash_flow,
            status: PlanStatus::Pending,
            skipped_reason: None,
        }
    }

    /// Plan with no actions
    pub fn skipped(
        portfolio_id: impl Into<String>,
        strategy: RebalanceStrategy,
        threshold: f64,
        reason: impl Into<String>,
    ) -> Self {
        let mut plan = Self::new(portfolio_id, strategy, threshold, Vec::new());
        plan.skipped_reason = Some(reason.into());
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions not yet executed, in execution order
    pub fn outstanding(&self) -> impl Iterator<Item = &RebalanceAction> {
        self.actions.iter().filter(|a| a.status != ActionStatus::Executed)
    }

    pub fn buys(&self) -> impl Iterator<Item = &RebalanceAction> {
        self.actions.iter().filter(|a| a.action_type == ActionType::Buy)
    }

    pub fn sells(&self) -> impl Iterator<Item = &RebalanceAction> {
        self.actions.iter().filter(|a| a.action_type == ActionType::Sell)
    }
}
