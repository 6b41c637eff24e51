//! Rebalancing module for the pocket hedge fund
//!
//! This module turns a return model into target weights and target weights into trades:
//! - [`PortfolioOptimizer`] solves for long-only weights under five objectives
//! - [`RebalancePlanner`] diffs current against target weights and orders the actions
//! - [`execute_plan`] submits a plan through a [`TradeExecutor`]
//! - [`OptimizerPool`] runs solves on the blocking pool with a deadline

use std::time::Duration;

pub mod config;
pub mod execution;
pub mod optimizer;
pub mod plan;
pub mod planner;
pub mod runtime;

pub use config::{OptimizerConfig, RebalanceConfig};
pub use execution::{execute_plan, ExecutionSummary, TradeExecutor, TradeFill};
pub use optimizer::{OptimizationRequest, OptimizationResult, OptimizationStrategy, PortfolioOptimizer};
pub use plan::{ActionStatus, ActionType, PlanStatus, RebalanceAction, RebalancePlan};
pub use planner::{RebalanceContext, RebalancePlanner, RebalanceStrategy};
pub use runtime::{optimize_with_timeout, OptimizerPool};

/// Error types for the rebalancing module
#[derive(thiserror::Error, Debug)]
pub enum RebalanceError {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid weights: {0}")]
    InvalidWeights(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Optimization timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Execution failed for {asset_id}: {message}")]
    Execution { asset_id: String, message: String },

    #[error("Plan {0} is already executed")]
    PlanTerminal(String),
}

/// Result type for the rebalancing module
pub type RebalanceResult<T> = std::result::Result<T, RebalanceError>;

/// Module version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
