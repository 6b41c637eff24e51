//! Paper trading executor
//!
//! Fills every action at its estimated price and charges the configured fee rate.
//! Actions without a known price are rejected.

use async_trait::async_trait;
use pocket_hedge_rebalancing::{RebalanceAction, RebalanceError, RebalanceResult, TradeExecutor, TradeFill};
use tracing::debug;

pub struct PaperExecutor {
    fee_rate: f64,
}

impl PaperExecutor {
    pub fn new(fee_rate: f64) -> Self {
        Self { fee_rate }
    }
}

#[async_trait]
impl TradeExecutor for PaperExecutor {
    async fn submit(&self, action: &RebalanceAction) -> RebalanceResult<TradeFill> {
        if !(action.estimated_price > 0.0) {
            return Err(RebalanceError::Execution {
                asset_id: action.asset_id.clone(),
                message: "no price available".to_string(),
            });
        }

        let fill = TradeFill {
            executed_quantity: action.trade_quantity,
            executed_price: action.estimated_price,
            fees: action.required_trade_amount.abs() * self.fee_rate,
        };
        debug!(asset = %action.asset_id, quantity = fill.executed_quantity, price = fill.executed_price, "paper fill");
        Ok(fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pocket_hedge_rebalancing::{
        execute_plan, PlanStatus, RebalanceConfig, RebalanceContext, RebalancePlanner,
    };
    use std::collections::BTreeMap;

    fn weights(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_paper_execution_fills_priced_actions() {
        let planner = RebalancePlanner::new(RebalanceConfig::default());
        let context = RebalanceContext::new("pf", 10_000.0)
            .with_price("A", 100.0)
            .with_price("B", 50.0);
        let mut plan = planner
            .plan(
                &weights(&[("A", 0.7), ("B", 0.3)]),
                &weights(&[("A", 0.5), ("B", 0.5)]),
                &context,
            )
            .unwrap();

        let summary = tokio_test::block_on(execute_plan(&mut plan, &PaperExecutor::new(0.001))).unwrap();

        assert_eq!(summary.executed, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.status, PlanStatus::Executed);
        assert!((summary.fees_paid - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_paper_execution_rejects_unpriced_actions() {
        let planner = RebalancePlanner::new(RebalanceConfig::default());
        let context = RebalanceContext::new("pf", 10_000.0).with_price("A", 100.0);
        let mut plan = planner
            .plan(&weights(&[("A", 1.0)]), &weights(&[("A", 0.5), ("C", 0.5)]), &context)
            .unwrap();

        let summary = tokio_test::block_on(execute_plan(&mut plan, &PaperExecutor::new(0.0))).unwrap();

        assert_eq!(summary.executed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.status, PlanStatus::PartiallyExecuted);
    }
}
