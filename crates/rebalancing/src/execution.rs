//! Plan execution through an external trade executor

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::plan::{ActionStatus, PlanStatus, RebalanceAction, RebalancePlan};
use crate::{RebalanceError, RebalanceResult};

/// Fill reported for a submitted action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFill {
    pub executed_quantity: f64,
    pub executed_price: f64,
    pub fees: f64,
}

/// Broker or exchange integration that turns actions into trades
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    /// Submit one action and wait for its fill
    async fn submit(&self, action: &RebalanceAction) -> RebalanceResult<TradeFill>;
}

/// Outcome of one execution pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub plan_id: String,
    pub status: PlanStatus,
    /// Actions executed in this pass
    pub executed: usize,
    /// Actions that failed in this pass
    pub failed: usize,
    /// Fees reported by the executor in this pass
    pub fees_paid: f64,
}

/// Submit every outstanding action in execution order.
///
/// A failed action does not stop the pass. The plan ends `Executed` when every action
/// has executed and `PartiallyExecuted` otherwise; a partially executed plan can be
/// passed again to retry its failed actions.
pub async fn execute_plan<E>(plan: &mut RebalancePlan, executor: &E) -> RebalanceResult<ExecutionSummary>
where
    E: TradeExecutor + ?Sized,
{
    if plan.status == PlanStatus::Executed {
        return Err(RebalanceError::PlanTerminal(plan.id.clone()));
    }

    let mut executed = 0;
    let mut failed = 0;
    let mut fees_paid = 0.0;

    plan.actions.sort_by_key(|a| a.execution_order);
    debug!(plan_id = %plan.id, pending = plan.outstanding().count(), "submitting rebalance actions");
    for action in plan.actions.iter_mut().filter(|a| a.status != ActionStatus::Executed) {
        match executor.submit(action).await {
            Ok(fill) => {
                action.status = ActionStatus::Executed;
                action.executed_price = Some(fill.executed_price);
                action.failure_reason = None;
                fees_paid += fill.fees;
                executed += 1;
            }
            Err(e) => {
                warn!(plan_id = %plan.id, asset_id = %action.asset_id, error = %e, "rebalance action failed");
                action.status = ActionStatus::Failed;
                action.failure_reason = Some(e.to_string());
                failed += 1;
            }
        }
    }

    plan.status = if plan.actions.iter().all(|a| a.status == ActionStatus::Executed) {
        PlanStatus::Executed
    } else {
        PlanStatus::PartiallyExecuted
    };

    info!(
        plan_id = %plan.id,
        status = %plan.status,
        executed,
        failed,
        "rebalance plan submitted"
    );

    Ok(ExecutionSummary {
        plan_id: plan.id.clone(),
        status: plan.status,
        executed,
        failed,
        fees_paid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{RebalanceContext, RebalancePlanner};
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;

    struct MockExecutor {
        failing: HashSet<String>,
        submitted: Mutex<Vec<String>>,
    }

    impl MockExecutor {
        fn failing(assets: &[&str]) -> Self {
            Self {
                failing: assets.iter().map(|s| s.to_string()).collect(),
                submitted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TradeExecutor for MockExecutor {
        async fn submit(&self, action: &RebalanceAction) -> RebalanceResult<TradeFill> {
            self.submitted.lock().unwrap().push(action.asset_id.clone());
            if self.failing.contains(&action.asset_id) {
                return Err(RebalanceError::Execution {
                    asset_id: action.asset_id.clone(),
                    message: "rejected by venue".to_string(),
                });
            }
            Ok(TradeFill {
                executed_quantity: action.trade_quantity,
                executed_price: action.estimated_price,
                fees: action.estimated_fees,
            })
        }
    }

    fn plan() -> RebalancePlan {
        let current: BTreeMap<String, f64> = [("BTC", 0.7), ("ETH", 0.3)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        let target: BTreeMap<String, f64> = [("BTC", 0.52), ("ETH", 0.4), ("SOL", 0.08)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        let context = RebalanceContext::new("pf", 10_000.0)
            .with_price("BTC", 50_000.0)
            .with_price("ETH", 2_500.0)
            .with_price("SOL", 100.0);
        RebalancePlanner::default().plan(&current, &target, &context).unwrap()
    }

    #[tokio::test]
    async fn test_all_actions_succeed() {
        let mut plan = plan();
        let executor = MockExecutor::failing(&[]);

        let summary = execute_plan(&mut plan, &executor).await.unwrap();

        assert_eq!(summary.status, PlanStatus::Executed);
        assert_eq!(summary.executed, 3);
        assert_eq!(summary.failed, 0);
        assert!((summary.fees_paid - plan.estimated_fees).abs() < 1e-9);
        assert!(plan.actions.iter().all(|a| a.status == ActionStatus::Executed));
        assert_eq!(*executor.submitted.lock().unwrap(), vec!["BTC", "SOL", "ETH"]);
        assert_eq!(plan.sells().map(|a| a.asset_id.as_str()).collect::<Vec<_>>(), vec!["BTC"]);
        assert_eq!(plan.buys().count(), 2);
    }

    #[tokio::test]
    async fn test_failure_marks_partial_and_continues() {
        let mut plan = plan();
        let executor = MockExecutor::failing(&["SOL"]);

        let summary = execute_plan(&mut plan, &executor).await.unwrap();

        assert_eq!(summary.status, PlanStatus::PartiallyExecuted);
        assert_eq!(summary.executed, 2);
        assert_eq!(summary.failed, 1);
        let sol = plan.actions.iter().find(|a| a.asset_id == "SOL").unwrap();
        assert_eq!(sol.status, ActionStatus::Failed);
        assert!(sol.failure_reason.as_deref().unwrap().contains("rejected"));
        assert_eq!(executor.submitted.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_retry_then_terminal() {
        let mut plan = plan();
        execute_plan(&mut plan, &MockExecutor::failing(&["ETH"])).await.unwrap();
        assert_eq!(plan.outstanding().map(|a| a.asset_id.as_str()).collect::<Vec<_>>(), vec!["ETH"]);

        let retry = MockExecutor::failing(&[]);
        let summary = execute_plan(&mut plan, &retry).await.unwrap();
        assert_eq!(summary.status, PlanStatus::Executed);
        assert_eq!(plan.outstanding().count(), 0);
        assert_eq!(summary.executed, 1);
        assert_eq!(*retry.submitted.lock().unwrap(), vec!["ETH"]);

        assert!(matches!(
            execute_plan(&mut plan, &retry).await,
            Err(RebalanceError::PlanTerminal(_))
        ));
    }

    #[test]
    fn test_trait_object_executor() {
        let mut plan = plan();
        let executor: Box<dyn TradeExecutor> = Box::new(MockExecutor::failing(&["BTC"]));
        let summary = tokio_test::block_on(execute_plan(&mut plan, executor.as_ref())).unwrap();
        assert_eq!(summary.status, PlanStatus::PartiallyExecuted);
    }
}
