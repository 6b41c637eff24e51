//! Running the optimizer from async code
//!
//! Solves are CPU bound, so they go to the tokio blocking pool. A semaphore bounds how
//! many run at once and every call carries a deadline. A solve that misses its deadline
//! keeps running to completion on its thread and holds its permit until it does.

use std::sync::Arc;
use std::time::Duration;

use pocket_hedge_risk::ReturnModel;
use tokio::sync::Semaphore;
use tokio::task;
use tracing::{debug, warn};

use crate::config::OptimizerConfig;
use crate::optimizer::{OptimizationRequest, OptimizationResult, PortfolioOptimizer};
use crate::{RebalanceError, RebalanceResult};

/// Run one solve on the blocking pool under a deadline
pub async fn optimize_with_timeout(
    optimizer: PortfolioOptimizer,
    model: ReturnModel,
    request: OptimizationRequest,
    timeout: Duration,
) -> RebalanceResult<OptimizationResult> {
    let handle = task::spawn_blocking(move || optimizer.optimize(&model, &request));
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(RebalanceError::Worker(e.to_string())),
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, strategy = %request.strategy, "optimization timed out");
            Err(RebalanceError::Timeout(timeout))
        }
    }
}

/// Bounded pool of optimizer solves
#[derive(Debug, Clone)]
pub struct OptimizerPool {
    optimizer: Arc<PortfolioOptimizer>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl OptimizerPool {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            timeout: config.timeout(),
            optimizer: Arc::new(PortfolioOptimizer::new(config)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Solve once a permit is free. The deadline covers waiting for the permit.
    pub async fn optimize(
        &self,
        model: Arc<ReturnModel>,
        request: OptimizationRequest,
    ) -> RebalanceResult<OptimizationResult> {
        let permits = Arc::clone(&self.permits);
        let optimizer = Arc::clone(&self.optimizer);

        let run = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| RebalanceError::Worker(e.to_string()))?;
            debug!(strategy = %request.strategy, assets = model.len(), "optimizer permit acquired");

            task::spawn_blocking(move || {
                let _permit = permit;
                optimizer.optimize(&model, &request)
            })
            .await
            .map_err(|e| RebalanceError::Worker(e.to_string()))
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "pooled optimization timed out");
                Err(RebalanceError::Timeout(self.timeout))
            }
        }
    }

    /// Solve several requests against one model, at most the pool size at a time
    pub async fn optimize_all(
        &self,
        model: Arc<ReturnModel>,
        requests: &[OptimizationRequest],
    ) -> Vec<RebalanceResult<OptimizationResult>> {
        let handles: Vec<_> = requests
            .iter()
            .map(|request| {
                let pool = self.clone();
                let model = Arc::clone(&model);
                let request = *request;
                tokio::spawn(async move { pool.optimize(model, request).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or_else(|e| Err(RebalanceError::Worker(e.to_string()))));
        }
        results
    }
}

impl Default for OptimizerPool {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::OptimizationStrategy;
    use ndarray::{array, Array2};

    fn model() -> ReturnModel {
        ReturnModel::new(
            vec!["A".to_string(), "B".to_string()],
            array![0.0004, 0.0002],
            array![[0.04, 0.0], [0.0, 0.01]],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_optimize_with_timeout_matches_direct_solve() {
        let optimizer = PortfolioOptimizer::default();
        let request = OptimizationRequest::new(OptimizationStrategy::MinimumVariance);
        let direct = optimizer.optimize(&model(), &request);

        let result = optimize_with_timeout(optimizer, model(), request, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.weights, direct.weights);
    }

    #[tokio::test]
    async fn test_pool_times_out_waiting_for_permit() {
        let pool = OptimizerPool::new(OptimizerConfig {
            max_concurrent: 1,
            ..OptimizerConfig::default()
        })
        .with_timeout(Duration::from_millis(50));

        let held = Arc::clone(&pool.permits).acquire_owned().await.unwrap();
        let result = pool
            .optimize(Arc::new(model()), OptimizationStrategy::EqualWeight.into())
            .await;
        assert!(matches!(result, Err(RebalanceError::Timeout(_))));

        drop(held);
        let result = pool
            .optimize(Arc::new(model()), OptimizationStrategy::EqualWeight.into())
            .await
            .unwrap();
        assert!((result.weights["A"] - 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_optimize_all_keeps_request_order() {
        let n = 4;
        let model = ReturnModel::new(
            (0..n).map(|i| format!("A{}", i)).collect(),
            array![0.001, 0.0005, 0.0002, 0.0001],
            Array2::eye(n) * 0.0004,
        )
        .unwrap();
        let requests: Vec<OptimizationRequest> = OptimizationStrategy::ALL.iter().map(|s| (*s).into()).collect();

        let results = OptimizerPool::default().optimize_all(Arc::new(model), &requests).await;

        assert_eq!(results.len(), requests.len());
        for (request, result) in requests.iter().zip(results) {
            let result = result.unwrap();
            assert_eq!(result.strategy, request.strategy);
            let total: f64 = result.weights.values().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }
}
