//! Historical return data
//!
//! [`ReturnHistory`] is implemented by whatever holds price history (a database, a
//! file cache, an in-memory map). [`ReturnModel`] turns it into the aligned
//! expected-returns vector and covariance matrix the simulators and optimizer use.

use std::collections::{BTreeMap, HashMap};

use ndarray::{Array1, Array2, Axis};
use ndarray_stats::CorrelationExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::stats;
use crate::{RiskError, RiskResult};

/// Source of periodic returns per asset, oldest first
pub trait ReturnHistory {
    /// Return series for an asset, `None` when the asset is unknown
    fn returns(&self, asset_id: &str) -> Option<Vec<f64>>;
}

impl ReturnHistory for HashMap<String, Vec<f64>> {
    fn returns(&self, asset_id: &str) -> Option<Vec<f64>> {
        self.get(asset_id).cloned()
    }
}

impl ReturnHistory for BTreeMap<String, Vec<f64>> {
    fn returns(&self, asset_id: &str) -> Option<Vec<f64>> {
        self.get(asset_id).cloned()
    }
}

/// Expected returns and covariance for an ordered set of assets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnModel {
    /// Asset ids, in row/column order
    pub asset_ids: Vec<String>,

    /// Expected periodic return per asset
    pub expected_returns: Array1<f64>,

    /// Covariance of periodic returns
    pub covariance: Array2<f64>,

    /// Aligned return history (rows are assets), when built from history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Array2<f64>>,
}

impl ReturnModel {
    /// Build from explicit parameters
    pub fn new(asset_ids: Vec<String>, expected_returns: Array1<f64>, covariance: Array2<f64>) -> RiskResult<Self> {
        let model = Self {
            asset_ids,
            expected_returns,
            covariance,
            history: None,
        };
        model.validate()?;
        Ok(model)
    }

    /// Derive the model from history over the most recent `lookback` periods common
    /// to every asset (all common periods when `None`)
    pub fn from_history<H>(asset_ids: &[String], source: &H, lookback: Option<usize>) -> RiskResult<Self>
    where
        H: ReturnHistory + ?Sized,
    {
        if asset_ids.is_empty() {
            return Err(RiskError::InsufficientData("no assets requested".to_string()));
        }

        let mut series = Vec::with_capacity(asset_ids.len());
        for id in asset_ids {
            let returns = source
                .returns(id)
                .map(|r| stats::clean(&r))
                .ok_or_else(|| RiskError::InsufficientData(format!("no return history for {}", id)))?;
            series.push(returns);
        }

        let common = series.iter().map(Vec::len).min().unwrap_or(0);
        let periods = lookback.map_or(common, |l| l.min(common));
        if periods < 2 {
            return Err(RiskError::InsufficientData(format!(
                "need at least 2 aligned periods, got {}",
                periods
            )));
        }

        let mut history = Array2::<f64>::zeros((asset_ids.len(), periods));
        for (row, returns) in series.iter().enumerate() {
            let tail = &returns[returns.len() - periods..];
            for (col, value) in tail.iter().enumerate() {
                history[[row, col]] = *value;
            }
        }

        let expected_returns = history
            .mean_axis(Axis(1))
            .ok_or_else(|| RiskError::InsufficientData("empty return history".to_string()))?;
        let covariance = history
            .cov(1.0)
            .map_err(|e| RiskError::InsufficientData(e.to_string()))?;

        debug!(assets = asset_ids.len(), periods, "return model derived from history");

        let model = Self {
            asset_ids: asset_ids.to_vec(),
            expected_returns,
            covariance,
            history: Some(history),
        };
        model.validate()?;
        Ok(model)
    }

    /// Number of assets
    pub fn len(&self) -> usize {
        self.asset_ids.len()
    }

    /// Whether the model covers no assets
    pub fn is_empty(&self) -> bool {
        self.asset_ids.is_empty()
    }

    /// Row of an asset
    pub fn index_of(&self, asset_id: &str) -> Option<usize> {
        self.asset_ids.iter().position(|id| id == asset_id)
    }

    /// Weight vector in model order. Assets missing from `weights` get 0.
    pub fn weight_vector(&self, weights: &BTreeMap<String, f64>) -> Array1<f64> {
        self.asset_ids
            .iter()
            .map(|id| weights.get(id).copied().unwrap_or(0.0))
            .collect()
    }

    /// Expected periodic return of a weight vector
    pub fn portfolio_return(&self, weights: &Array1<f64>) -> f64 {
        weights.dot(&self.expected_returns)
    }

    /// Periodic variance of a weight vector
    pub fn portfolio_variance(&self, weights: &Array1<f64>) -> f64 {
        weights.dot(&self.covariance.dot(weights))
    }

    fn validate(&self) -> RiskResult<()> {
        let n = self.asset_ids.len();
        if self.expected_returns.len() != n {
            return Err(RiskError::DimensionMismatch {
                expected: n,
                actual: self.expected_returns.len(),
            });
        }
        if self.covariance.dim() != (n, n) {
            return Err(RiskError::DimensionMismatch {
                expected: n,
                actual: self.covariance.nrows(),
            });
        }
        if self.expected_returns.iter().chain(self.covariance.iter()).any(|v| !v.is_finite()) {
            return Err(RiskError::Degenerate("non-finite model parameters".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_history_aligns_trailing_periods() {
        let mut history = HashMap::new();
        history.insert("A".to_string(), vec![0.5, 0.01, 0.02, 0.03]);
        history.insert("B".to_string(), vec![0.02, 0.04, 0.06]);

        let model = ReturnModel::from_history(&ids(&["A", "B"]), &history, None).unwrap();

        assert_eq!(model.len(), 2);
        assert!((model.expected_returns[0] - 0.02).abs() < 1e-12);
        assert!((model.expected_returns[1] - 0.04).abs() < 1e-12);
        // var(A) = 1e-4, var(B) = 4e-4, cov = 2e-4
        assert!((model.covariance[[0, 0]] - 1e-4).abs() < 1e-12);
        assert!((model.covariance[[1, 1]] - 4e-4).abs() < 1e-12);
        assert!((model.covariance[[0, 1]] - 2e-4).abs() < 1e-12);
        assert_eq!(model.history.as_ref().map(|h| h.dim()), Some((2, 3)));
    }

    #[test]
    fn test_from_history_lookback() {
        let mut history = BTreeMap::new();
        history.insert("A".to_string(), vec![0.9, 0.9, 0.01, 0.03]);

        let model = ReturnModel::from_history(&ids(&["A"]), &history, Some(2)).unwrap();
        assert!((model.expected_returns[0] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_missing_history_is_insufficient() {
        let history: HashMap<String, Vec<f64>> = HashMap::new();
        assert!(matches!(
            ReturnModel::from_history(&ids(&["A"]), &history, None),
            Err(RiskError::InsufficientData(_))
        ));

        let mut short = HashMap::new();
        short.insert("A".to_string(), vec![0.01]);
        assert!(matches!(
            ReturnModel::from_history(&ids(&["A"]), &short, None),
            Err(RiskError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let result = ReturnModel::new(ids(&["A", "B"]), array![0.01], array![[1.0, 0.0], [0.0, 1.0]]);
        assert!(matches!(result, Err(RiskError::DimensionMismatch { expected: 2, actual: 1 })));
    }

    #[test]
    fn test_portfolio_moments() {
        let model = ReturnModel::new(
            ids(&["A", "B"]),
            array![0.01, 0.03],
            array![[0.04, 0.0], [0.0, 0.09]],
        )
        .unwrap();

        let mut weights = BTreeMap::new();
        weights.insert("A".to_string(), 0.5);
        weights.insert("B".to_string(), 0.5);
        let w = model.weight_vector(&weights);

        assert!((model.portfolio_return(&w) - 0.02).abs() < 1e-12);
        assert!((model.portfolio_variance(&w) - 0.0325).abs() < 1e-12);
    }
}
