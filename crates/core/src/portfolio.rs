//! Portfolio: the single-writer owner of positions
//!
//! Aggregate figures (total value, weights, allocations) are derived on demand from
//! the active positions. Callers serialize mutations; analytics work on
//! [`PortfolioSnapshot`]s.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::limits::RiskLimitConfig;
use crate::position::{validate_price, Position};
use crate::snapshot::{PortfolioSnapshot, UNCLASSIFIED_SECTOR};
use crate::types::AssetType;
use crate::{CoreError, CoreResult};

/// Portfolio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    /// Portfolio ID
    pub id: String,

    /// Display name
    pub name: String,

    /// Capital at inception
    pub initial_capital: f64,

    /// Capital after realized P&L
    pub current_capital: f64,

    /// Positions in insertion order, including closed ones
    pub positions: Vec<Position>,

    /// Risk limit configuration
    #[serde(default)]
    pub risk_limits: RiskLimitConfig,

    /// Rebalancing cadence in days
    pub rebalance_frequency_days: i64,

    /// Last completed rebalance
    pub last_rebalanced_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Portfolio {
    /// Create an empty portfolio
    pub fn new(name: impl Into<String>, initial_capital: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            initial_capital,
            current_capital: initial_capital,
            positions: Vec::new(),
            risk_limits: RiskLimitConfig::default(),
            rebalance_frequency_days: 30,
            last_rebalanced_at: None,
            created_at: Utc::now(),
        }
    }

    /// Replace the risk limit configuration
    pub fn with_risk_limits(mut self, risk_limits: RiskLimitConfig) -> Self {
        self.risk_limits = risk_limits;
        self
    }

    /// Add a position. Only one active position per asset is allowed.
    pub fn add_position(&mut self, mut position: Position) -> CoreResult<()> {
        if self
            .get_active_positions()
            .any(|p| p.asset_id() == position.asset_id())
        {
            return Err(CoreError::DuplicatePosition(position.asset_id().to_string()));
        }

        position.portfolio_id = self.id.clone();
        info!(portfolio_id = %self.id, asset = %position.asset_id(), value = position.market_value, "position added");
        self.positions.push(position);
        self.refresh_weights();
        Ok(())
    }

    /// Active positions in insertion order
    pub fn get_active_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| p.is_active())
    }

    /// Active position for an asset
    pub fn position(&self, asset_id: &str) -> Option<&Position> {
        self.get_active_positions().find(|p| p.asset_id() == asset_id)
    }

    /// Gross value of all active positions
    pub fn calculate_total_value(&self) -> f64 {
        self.get_active_positions().map(|p| p.market_value).sum()
    }

    /// Weight per asset in percent
    pub fn calculate_weight_percentages(&self) -> BTreeMap<String, f64> {
        let total = self.calculate_total_value();
        let mut weights = BTreeMap::new();
        for position in self.get_active_positions() {
            let weight = if total > 0.0 {
                position.market_value / total * 100.0
            } else {
                0.0
            };
            *weights.entry(position.asset_id().to_string()).or_insert(0.0) += weight;
        }
        weights
    }

    /// Recompute the derived weight on every active position
    pub fn refresh_weights(&mut self) {
        let total = self.calculate_total_value();
        for position in self.positions.iter_mut() {
            position.weight_percentage = if position.is_active() && total > 0.0 {
                position.market_value / total * 100.0
            } else {
                0.0
            };
        }
    }

    /// Weight per asset class in percent
    pub fn get_asset_allocation(&self) -> BTreeMap<AssetType, f64> {
        let weights = self.calculate_weight_percentages();
        let mut allocation = BTreeMap::new();
        for position in self.get_active_positions() {
            let weight = weights.get(position.asset_id()).copied().unwrap_or(0.0);
            *allocation.entry(position.asset.asset_type).or_insert(0.0) += weight;
        }
        allocation
    }

    /// Weight per sector in percent
    pub fn get_sector_allocation(&self) -> BTreeMap<String, f64> {
        let weights = self.calculate_weight_percentages();
        let mut allocation = BTreeMap::new();
        for position in self.get_active_positions() {
            let sector = position
                .asset
                .sector
                .clone()
                .unwrap_or_else(|| UNCLASSIFIED_SECTOR.to_string());
            let weight = weights.get(position.asset_id()).copied().unwrap_or(0.0);
            *allocation.entry(sector).or_insert(0.0) += weight;
        }
        allocation
    }

    /// Apply a batch of prices keyed by asset id. Returns the number of positions updated.
    ///
    /// Nothing is applied when any price for an active position is invalid.
    pub fn update_prices(&mut self, prices: &HashMap<String, f64>) -> CoreResult<usize> {
        for position in self.get_active_positions() {
            if let Some(price) = prices.get(position.asset_id()) {
                validate_price(*price)?;
            }
        }

        let mut updated = 0;
        for position in self.positions.iter_mut().filter(|p| p.is_active()) {
            if let Some(price) = prices.get(position.asset_id()) {
                position.update_price(*price)?;
                updated += 1;
            }
        }
        self.refresh_weights();
        debug!(portfolio_id = %self.id, updated, "prices applied");
        Ok(updated)
    }

    /// Close part of the active position in `asset_id`, booking realized P&L into capital
    pub fn reduce_position(&mut self, asset_id: &str, quantity: f64, price: f64) -> CoreResult<f64> {
        let position = self
            .positions
            .iter_mut()
            .find(|p| p.is_active() && p.asset_id() == asset_id)
            .ok_or_else(|| CoreError::PositionNotFound(asset_id.to_string()))?;

        let realized = position.reduce(quantity, price)?;
        self.current_capital += realized;
        self.refresh_weights();
        Ok(realized)
    }

    /// Close the whole active position in `asset_id`
    pub fn close_position(&mut self, asset_id: &str, price: f64) -> CoreResult<f64> {
        let quantity = self
            .position(asset_id)
            .map(|p| p.quantity)
            .ok_or_else(|| CoreError::PositionNotFound(asset_id.to_string()))?;
        self.reduce_position(asset_id, quantity, price)
    }

    /// Whole days since the last rebalance, `None` if never rebalanced
    pub fn days_since_last_rebalance(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_rebalanced_at.map(|at| (now - at).num_days())
    }

    /// Record a completed rebalance
    pub fn mark_rebalanced(&mut self, at: DateTime<Utc>) {
        self.last_rebalanced_at = Some(at);
    }

    /// Replace the rebalancing cadence
    pub fn with_rebalance_frequency(mut self, days: i64) -> Self {
        self.rebalance_frequency_days = days;
        self
    }

    /// Freeze the current state for analytics
    pub fn snapshot(&self) -> PortfolioSnapshot {
        PortfolioSnapshot::from_positions(self.id.clone(), self.positions.iter())
            .with_risk_limits(self.risk_limits.clone())
            .with_capital(self.current_capital)
            .with_rebalance_schedule(self.rebalance_frequency_days, self.last_rebalanced_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, PositionType};

    fn stock(id: &str, sector: &str, value: f64) -> Position {
        let asset = Asset::new(id, id, AssetType::Stock).with_sector(sector);
        Position::open("unset", asset, value / 10.0, 10.0, PositionType::Long).unwrap()
    }

    fn sample_portfolio() -> Portfolio {
        let mut portfolio = Portfolio::new("test", 100.0);
        portfolio.add_position(stock("AAPL", "Tech", 50.0)).unwrap();
        portfolio.add_position(stock("MSFT", "Tech", 30.0)).unwrap();
        portfolio.add_position(stock("XOM", "Energy", 20.0)).unwrap();
        portfolio
    }

    #[test]
    fn test_weights_and_allocations() {
        let portfolio = sample_portfolio();

        assert!((portfolio.calculate_total_value() - 100.0).abs() < 1e-9);
        let weights = portfolio.calculate_weight_percentages();
        assert!((weights["AAPL"] - 50.0).abs() < 1e-9);
        assert!((portfolio.get_sector_allocation()["Tech"] - 80.0).abs() < 1e-9);
        assert!((portfolio.get_asset_allocation()[&AssetType::Stock] - 100.0).abs() < 1e-9);

        let position_weights: f64 = portfolio.get_active_positions().map(|p| p.weight_percentage).sum();
        assert!((position_weights - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_duplicate_active_position_is_rejected() {
        let mut portfolio = sample_portfolio();
        assert!(matches!(
            portfolio.add_position(stock("AAPL", "Tech", 10.0)),
            Err(CoreError::DuplicatePosition(_))
        ));
    }

    #[test]
    fn test_price_update_refreshes_weights() {
        let mut portfolio = sample_portfolio();
        let mut prices = HashMap::new();
        prices.insert("XOM".to_string(), 40.0);

        assert_eq!(portfolio.update_prices(&prices).unwrap(), 1);
        // XOM: 2 shares * 40 = 80 of 160
        assert!((portfolio.calculate_weight_percentages()["XOM"] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_price_in_batch_applies_nothing() {
        let mut portfolio = sample_portfolio();
        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), 30.0);
        prices.insert("XOM".to_string(), -1.0);

        assert!(matches!(portfolio.update_prices(&prices), Err(CoreError::InvalidPrice(_))));
        assert_eq!(portfolio.position("AAPL").unwrap().current_price, 10.0);
        assert!((portfolio.calculate_total_value() - 100.0).abs() < 1e-9);

        let stored: BTreeMap<String, f64> = portfolio
            .get_active_positions()
            .map(|p| (p.asset_id().to_string(), p.weight_percentage))
            .collect();
        assert_eq!(stored, portfolio.calculate_weight_percentages());
    }

    #[test]
    fn test_close_position_books_capital() {
        let mut portfolio = sample_portfolio();
        let realized = portfolio.close_position("XOM", 12.0).unwrap();

        assert!((realized - 4.0).abs() < 1e-9);
        assert!((portfolio.current_capital - 104.0).abs() < 1e-9);
        assert!(portfolio.position("XOM").is_none());
        assert_eq!(portfolio.get_active_positions().count(), 2);
        assert!(matches!(
            portfolio.close_position("XOM", 12.0),
            Err(CoreError::PositionNotFound(_))
        ));
    }

    #[test]
    fn test_snapshot_carries_limits() {
        let mut limits = RiskLimitConfig::default();
        limits.max_sector_exposure = 0.5;
        let portfolio = sample_portfolio().with_risk_limits(limits.clone());

        let snapshot = portfolio.snapshot();
        assert_eq!(snapshot.risk_limits, limits);
        assert_eq!(snapshot.positions.len(), 3);
        assert_eq!(snapshot.portfolio_id, portfolio.id);
        assert_eq!(snapshot.capital, 100.0);
        assert_eq!(snapshot.rebalance_frequency_days, Some(30));
        assert_eq!(snapshot.days_since_last_rebalance(), None);
    }

    #[test]
    fn test_snapshot_carries_rebalance_schedule() {
        let mut portfolio = sample_portfolio().with_rebalance_frequency(7);
        portfolio.mark_rebalanced(Utc::now() - chrono::Duration::days(9));

        let snapshot = portfolio.snapshot();
        assert_eq!(snapshot.rebalance_frequency_days, Some(7));
        assert_eq!(snapshot.days_since_last_rebalance(), Some(9));
    }

    #[test]
    fn test_days_since_last_rebalance() {
        let mut portfolio = sample_portfolio();
        let now = Utc::now();
        assert_eq!(portfolio.days_since_last_rebalance(now), None);

        portfolio.mark_rebalanced(now - chrono::Duration::days(12));
        assert_eq!(portfolio.days_since_last_rebalance(now), Some(12));
    }
}
