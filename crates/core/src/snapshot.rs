//! Point-in-time view of a portfolio
//!
//! Analytics read snapshots, never the live [`Portfolio`](crate::Portfolio), so a
//! risk or rebalance computation sees one consistent state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::limits::RiskLimitConfig;
use crate::position::Position;
use crate::types::{AssetType, PositionType};

/// Sector label used for assets without a sector
pub const UNCLASSIFIED_SECTOR: &str = "Unclassified";

/// Frozen view of one active position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Asset identifier
    pub asset_id: String,

    /// Ticker symbol
    pub symbol: String,

    /// Asset classification
    pub asset_type: AssetType,

    /// Sector
    pub sector: Option<String>,

    /// Quote currency
    pub currency: String,

    /// Long, short or neutral
    pub position_type: PositionType,

    /// Quantity held
    pub quantity: f64,

    /// Price at snapshot time
    pub current_price: f64,

    /// Market value at snapshot time
    pub market_value: f64,

    /// Share of total value in percent
    pub weight: f64,
}

impl PositionSnapshot {
    /// Sector name, falling back to [`UNCLASSIFIED_SECTOR`]
    pub fn sector_name(&self) -> &str {
        self.sector.as_deref().unwrap_or(UNCLASSIFIED_SECTOR)
    }

    /// Signed exposure: negative for short positions
    pub fn net_exposure(&self) -> f64 {
        self.market_value * self.position_type.direction()
    }
}

impl From<&Position> for PositionSnapshot {
    fn from(position: &Position) -> Self {
        Self {
            asset_id: position.asset.id.clone(),
            symbol: position.asset.symbol.clone(),
            asset_type: position.asset.asset_type,
            sector: position.asset.sector.clone(),
            currency: position.asset.currency.clone(),
            position_type: position.position_type,
            quantity: position.quantity,
            current_price: position.current_price,
            market_value: position.market_value,
            weight: position.weight_percentage,
        }
    }
}

/// Portfolio snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// Portfolio identifier
    pub portfolio_id: String,

    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,

    /// Gross value of active positions
    pub total_value: f64,

    /// Active positions with weights
    pub positions: Vec<PositionSnapshot>,

    /// Risk limits configured on the portfolio
    pub risk_limits: RiskLimitConfig,

    /// Capital financing the positions, 0 when unknown
    #[serde(default)]
    pub capital: f64,

    /// Rebalancing cadence of the portfolio in days
    #[serde(default)]
    pub rebalance_frequency_days: Option<i64>,

    /// Last completed rebalance
    #[serde(default)]
    pub last_rebalanced_at: Option<DateTime<Utc>>,
}

impl PortfolioSnapshot {
    /// Build a snapshot from active positions, recomputing weights from market values
    pub fn from_positions<'a, I>(portfolio_id: impl Into<String>, positions: I) -> Self
    where
        I: IntoIterator<Item = &'a Position>,
    {
        let positions: Vec<PositionSnapshot> = positions
            .into_iter()
            .filter(|p| p.is_active())
            .map(PositionSnapshot::from)
            .collect();
        Self::from_position_snapshots(portfolio_id, positions)
    }

    /// Build a snapshot from already frozen positions, recomputing weights
    pub fn from_position_snapshots(
        portfolio_id: impl Into<String>,
        mut positions: Vec<PositionSnapshot>,
    ) -> Self {
        let total_value: f64 = positions.iter().map(|p| p.market_value).sum();
        for position in &mut positions {
            position.weight = if total_value > 0.0 {
                position.market_value / total_value * 100.0
            } else {
                0.0
            };
        }

        Self {
            portfolio_id: portfolio_id.into(),
            taken_at: Utc::now(),
            total_value,
            positions,
            risk_limits: RiskLimitConfig::default(),
            capital: 0.0,
            rebalance_frequency_days: None,
            last_rebalanced_at: None,
        }
    }

    /// Replace the risk limits carried by the snapshot
    pub fn with_risk_limits(mut self, risk_limits: RiskLimitConfig) -> Self {
        self.risk_limits = risk_limits;
        self
    }

    /// Set the capital base used for leverage
    pub fn with_capital(mut self, capital: f64) -> Self {
        self.capital = capital;
        self
    }

    /// Set the portfolio's rebalancing cadence and last rebalance
    pub fn with_rebalance_schedule(mut self, frequency_days: i64, last_rebalanced_at: Option<DateTime<Utc>>) -> Self {
        self.rebalance_frequency_days = Some(frequency_days);
        self.last_rebalanced_at = last_rebalanced_at;
        self
    }

    /// Whole days from the last rebalance to the snapshot, `None` if never rebalanced
    pub fn days_since_last_rebalance(&self) -> Option<i64> {
        self.last_rebalanced_at.map(|at| (self.taken_at - at).num_days())
    }

    /// Whether there are no active positions
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Weight per asset in percent
    pub fn weights(&self) -> BTreeMap<String, f64> {
        let mut weights = BTreeMap::new();
        for position in &self.positions {
            *weights.entry(position.asset_id.clone()).or_insert(0.0) += position.weight;
        }
        weights
    }

    /// Weight per asset as a fraction of 1
    pub fn weight_fractions(&self) -> BTreeMap<String, f64> {
        self.weights()
            .into_iter()
            .map(|(id, w)| (id, w / 100.0))
            .collect()
    }

    /// Weight per sector in percent
    pub fn sector_allocation(&self) -> BTreeMap<String, f64> {
        let mut allocation = BTreeMap::new();
        for position in &self.positions {
            *allocation.entry(position.sector_name().to_string()).or_insert(0.0) += position.weight;
        }
        allocation
    }

    /// Weight per asset class in percent
    pub fn asset_allocation(&self) -> BTreeMap<AssetType, f64> {
        let mut allocation = BTreeMap::new();
        for position in &self.positions {
            *allocation.entry(position.asset_type).or_insert(0.0) += position.weight;
        }
        allocation
    }

    /// Sum of absolute exposures
    pub fn gross_exposure(&self) -> f64 {
        self.positions.iter().map(|p| p.market_value.abs()).sum()
    }

    /// Sum of signed exposures
    pub fn net_exposure(&self) -> f64 {
        self.positions.iter().map(|p| p.net_exposure()).sum()
    }

    /// Gross exposure over the capital base.
    ///
    /// The base is the snapshot's capital when known. Otherwise it is the larger of the
    /// long and short side, so a long-only book sits at 1x and a fully hedged one at 2x.
    pub fn leverage(&self) -> f64 {
        let base = if self.capital > 0.0 {
            self.capital
        } else {
            let (long, short) = self.side_values();
            long.max(short)
        };
        if base > 0.0 {
            self.gross_exposure() / base
        } else {
            0.0
        }
    }

    /// Market value of the long and of the short positions
    fn side_values(&self) -> (f64, f64) {
        self.positions.iter().fold((0.0, 0.0), |(long, short), p| {
            if p.position_type == PositionType::Short {
                (long, short + p.market_value.abs())
            } else {
                (long + p.market_value.abs(), short)
            }
        })
    }

    /// Look up a position by asset id
    pub fn position(&self, asset_id: &str) -> Option<&PositionSnapshot> {
        self.positions.iter().find(|p| p.asset_id == asset_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Asset;

    fn position(id: &str, value: f64, sector: &str, position_type: PositionType) -> Position {
        let asset = Asset::new(id, id, AssetType::Stock).with_sector(sector);
        Position::open("pf", asset, value, 1.0, position_type).unwrap()
    }

    #[test]
    fn test_weights_sum_to_one_hundred() {
        let positions = vec![
            position("A", 50.0, "Tech", PositionType::Long),
            position("B", 30.0, "Tech", PositionType::Long),
            position("C", 20.0, "Energy", PositionType::Long),
        ];
        let snapshot = PortfolioSnapshot::from_positions("pf", &positions);

        let total: f64 = snapshot.weights().values().sum();
        assert!((total - 100.0).abs() < 1e-9);
        assert!((snapshot.sector_allocation()["Tech"] - 80.0).abs() < 1e-9);
        assert!((snapshot.asset_allocation()[&AssetType::Stock] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_closed_positions_are_excluded() {
        let mut closed = position("A", 10.0, "Tech", PositionType::Long);
        closed.close(1.0).unwrap();
        let positions = vec![closed, position("B", 10.0, "Tech", PositionType::Long)];

        let snapshot = PortfolioSnapshot::from_positions("pf", &positions);
        assert_eq!(snapshot.positions.len(), 1);
        assert_eq!(snapshot.weights()["B"], 100.0);
    }

    #[test]
    fn test_leverage_with_short_leg() {
        let positions = vec![
            position("A", 150.0, "Tech", PositionType::Long),
            position("B", 50.0, "Tech", PositionType::Short),
        ];
        let snapshot = PortfolioSnapshot::from_positions("pf", &positions);
        assert!((snapshot.leverage() - 200.0 / 150.0).abs() < 1e-9);

        let funded = snapshot.with_capital(100.0);
        assert!((funded.leverage() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_leverage_of_market_neutral_book() {
        let neutral = PortfolioSnapshot::from_positions(
            "pf",
            &vec![
                position("A", 100.0, "Tech", PositionType::Long),
                position("B", 100.0, "Tech", PositionType::Short),
            ],
        );
        assert!((neutral.leverage() - 2.0).abs() < 1e-9);

        let nearly = PortfolioSnapshot::from_positions(
            "pf",
            &vec![
                position("A", 100.0, "Tech", PositionType::Long),
                position("B", 99.0, "Tech", PositionType::Short),
            ],
        );
        assert!((nearly.leverage() - 1.99).abs() < 1e-9);

        let long_only = PortfolioSnapshot::from_positions("pf", &vec![position("A", 100.0, "Tech", PositionType::Long)]);
        assert!((long_only.leverage() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_snapshot_is_zeroed() {
        let snapshot = PortfolioSnapshot::from_positions("pf", &Vec::<Position>::new());
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.total_value, 0.0);
        assert_eq!(snapshot.leverage(), 0.0);
        assert!(snapshot.sector_allocation().is_empty());
    }
}
