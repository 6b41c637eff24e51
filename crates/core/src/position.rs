//! Position bookkeeping
//!
//! A position belongs to exactly one portfolio and tracks one asset. The
//! invariant `market_value == quantity * current_price` is restored after every
//! price or quantity change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::types::{Asset, PositionStatus, PositionType};
use crate::{CoreError, CoreResult};

/// Quantities below this are treated as zero
const QUANTITY_EPSILON: f64 = 1e-12;

/// Price level that was crossed by the current price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitTrigger {
    /// Stop-loss level reached
    StopLoss,

    /// Take-profit level reached
    TakeProfit,
}

/// Position information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Position ID
    pub id: String,

    /// Owning portfolio ID
    pub portfolio_id: String,

    /// Held asset
    pub asset: Asset,

    /// Quantity held (always non-negative, direction is in `position_type`)
    pub quantity: f64,

    /// Average entry price
    pub entry_price: f64,

    /// Current market price
    pub current_price: f64,

    /// Market value (quantity * current_price)
    pub market_value: f64,

    /// Unrealized profit/loss
    pub unrealized_pnl: f64,

    /// Realized profit/loss from partial closes
    pub realized_pnl: f64,

    /// Long, short or neutral
    pub position_type: PositionType,

    /// Optional stop-loss price
    pub stop_loss: Option<f64>,

    /// Optional take-profit price
    pub take_profit: Option<f64>,

    /// Lifecycle status
    pub status: PositionStatus,

    /// Share of portfolio value in percent. Derived, recomputed by the portfolio.
    pub weight_percentage: f64,

    /// Entry timestamp
    pub opened_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Close timestamp
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Open a new active position
    pub fn open(
        portfolio_id: impl Into<String>,
        asset: Asset,
        quantity: f64,
        entry_price: f64,
        position_type: PositionType,
    ) -> CoreResult<Self> {
        validate_quantity(quantity)?;
        validate_price(entry_price)?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            portfolio_id: portfolio_id.into(),
            asset,
            quantity,
            entry_price,
            current_price: entry_price,
            market_value: quantity * entry_price,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            position_type,
            stop_loss: None,
            take_profit: None,
            status: PositionStatus::Active,
            weight_percentage: 0.0,
            opened_at: now,
            updated_at: now,
            closed_at: None,
        })
    }

    /// Attach a stop-loss level
    pub fn with_stop_loss(mut self, price: f64) -> Self {
        self.stop_loss = Some(price);
        self
    }

    /// Attach a take-profit level
    pub fn with_take_profit(mut self, price: f64) -> Self {
        self.take_profit = Some(price);
        self
    }

    /// Asset identifier
    pub fn asset_id(&self) -> &str {
        &self.asset.id
    }

    /// Whether the position counts towards portfolio value
    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    /// Signed exposure: negative for short positions
    pub fn net_exposure(&self) -> f64 {
        self.market_value * self.position_type.direction()
    }

    /// Apply a new market price
    pub fn update_price(&mut self, price: f64) -> CoreResult<()> {
        self.ensure_open()?;
        validate_price(price)?;

        self.current_price = price;
        self.revalue();
        Ok(())
    }

    /// Close part of the position at `price`, returning the realized P&L of the slice.
    ///
    /// The position transitions to `Closed` when the remaining quantity reaches zero.
    pub fn reduce(&mut self, quantity: f64, price: f64) -> CoreResult<f64> {
        self.ensure_open()?;
        validate_quantity(quantity)?;
        validate_price(price)?;

        if quantity > self.quantity + QUANTITY_EPSILON {
            return Err(CoreError::InsufficientQuantity {
                requested: quantity,
                available: self.quantity,
            });
        }

        let realized =
            (price - self.entry_price) * quantity.min(self.quantity) * self.position_type.direction();
        self.realized_pnl += realized;
        self.quantity = (self.quantity - quantity).max(0.0);
        self.current_price = price;

        if self.quantity <= QUANTITY_EPSILON {
            self.quantity = 0.0;
            self.status = PositionStatus::Closed;
            self.closed_at = Some(Utc::now());
            self.weight_percentage = 0.0;
            debug!(position_id = %self.id, asset = %self.asset.id, realized_pnl = self.realized_pnl, "position closed");
        }

        self.revalue();
        Ok(realized)
    }

    /// Close the whole position at `price`
    pub fn close(&mut self, price: f64) -> CoreResult<f64> {
        let quantity = self.quantity;
        self.reduce(quantity, price)
    }

    /// Suspend trading in an active position
    pub fn suspend(&mut self) -> CoreResult<()> {
        match self.status {
            PositionStatus::Active => {
                self.status = PositionStatus::Suspended;
                self.updated_at = Utc::now();
                Ok(())
            }
            other => Err(CoreError::InvalidTransition {
                from: other,
                to: PositionStatus::Suspended,
            }),
        }
    }

    /// Reactivate a suspended or pending position
    pub fn resume(&mut self) -> CoreResult<()> {
        match self.status {
            PositionStatus::Suspended | PositionStatus::Pending => {
                self.status = PositionStatus::Active;
                self.updated_at = Utc::now();
                Ok(())
            }
            other => Err(CoreError::InvalidTransition {
                from: other,
                to: PositionStatus::Active,
            }),
        }
    }

    /// Report whether the current price has crossed a stop-loss or take-profit level
    pub fn exit_trigger(&self) -> Option<ExitTrigger> {
        if !self.is_active() {
            return None;
        }

        let price = self.current_price;
        match self.position_type {
            PositionType::Short => {
                if self.stop_loss.is_some_and(|sl| price >= sl) {
                    Some(ExitTrigger::StopLoss)
                } else if self.take_profit.is_some_and(|tp| price <= tp) {
                    Some(ExitTrigger::TakeProfit)
                } else {
                    None
                }
            }
            PositionType::Long | PositionType::Neutral => {
                if self.stop_loss.is_some_and(|sl| price <= sl) {
                    Some(ExitTrigger::StopLoss)
                } else if self.take_profit.is_some_and(|tp| price >= tp) {
                    Some(ExitTrigger::TakeProfit)
                } else {
                    None
                }
            }
        }
    }

    fn revalue(&mut self) {
        self.market_value = self.quantity * self.current_price;
        self.unrealized_pnl =
            (self.current_price - self.entry_price) * self.quantity * self.position_type.direction();
        self.updated_at = Utc::now();
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.status == PositionStatus::Closed {
            return Err(CoreError::PositionClosed(self.id.clone()));
        }
        Ok(())
    }
}

fn validate_quantity(quantity: f64) -> CoreResult<()> {
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(CoreError::InvalidQuantity(quantity));
    }
    Ok(())
}

pub(crate) fn validate_price(price: f64) -> CoreResult<()> {
    if !price.is_finite() || price <= 0.0 {
        return Err(CoreError::InvalidPrice(price));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetType;

    fn btc_position(quantity: f64, price: f64) -> Position {
        let asset = Asset::new("BTC", "BTC", AssetType::Crypto);
        Position::open("pf-1", asset, quantity, price, PositionType::Long).unwrap()
    }

    #[test]
    fn test_market_value_invariant_after_updates() {
        let mut position = btc_position(2.0, 100.0);
        assert_eq!(position.market_value, 200.0);

        position.update_price(120.0).unwrap();
        assert_eq!(position.market_value, position.quantity * position.current_price);
        assert!((position.unrealized_pnl - 40.0).abs() < 1e-9);

        position.reduce(0.5, 130.0).unwrap();
        assert_eq!(position.market_value, position.quantity * position.current_price);
        assert!((position.market_value - 195.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_close_books_realized_pnl() {
        let mut position = btc_position(4.0, 50.0);

        let realized = position.reduce(1.0, 60.0).unwrap();
        assert!((realized - 10.0).abs() < 1e-9);
        assert!((position.realized_pnl - 10.0).abs() < 1e-9);
        assert_eq!(position.status, PositionStatus::Active);
        assert!((position.quantity - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_full_close_transitions_to_closed() {
        let mut position = btc_position(1.0, 50.0);
        position.close(40.0).unwrap();

        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.quantity, 0.0);
        assert_eq!(position.market_value, 0.0);
        assert!(position.closed_at.is_some());
        assert!(matches!(position.update_price(41.0), Err(CoreError::PositionClosed(_))));
    }

    #[test]
    fn test_reduce_more_than_held_is_rejected() {
        let mut position = btc_position(1.0, 50.0);
        assert!(matches!(
            position.reduce(2.0, 50.0),
            Err(CoreError::InsufficientQuantity { .. })
        ));
    }

    #[test]
    fn test_short_position_pnl_sign() {
        let asset = Asset::new("ETH", "ETH", AssetType::Crypto);
        let mut position = Position::open("pf-1", asset, 10.0, 20.0, PositionType::Short).unwrap();

        position.update_price(18.0).unwrap();
        assert!((position.unrealized_pnl - 20.0).abs() < 1e-9);
        assert!((position.net_exposure() + 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_open_is_rejected() {
        let asset = Asset::new("BTC", "BTC", AssetType::Crypto);
        assert!(Position::open("pf", asset.clone(), 0.0, 10.0, PositionType::Long).is_err());
        assert!(Position::open("pf", asset, 1.0, f64::NAN, PositionType::Long).is_err());
    }

    #[test]
    fn test_exit_triggers() {
        let mut position = btc_position(1.0, 100.0)
            .with_stop_loss(90.0)
            .with_take_profit(130.0);
        assert_eq!(position.exit_trigger(), None);

        position.update_price(89.0).unwrap();
        assert_eq!(position.exit_trigger(), Some(ExitTrigger::StopLoss));

        position.update_price(131.0).unwrap();
        assert_eq!(position.exit_trigger(), Some(ExitTrigger::TakeProfit));
    }

    #[test]
    fn test_suspend_and_resume() {
        let mut position = btc_position(1.0, 100.0);
        position.suspend().unwrap();
        assert_eq!(position.status, PositionStatus::Suspended);
        assert!(position.suspend().is_err());
        position.resume().unwrap();
        assert!(position.is_active());
    }
}
