//! Core module for the pocket hedge fund
//!
//! This module holds the portfolio data model shared by the analytics crates:
//! - Asset reference data and classification
//! - Position bookkeeping and lifecycle
//! - Portfolio aggregation (value, weights, allocations)
//! - Immutable portfolio snapshots
//! - Risk limit configuration

mod limits;
mod portfolio;
mod position;
mod snapshot;
mod types;

pub use limits::RiskLimitConfig;
pub use portfolio::Portfolio;
pub use position::{ExitTrigger, Position};
pub use snapshot::{PortfolioSnapshot, PositionSnapshot, UNCLASSIFIED_SECTOR};
pub use types::{Asset, AssetType, PositionStatus, PositionType};

/// Error types for the core module
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(f64),

    #[error("Invalid price: {0}")]
    InvalidPrice(f64),

    #[error("Insufficient quantity: requested {requested}, available {available}")]
    InsufficientQuantity { requested: f64, available: f64 },

    #[error("Position is closed: {0}")]
    PositionClosed(String),

    #[error("Position not found for asset: {0}")]
    PositionNotFound(String),

    #[error("Active position already exists for asset: {0}")]
    DuplicatePosition(String),

    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: PositionStatus,
        to: PositionStatus,
    },

    #[error("Unknown asset type: {0}")]
    UnknownAssetType(String),

    #[error("Unknown risk limit: {0}")]
    UnknownLimit(String),

    #[error("Invalid value for risk limit {key}: {value}")]
    InvalidLimit { key: String, value: f64 },
}

/// Result type for the core module
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Module version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
