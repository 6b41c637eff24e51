use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Asset classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    /// Cryptocurrency
    Crypto,

    /// Listed equity
    Stock,

    /// Fixed income
    Bond,

    /// Commodity
    Commodity,

    /// Foreign exchange
    Forex,

    /// Options, futures and other derivatives
    Derivative,

    /// Real estate
    RealEstate,

    /// Cash and cash equivalents
    Cash,
}

impl AssetType {
    /// All asset types, in declaration order
    pub const ALL: [AssetType; 8] = [
        AssetType::Crypto,
        AssetType::Stock,
        AssetType::Bond,
        AssetType::Commodity,
        AssetType::Forex,
        AssetType::Derivative,
        AssetType::RealEstate,
        AssetType::Cash,
    ];

    /// Name used in configuration files and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Crypto => "crypto",
            AssetType::Stock => "stock",
            AssetType::Bond => "bond",
            AssetType::Commodity => "commodity",
            AssetType::Forex => "forex",
            AssetType::Derivative => "derivative",
            AssetType::RealEstate => "real_estate",
            AssetType::Cash => "cash",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownAssetType(s.to_string()))
    }
}

/// Reference data for a tradable asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Stable asset identifier
    pub id: String,

    /// Ticker symbol
    pub symbol: String,

    /// Display name
    pub name: String,

    /// Asset classification
    pub asset_type: AssetType,

    /// Sector (e.g. "Technology", "Energy")
    pub sector: Option<String>,

    /// Quote currency (ISO code)
    pub currency: String,
}

impl Asset {
    /// Create a new asset quoted in USD
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, asset_type: AssetType) -> Self {
        let symbol = symbol.into();
        Self {
            id: id.into(),
            name: symbol.clone(),
            symbol,
            asset_type,
            sector: None,
            currency: "USD".to_string(),
        }
    }

    /// Set the sector
    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    /// Set the quote currency
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Direction of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionType {
    /// Profits when price rises
    Long,

    /// Profits when price falls
    Short,

    /// Hedged or market-neutral
    Neutral,
}

impl PositionType {
    /// Sign applied to price moves when computing P&L and net exposure
    pub fn direction(&self) -> f64 {
        match self {
            PositionType::Long | PositionType::Neutral => 1.0,
            PositionType::Short => -1.0,
        }
    }
}

/// Position lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// Position is open
    Active,

    /// Position has been fully closed
    Closed,

    /// Entry has been submitted but not filled
    Pending,

    /// Trading in the position is suspended
    Suspended,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_type_round_trips_through_str() {
        for t in AssetType::ALL {
            assert_eq!(t.as_str().parse::<AssetType>().unwrap(), t);
        }
        assert!("equity".parse::<AssetType>().is_err());
    }

    #[test]
    fn test_asset_builder() {
        let asset = Asset::new("AAPL", "AAPL", AssetType::Stock)
            .with_sector("Technology")
            .with_name("Apple Inc.");

        assert_eq!(asset.sector.as_deref(), Some("Technology"));
        assert_eq!(asset.currency, "USD");
        assert_eq!(asset.name, "Apple Inc.");
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&AssetType::RealEstate).unwrap();
        assert_eq!(json, "\"real_estate\"");
    }
}
