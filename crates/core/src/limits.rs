//! Risk limit configuration
//!
//! Thresholds are fractions: `max_position_size: 0.10` means no single position may
//! exceed 10% of portfolio value.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult};

/// Risk limit table attached to a portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimitConfig {
    /// Maximum weight of a single position
    pub max_position_size: f64,

    /// Maximum combined weight of one sector
    pub max_sector_exposure: f64,

    /// Maximum combined weight of one asset class
    pub max_asset_class_exposure: f64,

    /// Maximum gross / net exposure ratio
    pub max_leverage: f64,

    /// Maximum Herfindahl index
    pub max_concentration: f64,

    /// Maximum average pairwise return correlation
    pub max_correlation: f64,

    /// Maximum annualized volatility
    pub max_volatility: f64,

    /// Maximum 95% VaR magnitude
    pub max_var_95: f64,

    /// Maximum 99% VaR magnitude
    pub max_var_99: f64,
}

impl Default for RiskLimitConfig {
    fn default() -> Self {
        Self {
            max_position_size: 0.10,
            max_sector_exposure: 0.30,
            max_asset_class_exposure: 0.60,
            max_leverage: 1.5,
            max_concentration: 0.25,
            max_correlation: 0.80,
            max_volatility: 0.40,
            max_var_95: 0.05,
            max_var_99: 0.10,
        }
    }
}

impl RiskLimitConfig {
    /// Recognised limit keys
    pub const KEYS: [&'static str; 9] = [
        "max_position_size",
        "max_sector_exposure",
        "max_asset_class_exposure",
        "max_leverage",
        "max_concentration",
        "max_correlation",
        "max_volatility",
        "max_var_95",
        "max_var_99",
    ];

    /// Build from a string-keyed limit table, starting from the defaults.
    ///
    /// Unknown keys and non-positive values are rejected.
    pub fn from_map(values: &HashMap<String, f64>) -> CoreResult<Self> {
        let mut config = Self::default();
        for (key, value) in values {
            *config.slot_mut(key)? = *value;
        }
        config.validate()?;
        Ok(config)
    }

    /// Export as a string-keyed table
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let values = [
            self.max_position_size,
            self.max_sector_exposure,
            self.max_asset_class_exposure,
            self.max_leverage,
            self.max_concentration,
            self.max_correlation,
            self.max_volatility,
            self.max_var_95,
            self.max_var_99,
        ];
        Self::KEYS
            .iter()
            .zip(values)
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// Check that every threshold is a positive finite number
    pub fn validate(&self) -> CoreResult<()> {
        for (key, value) in self.to_map() {
            if !value.is_finite() || value <= 0.0 {
                return Err(CoreError::InvalidLimit { key, value });
            }
        }
        Ok(())
    }

    fn slot_mut(&mut self, key: &str) -> CoreResult<&mut f64> {
        let slot = match key {
            "max_position_size" => &mut self.max_position_size,
            "max_sector_exposure" => &mut self.max_sector_exposure,
            "max_asset_class_exposure" => &mut self.max_asset_class_exposure,
            "max_leverage" => &mut self.max_leverage,
            "max_concentration" => &mut self.max_concentration,
            "max_correlation" => &mut self.max_correlation,
            "max_volatility" => &mut self.max_volatility,
            "max_var_95" => &mut self.max_var_95,
            "max_var_99" => &mut self.max_var_99,
            other => return Err(CoreError::UnknownLimit(other.to_string())),
        };
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_map_overrides_defaults() {
        let mut values = HashMap::new();
        values.insert("max_sector_exposure".to_string(), 0.25);

        let config = RiskLimitConfig::from_map(&values).unwrap();
        assert_eq!(config.max_sector_exposure, 0.25);
        assert_eq!(config.max_position_size, RiskLimitConfig::default().max_position_size);
    }

    #[test]
    fn test_from_map_rejects_typos() {
        let mut values = HashMap::new();
        values.insert("max_positon_size".to_string(), 0.1);

        assert!(matches!(
            RiskLimitConfig::from_map(&values),
            Err(CoreError::UnknownLimit(key)) if key == "max_positon_size"
        ));
    }

    #[test]
    fn test_from_map_rejects_non_positive_values() {
        let mut values = HashMap::new();
        values.insert("max_leverage".to_string(), 0.0);

        assert!(matches!(
            RiskLimitConfig::from_map(&values),
            Err(CoreError::InvalidLimit { .. })
        ));
    }

    #[test]
    fn test_to_map_contains_every_key() {
        let map = RiskLimitConfig::default().to_map();
        assert_eq!(map.len(), RiskLimitConfig::KEYS.len());
        assert_eq!(map["max_var_99"], 0.10);
    }
}
