//! Risk profiles
//!
//! Predefined starting points for the limit table, stress tolerance and rebalancing
//! drift. A profile replaces the built-in defaults; files and environment variables
//! still override it.

use std::fmt;
use std::str::FromStr;

use pocket_hedge_core::RiskLimitConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::schema::EngineConfig;

/// Named risk appetite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    /// Tight limits, small drift tolerance
    Conservative,
    /// The built-in defaults
    #[default]
    Moderate,
    /// Loose limits, large drift tolerance
    Aggressive,
}

impl RiskProfile {
    pub const ALL: [RiskProfile; 3] = [RiskProfile::Conservative, RiskProfile::Moderate, RiskProfile::Aggressive];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskProfile::Conservative => "conservative",
            RiskProfile::Moderate => "moderate",
            RiskProfile::Aggressive => "aggressive",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RiskProfile::Conservative => "Capital preservation: 5% positions, 20% sectors, no leverage",
            RiskProfile::Moderate => "Balanced growth: 10% positions, 30% sectors, 1.5x leverage",
            RiskProfile::Aggressive => "Growth: 20% positions, 45% sectors, 2x leverage",
        }
    }

    /// Limit table for the profile
    pub fn risk_limits(&self) -> RiskLimitConfig {
        match self {
            RiskProfile::Conservative => RiskLimitConfig {
                max_position_size: 0.05,
                max_sector_exposure: 0.20,
                max_asset_class_exposure: 0.40,
                max_leverage: 1.0,
                max_concentration: 0.15,
                max_correlation: 0.70,
                max_volatility: 0.20,
                max_var_95: 0.03,
                max_var_99: 0.06,
            },
            RiskProfile::Moderate => RiskLimitConfig::default(),
            RiskProfile::Aggressive => RiskLimitConfig {
                max_position_size: 0.20,
                max_sector_exposure: 0.45,
                max_asset_class_exposure: 0.80,
                max_leverage: 2.0,
                max_concentration: 0.40,
                max_correlation: 0.90,
                max_volatility: 0.60,
                max_var_95: 0.08,
                max_var_99: 0.15,
            },
        }
    }

    /// Full configuration for the profile
    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            risk_limits: self.risk_limits(),
            ..EngineConfig::default()
        };
        match self {
            RiskProfile::Conservative => {
                config.risk.stress.max_acceptable_loss = 0.10;
                config.rebalance.threshold = 0.03;
                config.rebalance.calm_threshold = 0.03;
            }
            RiskProfile::Moderate => {}
            RiskProfile::Aggressive => {
                config.risk.stress.max_acceptable_loss = 0.35;
                config.rebalance.threshold = 0.08;
                config.rebalance.calm_threshold = 0.08;
                config.rebalance.volatile_threshold = 0.12;
                config.rebalance.risky_threshold = 0.15;
            }
        }
        debug!(profile = %self, "risk profile applied");
        config
    }
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RiskProfile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownProfile(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_profile_is_valid() {
        for profile in RiskProfile::ALL {
            assert!(profile.config().validate().is_ok(), "{} invalid", profile);
        }
    }

    #[test]
    fn test_profiles_are_ordered_by_appetite() {
        let conservative = RiskProfile::Conservative.risk_limits();
        let moderate = RiskProfile::Moderate.risk_limits();
        let aggressive = RiskProfile::Aggressive.risk_limits();

        for (c, m, a) in conservative
            .to_map()
            .values()
            .zip(moderate.to_map().values())
            .zip(aggressive.to_map().values())
            .map(|((c, m), a)| (c, m, a))
        {
            assert!(c <= m && m <= a);
        }
    }

    #[test]
    fn test_profile_from_str() {
        assert_eq!("Aggressive".parse::<RiskProfile>().unwrap(), RiskProfile::Aggressive);
        assert!(matches!("yolo".parse::<RiskProfile>(), Err(ConfigError::UnknownProfile(_))));
    }
}
