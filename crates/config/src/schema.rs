//! Configuration schema definitions
//!
//! This module defines the composed configuration of the pocket hedge fund engine.
//! Every section has serde defaults, so a file only needs the keys it overrides.

use pocket_hedge_core::RiskLimitConfig;
use pocket_hedge_logging::LoggingConfig;
use pocket_hedge_rebalancing::{OptimizerConfig, RebalanceConfig};
use pocket_hedge_risk::RiskConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Risk limit table applied to snapshots
    pub risk_limits: RiskLimitConfig,

    /// Risk calculator, stress testing and Monte Carlo settings
    pub risk: RiskConfig,

    /// Rebalance planner settings
    pub rebalance: RebalanceConfig,

    /// Optimizer settings
    pub optimizer: OptimizerConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Validate every section
    pub fn validate(&self) -> ConfigResult<()> {
        self.risk_limits.validate().map_err(invalid)?;
        self.rebalance.validate().map_err(invalid)?;
        self.optimizer.validate().map_err(invalid)?;

        let calculator = &self.risk.calculator;
        for (name, value) in [
            ("risk.calculator.confidence_95", calculator.confidence_95),
            ("risk.calculator.confidence_99", calculator.confidence_99),
            ("risk.stress.var_confidence", self.risk.stress.var_confidence),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be in (0, 1), got {}",
                    name, value
                )));
            }
        }
        if !(calculator.periods_per_year > 0.0) {
            return Err(ConfigError::Invalid(
                "risk.calculator.periods_per_year must be positive".to_string(),
            ));
        }

        let loss = self.risk.stress.max_acceptable_loss;
        if !(loss > 0.0 && loss <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "risk.stress.max_acceptable_loss must be in (0, 1], got {}",
                loss
            )));
        }
        if self.risk.stress.base_currency.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "risk.stress.base_currency cannot be empty".to_string(),
            ));
        }

        let monte_carlo = &self.risk.monte_carlo;
        if monte_carlo.num_simulations == 0 || monte_carlo.max_simulations == 0 {
            return Err(ConfigError::Invalid(
                "Monte Carlo simulation counts must be greater than 0".to_string(),
            ));
        }
        if monte_carlo.horizon_days == 0 {
            return Err(ConfigError::Invalid(
                "Monte Carlo horizon must be at least one period".to_string(),
            ));
        }
        if monte_carlo.time_budget_ms == 0 {
            return Err(ConfigError::Invalid(
                "Monte Carlo time budget must be greater than 0".to_string(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid("Log level cannot be empty".to_string()));
        }

        Ok(())
    }
}

fn invalid(e: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.risk_limits.max_position_size, 0.10);
        assert_eq!(config.rebalance.threshold, 0.05);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "risk_limits:\n  max_sector_exposure: 0.4\nrisk:\n  monte_carlo:\n    seed: 7\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.risk_limits.max_sector_exposure, 0.4);
        assert_eq!(config.risk_limits.max_position_size, 0.10);
        assert_eq!(config.risk.monte_carlo.seed, Some(7));
        assert_eq!(config.risk.monte_carlo.num_simulations, 10_000);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = EngineConfig::default();
        config.risk.monte_carlo.num_simulations = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EngineConfig::default();
        config.risk.calculator.confidence_99 = 1.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.risk_limits.max_leverage = -1.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.optimizer.max_iterations = 0;
        assert!(config.validate().is_err());
    }
}
