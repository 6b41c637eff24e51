//! Portfolio input files
//!
//! A portfolio file lists positions plus whatever history is available. JSON and YAML
//! are accepted, picked by extension.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use pocket_hedge_config::EngineConfig;
use pocket_hedge_core::{Asset, AssetType, Portfolio, PortfolioSnapshot, Position, PositionType};
use pocket_hedge_risk::{ReturnModel, StressScenario};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

/// One holding
#[derive(Debug, Clone, Deserialize)]
pub struct PositionInput {
    pub asset_id: String,
    #[serde(default)]
    pub symbol: Option<String>,
    pub asset_type: AssetType,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default = "default_position_type")]
    pub position_type: PositionType,
    pub quantity: f64,
    /// Current price
    pub price: f64,
    /// Entry price, defaults to the current price
    #[serde(default)]
    pub entry_price: Option<f64>,
}

fn default_position_type() -> PositionType {
    PositionType::Long
}

/// Portfolio file contents
#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioInput {
    pub portfolio_id: String,
    pub positions: Vec<PositionInput>,

    /// Capital financing the positions, the base for leverage
    #[serde(default)]
    pub capital: Option<f64>,

    /// Periodic portfolio returns, oldest first
    #[serde(default)]
    pub returns: Vec<f64>,

    #[serde(default)]
    pub benchmark: Option<Vec<f64>>,

    /// Periodic returns per asset, oldest first
    #[serde(default)]
    pub asset_returns: BTreeMap<String, Vec<f64>>,

    /// Periods of asset history used for the return model
    #[serde(default)]
    pub lookback: Option<usize>,

    /// Target allocation, fractions per asset
    #[serde(default)]
    pub target_weights: Option<BTreeMap<String, f64>>,

    /// Rebalancing cadence, defaults to the configured frequency
    #[serde(default)]
    pub rebalance_frequency_days: Option<i64>,

    #[serde(default)]
    pub last_rebalanced_at: Option<DateTime<Utc>>,

    /// Shorthand for `last_rebalanced_at`, counted back from now
    #[serde(default)]
    pub days_since_last_rebalance: Option<i64>,
}

impl PortfolioInput {
    /// Open the positions and freeze them with the configured limits and cadence
    pub fn snapshot(&self, config: &EngineConfig) -> Result<PortfolioSnapshot> {
        let mut portfolio = Portfolio::new(self.portfolio_id.clone(), self.capital.unwrap_or(0.0))
            .with_risk_limits(config.risk_limits.clone())
            .with_rebalance_frequency(
                self.rebalance_frequency_days
                    .unwrap_or(config.rebalance.frequency_days),
            );
        portfolio.id = self.portfolio_id.clone();
        let last_rebalanced_at = self
            .last_rebalanced_at
            .or_else(|| self.days_since_last_rebalance.map(|days| Utc::now() - Duration::days(days)));
        if let Some(at) = last_rebalanced_at {
            portfolio.mark_rebalanced(at);
        }

        for input in &self.positions {
            let mut asset = Asset::new(
                input.asset_id.clone(),
                input.symbol.clone().unwrap_or_else(|| input.asset_id.clone()),
                input.asset_type,
            );
            if let Some(sector) = &input.sector {
                asset = asset.with_sector(sector.clone());
            }
            if let Some(currency) = &input.currency {
                asset = asset.with_currency(currency.clone());
            }

            let entry_price = input.entry_price.unwrap_or(input.price);
            let mut position = Position::open(
                self.portfolio_id.clone(),
                asset,
                input.quantity,
                entry_price,
                input.position_type,
            )
            .with_context(|| format!("invalid position {}", input.asset_id))?;
            if input.entry_price.is_some() {
                position
                    .update_price(input.price)
                    .with_context(|| format!("invalid price for {}", input.asset_id))?;
            }
            portfolio
                .add_position(position)
                .with_context(|| format!("cannot add position {}", input.asset_id))?;
        }

        let snapshot = portfolio.snapshot();
        debug!(
            positions = snapshot.positions.len(),
            total_value = snapshot.total_value,
            leverage = snapshot.leverage(),
            "portfolio snapshot built"
        );
        Ok(snapshot)
    }

    /// Asset ids in file order
    pub fn asset_ids(&self) -> Vec<String> {
        self.positions.iter().map(|p| p.asset_id.clone()).collect()
    }

    /// Return model over the positions, `None` without usable asset history
    pub fn return_model(&self) -> Option<ReturnModel> {
        if self.asset_returns.is_empty() {
            return None;
        }
        match ReturnModel::from_history(&self.asset_ids(), &self.asset_returns, self.lookback) {
            Ok(model) => Some(model),
            Err(e) => {
                warn!(error = %e, "asset history unusable, continuing without a return model");
                None
            }
        }
    }
}

/// Read a JSON or YAML file
pub fn read_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&contents).with_context(|| format!("Failed to parse YAML: {}", path.display()))
        }
        Some("json") | None => {
            serde_json::from_str(&contents).with_context(|| format!("Failed to parse JSON: {}", path.display()))
        }
        Some(other) => Err(anyhow!("Unsupported file format '{}': {}", other, path.display())),
    }
}

pub fn load_portfolio(path: &Path) -> Result<PortfolioInput> {
    read_file(path)
}

/// Scenarios by name, plus custom scenarios from a file
pub fn load_scenarios(names: &[String], custom: Option<&Path>) -> Result<Vec<StressScenario>> {
    let mut scenarios = names
        .iter()
        .map(|name| name.parse::<StressScenario>().map_err(anyhow::Error::from))
        .collect::<Result<Vec<_>>>()?;
    if let Some(path) = custom {
        let extra: Vec<StressScenario> = read_file(path)?;
        scenarios.extend(extra);
    }
    Ok(scenarios)
}
