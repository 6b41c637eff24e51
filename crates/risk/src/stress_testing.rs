//! Stress testing module for the pocket hedge fund
//!
//! This module applies deterministic shock scenarios to a portfolio snapshot and
//! estimates the resulting loss, tail impact and affected positions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use pocket_hedge_core::{AssetType, PortfolioSnapshot, PositionSnapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calculator::RiskCalculator;
use crate::history::ReturnModel;
use crate::monte_carlo::{MonteCarloConfig, MonteCarloResult, MonteCarloSimulator};
use crate::{RiskError, RiskResult};

/// Stress test configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressTestConfig {
    /// Loss, as a fraction of portfolio value, above which a scenario fails
    pub max_acceptable_loss: f64,

    /// Currency the currency-crisis scenario treats as domestic
    pub base_currency: String,

    /// Confidence used for the historical VaR baseline
    pub var_confidence: f64,
}

impl Default for StressTestConfig {
    fn default() -> Self {
        Self {
            max_acceptable_loss: 0.20,
            base_currency: "USD".to_string(),
            var_confidence: 0.95,
        }
    }
}

/// Which positions a custom shock applies to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ShockFilter {
    /// Every position
    All,
    /// Positions of one asset class
    AssetType(AssetType),
    /// Positions in one sector
    Sector(String),
    /// Positions quoted in one currency
    Currency(String),
    /// Explicit asset ids
    Assets(Vec<String>),
}

impl ShockFilter {
    fn matches(&self, position: &PositionSnapshot) -> bool {
        match self {
            ShockFilter::All => true,
            ShockFilter::AssetType(asset_type) => position.asset_type == *asset_type,
            ShockFilter::Sector(sector) => position.sector_name() == sector.as_str(),
            ShockFilter::Currency(currency) => position.currency.eq_ignore_ascii_case(currency),
            ShockFilter::Assets(ids) => ids.iter().any(|id| *id == position.asset_id),
        }
    }
}

/// A price shock applied to the positions matching a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShockRule {
    /// Positions affected
    pub filter: ShockFilter,

    /// Fractional price change, e.g. -0.2 for a 20% drop
    pub shock: f64,
}

/// Caller supplied scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomScenario {
    /// Scenario name
    pub name: String,

    /// Scenario description
    #[serde(default)]
    pub description: String,

    /// Shock rules. The first matching rule applies to a position.
    pub shocks: Vec<ShockRule>,

    /// Recommendations reported with the result
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl CustomScenario {
    /// Reject scenarios that cannot be evaluated
    pub fn validate(&self) -> RiskResult<()> {
        if self.name.trim().is_empty() {
            return Err(RiskError::InvalidScenario("custom scenario needs a name".to_string()));
        }
        if self.shocks.is_empty() {
            return Err(RiskError::InvalidScenario(format!(
                "custom scenario '{}' has no shocks",
                self.name
            )));
        }
        if let Some(rule) = self.shocks.iter().find(|r| !r.shock.is_finite() || r.shock < -1.0) {
            return Err(RiskError::InvalidScenario(format!(
                "custom scenario '{}' has invalid shock {}",
                self.name, rule.shock
            )));
        }
        Ok(())
    }
}

/// Stress scenarios with their shock parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StressScenario {
    /// Equity and crypto crash
    MarketCrash { shock: f64 },

    /// Parallel yield shift repriced through duration
    InterestRateShock { rate_change_bps: f64, duration: f64 },

    /// Devaluation of every non-base currency
    CurrencyCrisis { shock: f64 },

    /// Collapse of one sector, the largest one when unset
    SectorCollapse { sector: Option<String>, shock: f64 },

    /// Haircut on illiquid asset classes
    LiquidityCrisis { haircut: f64 },

    /// Volatility multiplier applied to a base move on every risky position
    VolatilitySpike { multiplier: f64, base_shock: f64 },

    /// Caller supplied scenario
    Custom(CustomScenario),
}

impl StressScenario {
    /// Names accepted by [`FromStr`]
    pub const STANDARD_NAMES: [&'static str; 6] = [
        "market_crash",
        "interest_rate_shock",
        "currency_crisis",
        "sector_collapse",
        "liquidity_crisis",
        "volatility_spike",
    ];

    pub fn market_crash() -> Self {
        StressScenario::MarketCrash { shock: -0.50 }
    }

    pub fn interest_rate_shock() -> Self {
        StressScenario::InterestRateShock {
            rate_change_bps: 300.0,
            duration: 5.0,
        }
    }

    pub fn currency_crisis() -> Self {
        StressScenario::CurrencyCrisis { shock: -0.30 }
    }

    pub fn sector_collapse(sector: Option<String>) -> Self {
        StressScenario::SectorCollapse { sector, shock: -0.40 }
    }

    pub fn liquidity_crisis() -> Self {
        StressScenario::LiquidityCrisis { haircut: -0.25 }
    }

    pub fn volatility_spike() -> Self {
        StressScenario::VolatilitySpike {
            multiplier: 3.0,
            base_shock: 0.05,
        }
    }

    /// The six built-in scenarios with default parameters
    pub fn standard_set() -> Vec<StressScenario> {
        vec![
            Self::market_crash(),
            Self::interest_rate_shock(),
            Self::currency_crisis(),
            Self::sector_collapse(None),
            Self::liquidity_crisis(),
            Self::volatility_spike(),
        ]
    }

    /// Scenario name used as the result key
    pub fn name(&self) -> &str {
        match self {
            StressScenario::MarketCrash { .. } => "market_crash",
            StressScenario::InterestRateShock { .. } => "interest_rate_shock",
            StressScenario::CurrencyCrisis { .. } => "currency_crisis",
            StressScenario::SectorCollapse { .. } => "sector_collapse",
            StressScenario::LiquidityCrisis { .. } => "liquidity_crisis",
            StressScenario::VolatilitySpike { .. } => "volatility_spike",
            StressScenario::Custom(custom) => &custom.name,
        }
    }

    /// Scenario description
    pub fn description(&self) -> String {
        match self {
            StressScenario::MarketCrash { shock } => {
                format!("Equity and crypto prices move {:.0}%", shock * 100.0)
            }
            StressScenario::InterestRateShock { rate_change_bps, duration } => format!(
                "Rates rise {:.0}bps, bonds reprice with duration {:.1}",
                rate_change_bps, duration
            ),
            StressScenario::CurrencyCrisis { shock } => {
                format!("Non-base currency exposure moves {:.0}%", shock * 100.0)
            }
            StressScenario::SectorCollapse { sector, shock } => format!(
                "Sector {} moves {:.0}%",
                sector.as_deref().unwrap_or("with the largest allocation"),
                shock * 100.0
            ),
            StressScenario::LiquidityCrisis { haircut } => {
                format!("Illiquid holdings marked down {:.0}%", haircut.abs() * 100.0)
            }
            StressScenario::VolatilitySpike { multiplier, base_shock } => format!(
                "Volatility rises {:.1}x, risky assets move -{:.0}%",
                multiplier,
                multiplier * base_shock * 100.0
            ),
            StressScenario::Custom(custom) => custom.description.clone(),
        }
    }

    /// Recommendations reported with every result of this scenario
    pub fn recommendations(&self) -> Vec<String> {
        let fixed: &[&str] = match self {
            StressScenario::MarketCrash { .. } => &[
                "Reduce equity and crypto exposure",
                "Add hedges such as index puts",
                "Increase allocation to defensive assets and cash",
            ],
            StressScenario::InterestRateShock { .. } => &[
                "Shorten bond portfolio duration",
                "Consider floating rate instruments",
                "Review rate sensitive sectors",
            ],
            StressScenario::CurrencyCrisis { .. } => &[
                "Hedge foreign currency exposure",
                "Reduce positions in vulnerable currencies",
            ],
            StressScenario::SectorCollapse { .. } => &[
                "Diversify across sectors",
                "Cap single sector exposure",
                "Rotate part of the concentrated sector into uncorrelated assets",
            ],
            StressScenario::LiquidityCrisis { .. } => &[
                "Maintain a cash buffer",
                "Reduce positions in illiquid assets",
                "Stagger exits to limit market impact",
            ],
            StressScenario::VolatilitySpike { .. } => &[
                "Reduce position sizes",
                "Tighten stop-loss levels",
                "Consider volatility hedges",
            ],
            StressScenario::Custom(custom) => {
                return if custom.recommendations.is_empty() {
                    vec!["Review exposures affected by the custom scenario".to_string()]
                } else {
                    custom.recommendations.clone()
                };
            }
        };
        fixed.iter().map(|s| s.to_string()).collect()
    }

    /// Price shock for one position, `None` if it is unaffected.
    /// `target_sector` is the resolved sector for sector collapse.
    fn shock_for(&self, position: &PositionSnapshot, base_currency: &str, target_sector: Option<&str>) -> Option<f64> {
        match self {
            StressScenario::MarketCrash { shock } => {
                matches!(position.asset_type, AssetType::Stock | AssetType::Crypto).then_some(*shock)
            }
            StressScenario::InterestRateShock { rate_change_bps, duration } => (position.asset_type
                == AssetType::Bond)
                .then_some(-duration * rate_change_bps / 10_000.0),
            StressScenario::CurrencyCrisis { shock } => {
                (!position.currency.eq_ignore_ascii_case(base_currency)).then_some(*shock)
            }
            StressScenario::SectorCollapse { shock, .. } => {
                target_sector.filter(|s| *s == position.sector_name()).map(|_| *shock)
            }
            StressScenario::LiquidityCrisis { haircut } => matches!(
                position.asset_type,
                AssetType::Crypto | AssetType::Commodity | AssetType::Derivative | AssetType::RealEstate
            )
            .then_some(*haircut),
            StressScenario::VolatilitySpike { multiplier, base_shock } => {
                (position.asset_type != AssetType::Cash).then_some(-multiplier * base_shock)
            }
            StressScenario::Custom(custom) => custom
                .shocks
                .iter()
                .find(|rule| rule.filter.matches(position))
                .map(|rule| rule.shock),
        }
    }
}

impl fmt::Display for StressScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for StressScenario {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market_crash" => Ok(Self::market_crash()),
            "interest_rate_shock" => Ok(Self::interest_rate_shock()),
            "currency_crisis" => Ok(Self::currency_crisis()),
            "sector_collapse" => Ok(Self::sector_collapse(None)),
            "liquidity_crisis" => Ok(Self::liquidity_crisis()),
            "volatility_spike" => Ok(Self::volatility_spike()),
            other => Err(RiskError::UnknownScenario(other.to_string())),
        }
    }
}

/// Shock applied to one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionImpact {
    /// Asset identifier
    pub asset_id: String,

    /// Market value before the shock
    pub market_value: f64,

    /// Fractional price change applied
    pub shock: f64,

    /// Signed P&L from the shock (negative is a loss)
    pub pnl: f64,
}

/// Stress test result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressTestResult {
    /// Scenario name
    pub scenario_name: String,

    /// Scenario description
    pub description: String,

    /// Estimated loss in currency units, positive for losses
    pub estimated_loss: f64,

    /// Estimated loss as a percentage of portfolio value
    pub loss_percentage: f64,

    /// Portfolio value after the shock
    pub stressed_value: f64,

    /// Historical 95% VaR shifted by the scenario loss, in percent (negative for losses)
    pub var_impact: f64,

    /// Historical maximum drawdown compounded with the scenario loss, in percent
    pub drawdown_impact: f64,

    /// Asset ids hit by the scenario
    pub affected_positions: Vec<String>,

    /// Per-position detail
    pub position_impacts: Vec<PositionImpact>,

    /// Recommended actions
    pub recommendations: Vec<String>,

    /// Whether the loss stays within the acceptable limit
    pub passed: bool,

    /// When the test ran
    pub timestamp: DateTime<Utc>,
}

/// Stress tester
pub struct StressTester {
    /// Configuration
    config: StressTestConfig,

    /// Baseline tail and drawdown figures
    calculator: RiskCalculator,
}

impl StressTester {
    /// Create a new stress tester
    pub fn new(config: StressTestConfig, calculator: RiskCalculator) -> Self {
        Self { config, calculator }
    }

    /// Configuration
    pub fn config(&self) -> &StressTestConfig {
        &self.config
    }

    /// Run one scenario. Only invalid custom scenarios fail.
    pub fn run(
        &self,
        snapshot: &PortfolioSnapshot,
        scenario: &StressScenario,
        returns: Option<&[f64]>,
    ) -> RiskResult<StressTestResult> {
        if let StressScenario::Custom(custom) = scenario {
            custom.validate()?;
        }

        let target_sector = match scenario {
            StressScenario::SectorCollapse { sector: Some(sector), .. } => Some(sector.clone()),
            StressScenario::SectorCollapse { sector: None, .. } => largest_sector(snapshot),
            _ => None,
        };

        let position_impacts: Vec<PositionImpact> = snapshot
            .positions
            .iter()
            .filter_map(|position| {
                scenario
                    .shock_for(position, &self.config.base_currency, target_sector.as_deref())
                    .map(|shock| PositionImpact {
                        asset_id: position.asset_id.clone(),
                        market_value: position.market_value,
                        shock,
                        pnl: position.net_exposure() * shock,
                    })
            })
            .collect();

        let total_value = snapshot.total_value;
        let estimated_loss = -position_impacts.iter().map(|i| i.pnl).sum::<f64>();
        let loss_fraction = if total_value > 0.0 {
            estimated_loss / total_value
        } else {
            0.0
        };

        let (base_var, base_drawdown) = match returns {
            Some(returns) => (
                self.calculator.value_at_risk(returns, self.config.var_confidence),
                self.calculator.max_drawdown(returns),
            ),
            None => (0.0, 0.0),
        };

        let description = match (scenario, &target_sector) {
            (StressScenario::SectorCollapse { shock, .. }, Some(sector)) => {
                format!("Sector {} moves {:.0}%", sector, shock * 100.0)
            }
            _ => scenario.description(),
        };

        let result = StressTestResult {
            scenario_name: scenario.name().to_string(),
            description,
            estimated_loss,
            loss_percentage: loss_fraction * 100.0,
            stressed_value: total_value - estimated_loss,
            var_impact: base_var - loss_fraction * 100.0,
            drawdown_impact: ((1.0 + base_drawdown) * (1.0 - loss_fraction) - 1.0) * 100.0,
            affected_positions: position_impacts.iter().map(|i| i.asset_id.clone()).collect(),
            position_impacts,
            recommendations: scenario.recommendations(),
            passed: loss_fraction <= self.config.max_acceptable_loss,
            timestamp: Utc::now(),
        };

        debug!(
            scenario = %result.scenario_name,
            estimated_loss = result.estimated_loss,
            affected = result.affected_positions.len(),
            passed = result.passed,
            "stress scenario evaluated"
        );
        Ok(result)
    }

    /// Run several scenarios keyed by name. Invalid scenarios are logged and skipped.
    pub fn run_all(
        &self,
        snapshot: &PortfolioSnapshot,
        scenarios: &[StressScenario],
        returns: Option<&[f64]>,
    ) -> BTreeMap<String, StressTestResult> {
        let mut results = BTreeMap::new();
        for scenario in scenarios {
            match self.run(snapshot, scenario, returns) {
                Ok(result) => {
                    results.insert(result.scenario_name.clone(), result);
                }
                Err(e) => warn!(scenario = %scenario, error = %e, "stress scenario skipped"),
            }
        }

        let failed = results.values().filter(|r| !r.passed).count();
        info!(
            portfolio_id = %snapshot.portfolio_id,
            scenarios = results.len(),
            failed,
            "stress tests completed"
        );
        results
    }

    /// Run the six built-in scenarios
    pub fn run_standard(
        &self,
        snapshot: &PortfolioSnapshot,
        returns: Option<&[f64]>,
    ) -> BTreeMap<String, StressTestResult> {
        self.run_all(snapshot, &StressScenario::standard_set(), returns)
    }

    /// Simulated stress: sample the return model instead of applying fixed shocks
    pub fn monte_carlo(
        &self,
        snapshot: &PortfolioSnapshot,
        model: Option<&ReturnModel>,
        config: &MonteCarloConfig,
    ) -> MonteCarloResult {
        MonteCarloSimulator::new(config.clone()).simulate(snapshot, model)
    }
}

impl Default for StressTester {
    fn default() -> Self {
        Self::new(StressTestConfig::default(), RiskCalculator::default())
    }
}

/// Sector with the largest allocation; the first in name order on ties
fn largest_sector(snapshot: &PortfolioSnapshot) -> Option<String> {
    let mut largest: Option<(String, f64)> = None;
    for (sector, weight) in snapshot.sector_allocation() {
        if largest.as_ref().map_or(true, |(_, w)| weight > *w) {
            largest = Some((sector, weight));
        }
    }
    largest.map(|(sector, _)| sector)
}
