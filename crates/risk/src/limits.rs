//! Risk limit checking
//!
//! Compares a snapshot and its computed metrics to a [`RiskLimitConfig`]. Breaches are
//! returned as data. The checker holds no state, so repeated checks of the same
//! snapshot give identical results.

use std::fmt;

use pocket_hedge_core::{PortfolioSnapshot, RiskLimitConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics::RiskMetrics;

/// Limit categories, in the order they are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    PositionSize,
    SectorExposure,
    AssetClassExposure,
    Leverage,
    Concentration,
    Correlation,
    Volatility,
    Var95,
    Var99,
}

impl LimitType {
    /// Key of the corresponding threshold in the limit table
    pub fn config_key(&self) -> &'static str {
        match self {
            LimitType::PositionSize => "max_position_size",
            LimitType::SectorExposure => "max_sector_exposure",
            LimitType::AssetClassExposure => "max_asset_class_exposure",
            LimitType::Leverage => "max_leverage",
            LimitType::Concentration => "max_concentration",
            LimitType::Correlation => "max_correlation",
            LimitType::Volatility => "max_volatility",
            LimitType::Var95 => "max_var_95",
            LimitType::Var99 => "max_var_99",
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LimitType::PositionSize => "position size",
            LimitType::SectorExposure => "sector exposure",
            LimitType::AssetClassExposure => "asset class exposure",
            LimitType::Leverage => "leverage",
            LimitType::Concentration => "concentration",
            LimitType::Correlation => "correlation",
            LimitType::Volatility => "volatility",
            LimitType::Var95 => "VaR 95%",
            LimitType::Var99 => "VaR 99%",
        };
        write!(f, "{}", name)
    }
}

/// Breach severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Below the limit
    Low = 0,
    /// Up to 1.5x the limit
    Medium = 1,
    /// Above 1.5x the limit
    High = 2,
    /// Leverage above 1.5x the limit
    Critical = 3,
}

impl Severity {
    /// Tier a breach by how far `current` exceeds `limit`
    pub fn classify(limit_type: LimitType, current: f64, limit: f64) -> Self {
        if current <= limit {
            return Severity::Low;
        }
        let far_over = current > limit * SEVERE_MULTIPLE;
        match (limit_type, far_over) {
            (LimitType::Leverage, true) => Severity::Critical,
            (LimitType::Leverage, false) => Severity::High,
            (_, true) => Severity::High,
            (_, false) => Severity::Medium,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", name)
    }
}

/// Ratio of current value to limit above which a breach is severe
const SEVERE_MULTIPLE: f64 = 1.5;

/// One limit assessment. Values are fractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimit {
    /// Limit category
    pub limit_type: LimitType,

    /// Position or sector or asset class the limit applies to
    pub subject: Option<String>,

    /// Configured threshold
    pub limit_value: f64,

    /// Observed value
    pub current_value: f64,

    /// Whether the threshold is exceeded
    pub is_breached: bool,

    /// Breach severity
    pub severity: Severity,

    /// Human readable summary
    pub message: String,
}

impl RiskLimit {
    fn assess(limit_type: LimitType, subject: Option<String>, current_value: f64, limit_value: f64) -> Self {
        let is_breached = current_value > limit_value;
        let severity = Severity::classify(limit_type, current_value, limit_value);
        let target = subject
            .as_deref()
            .map(|s| format!("{} {}", limit_type, s))
            .unwrap_or_else(|| limit_type.to_string());
        let message = format!(
            "{} at {:.2}% against limit {:.2}%",
            target,
            current_value * 100.0,
            limit_value * 100.0
        );

        Self {
            limit_type,
            subject,
            limit_value,
            current_value,
            is_breached,
            severity,
            message,
        }
    }
}

/// Risk limit checker
#[derive(Debug, Clone, Default)]
pub struct RiskLimitChecker;

impl RiskLimitChecker {
    /// Create a new checker
    pub fn new() -> Self {
        Self
    }

    /// Breaches of the limits carried by the snapshot
    pub fn check(&self, snapshot: &PortfolioSnapshot, metrics: &RiskMetrics) -> Vec<RiskLimit> {
        self.check_with(snapshot, metrics, &snapshot.risk_limits)
    }

    /// Breaches of an explicit limit table
    pub fn check_with(
        &self,
        snapshot: &PortfolioSnapshot,
        metrics: &RiskMetrics,
        limits: &RiskLimitConfig,
    ) -> Vec<RiskLimit> {
        let breaches: Vec<RiskLimit> = self
            .assess_all(snapshot, metrics, limits)
            .into_iter()
            .filter(|l| l.is_breached)
            .collect();

        for breach in &breaches {
            warn!(
                portfolio_id = %snapshot.portfolio_id,
                limit = %breach.limit_type,
                subject = breach.subject.as_deref().unwrap_or(""),
                current = breach.current_value,
                limit_value = breach.limit_value,
                severity = %breach.severity,
                "risk limit breached"
            );
        }
        debug!(portfolio_id = %snapshot.portfolio_id, breaches = breaches.len(), "risk limits checked");
        breaches
    }

    /// Assessment of every limit, breached or not
    pub fn assess_all(
        &self,
        snapshot: &PortfolioSnapshot,
        metrics: &RiskMetrics,
        limits: &RiskLimitConfig,
    ) -> Vec<RiskLimit> {
        let mut assessments = Vec::new();

        for (asset_id, weight) in snapshot.weights() {
            assessments.push(RiskLimit::assess(
                LimitType::PositionSize,
                Some(asset_id),
                weight / 100.0,
                limits.max_position_size,
            ));
        }

        for (sector, weight) in snapshot.sector_allocation() {
            assessments.push(RiskLimit::assess(
                LimitType::SectorExposure,
                Some(sector),
                weight / 100.0,
                limits.max_sector_exposure,
            ));
        }

        for (asset_type, weight) in snapshot.asset_allocation() {
            assessments.push(RiskLimit::assess(
                LimitType::AssetClassExposure,
                Some(asset_type.to_string()),
                weight / 100.0,
                limits.max_asset_class_exposure,
            ));
        }

        let portfolio_wide = [
            (LimitType::Leverage, snapshot.leverage(), limits.max_leverage),
            (LimitType::Concentration, metrics.herfindahl_index, limits.max_concentration),
            (LimitType::Correlation, metrics.average_correlation, limits.max_correlation),
            (LimitType::Volatility, metrics.volatility / 100.0, limits.max_volatility),
            (LimitType::Var95, metrics.var_95.abs() / 100.0, limits.max_var_95),
            (LimitType::Var99, metrics.var_99.abs() / 100.0, limits.max_var_99),
        ];
        for (limit_type, current, limit) in portfolio_wide {
            assessments.push(RiskLimit::assess(limit_type, None, current, limit));
        }

        assessments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pocket_hedge_core::{Asset, AssetType, Position, PositionType};

    fn position(id: &str, sector: &str, value: f64) -> Position {
        let asset = Asset::new(id, id, AssetType::Stock).with_sector(sector);
        Position::open("pf", asset, value, 1.0, PositionType::Long).unwrap()
    }

    fn tech_heavy_snapshot() -> PortfolioSnapshot {
        let positions = vec![
            position("AAPL", "Tech", 50.0),
            position("MSFT", "Tech", 30.0),
            position("XOM", "Energy", 20.0),
        ];
        PortfolioSnapshot::from_positions("pf", &positions)
    }

    /// Limits loose enough that only the sector limit can trip
    fn sector_only_limits(max_sector_exposure: f64) -> RiskLimitConfig {
        RiskLimitConfig {
            max_position_size: 1.0,
            max_sector_exposure,
            max_asset_class_exposure: 1.0,
            max_concentration: 1.0,
            ..RiskLimitConfig::default()
        }
    }

    #[test]
    fn test_single_sector_breach() {
        let snapshot = tech_heavy_snapshot();
        let metrics = RiskMetrics::empty("pf");

        let breaches = RiskLimitChecker::new().check_with(&snapshot, &metrics, &sector_only_limits(0.30));

        assert_eq!(breaches.len(), 1);
        let breach = &breaches[0];
        assert_eq!(breach.limit_type, LimitType::SectorExposure);
        assert_eq!(breach.subject.as_deref(), Some("Tech"));
        assert!((breach.current_value - 0.80).abs() < 1e-9);
        assert_eq!(breach.limit_value, 0.30);
        assert_eq!(breach.severity, Severity::High);
    }

    #[test]
    fn test_check_is_idempotent() {
        let snapshot = tech_heavy_snapshot().with_risk_limits(RiskLimitConfig::default());
        let metrics = RiskMetrics::empty("pf");
        let checker = RiskLimitChecker::new();

        let first = checker.check(&snapshot, &metrics);
        let second = checker.check(&snapshot, &metrics);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_default_limits_flag_every_oversized_position() {
        let snapshot = tech_heavy_snapshot();
        let metrics = RiskMetrics::empty("pf");

        let breaches = RiskLimitChecker::new().check(&snapshot, &metrics);
        let oversized = breaches
            .iter()
            .filter(|b| b.limit_type == LimitType::PositionSize)
            .count();
        assert_eq!(oversized, 3);
    }

    #[test]
    fn test_market_neutral_book_breaches_leverage() {
        let long = position("AAPL", "Tech", 100.0);
        let asset = Asset::new("MSFT", "MSFT", AssetType::Stock).with_sector("Tech");
        let short = Position::open("pf", asset, 100.0, 1.0, PositionType::Short).unwrap();
        let snapshot = PortfolioSnapshot::from_positions("pf", &vec![long, short]);
        let metrics = RiskMetrics::empty("pf");
        let checker = RiskLimitChecker::new();

        let breaches = checker.check_with(&snapshot, &metrics, &sector_only_limits(1.0));
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].limit_type, LimitType::Leverage);
        assert!((breaches[0].current_value - 2.0).abs() < 1e-9);
        assert_eq!(breaches[0].severity, Severity::High);

        let funded = snapshot.with_capital(400.0);
        assert!(checker.check_with(&funded, &metrics, &sector_only_limits(1.0)).is_empty());
    }

    #[test]
    fn test_severity_tiers() {
        assert_eq!(Severity::classify(LimitType::SectorExposure, 0.2, 0.3), Severity::Low);
        assert_eq!(Severity::classify(LimitType::SectorExposure, 0.4, 0.3), Severity::Medium);
        assert_eq!(Severity::classify(LimitType::SectorExposure, 0.5, 0.3), Severity::High);
        assert_eq!(Severity::classify(LimitType::Leverage, 2.0, 1.5), Severity::High);
        assert_eq!(Severity::classify(LimitType::Leverage, 2.5, 1.5), Severity::Critical);
        assert!(Severity::Critical > Severity::Medium);
    }

    #[test]
    fn test_var_limits_compare_magnitudes() {
        let snapshot = tech_heavy_snapshot();
        let mut metrics = RiskMetrics::empty("pf");
        metrics.var_95 = -6.0;
        metrics.var_99 = -9.0;

        let breaches = RiskLimitChecker::new().check_with(&snapshot, &metrics, &sector_only_limits(1.0));
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].limit_type, LimitType::Var95);
        assert!((breaches[0].current_value - 0.06).abs() < 1e-12);
        assert_eq!(breaches[0].severity, Severity::Medium);
    }

    #[test]
    fn test_checker_does_not_mutate_snapshot() {
        let snapshot = tech_heavy_snapshot();
        let before = snapshot.clone();
        let _ = RiskLimitChecker::new().check(&snapshot, &RiskMetrics::empty("pf"));
        assert_eq!(snapshot, before);
    }
}
