//! Display utilities for rendering output

use anyhow::{Context, Result};
use clap::ValueEnum;
use console::style;
use pocket_hedge_config::RiskProfile;
use pocket_hedge_rebalancing::{ExecutionSummary, OptimizationResult, RebalancePlan};
use pocket_hedge_risk::{MonteCarloResult, RiskLimit, RiskMetrics, RiskReport, Severity, StressTestResult};
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

/// Output format for rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DisplayFormat {
    /// Text format (tables)
    #[default]
    Text,

    /// JSON format
    Json,

    /// YAML format
    Yaml,
}

/// Renderer for formatting output
pub struct Renderer {
    /// Output format
    format: DisplayFormat,
}

impl Renderer {
    /// Create a new renderer
    pub fn new(format: DisplayFormat) -> Self {
        Self { format }
    }

    /// Serialize in the structured formats, `None` for text
    fn structured<T: Serialize>(&self, value: &T) -> Result<Option<String>> {
        match self.format {
            DisplayFormat::Text => Ok(None),
            DisplayFormat::Json => serde_json::to_string_pretty(value)
                .map(Some)
                .context("Failed to serialize output to JSON"),
            DisplayFormat::Yaml => serde_yaml::to_string(value)
                .map(Some)
                .context("Failed to serialize output to YAML"),
        }
    }

    /// Render a complete risk report
    pub fn render_report(&self, report: &RiskReport) -> Result<()> {
        if let Some(output) = self.structured(report)? {
            println!("{}", output);
            return Ok(());
        }

        println!(
            "\n{} {}",
            style("Risk report for").bold(),
            style(&report.portfolio_id).cyan()
        );
        println!("{} {}", style("Generated:").bold(), report.generated_at.to_rfc3339());

        print_metrics(&report.metrics);
        print_breaches(&report.breaches);

        let results: Vec<&StressTestResult> = report.stress_results.values().collect();
        print_stress_table(&results);

        if let Some(monte_carlo) = &report.monte_carlo {
            print_monte_carlo(monte_carlo);
        }

        if !report.errors.is_empty() {
            println!("\n{}", style("Degraded components:").yellow().bold());
            for error in &report.errors {
                println!("  {}: {}", style(&error.component).bold(), error.message);
            }
        }
        Ok(())
    }

    /// Render stress test results
    pub fn render_stress(&self, results: &BTreeMap<String, StressTestResult>) -> Result<()> {
        if let Some(output) = self.structured(results)? {
            println!("{}", output);
            return Ok(());
        }

        let results: Vec<&StressTestResult> = results.values().collect();
        print_stress_table(&results);

        for result in results.iter().filter(|r| !r.recommendations.is_empty()) {
            println!("\n{}", style(&result.scenario_name).bold());
            for recommendation in &result.recommendations {
                println!("  - {}", recommendation);
            }
        }
        Ok(())
    }

    /// Render a Monte Carlo summary
    pub fn render_monte_carlo(&self, result: &MonteCarloResult) -> Result<()> {
        if let Some(output) = self.structured(result)? {
            println!("{}", output);
            return Ok(());
        }
        print_monte_carlo(result);
        Ok(())
    }

    /// Render optimized weights, one block per strategy
    pub fn render_optimizations(&self, results: &[OptimizationResult]) -> Result<()> {
        let structured = match results {
            [single] => self.structured(single)?,
            _ => self.structured(&results)?,
        };
        if let Some(output) = structured {
            println!("{}", output);
            return Ok(());
        }
        for result in results {
            print_optimization(result);
        }
        Ok(())
    }

    /// Render a rebalance plan
    pub fn render_plan(&self, plan: &RebalancePlan) -> Result<()> {
        if let Some(output) = self.structured(plan)? {
            println!("{}", output);
            return Ok(());
        }

        println!(
            "\n{} {} ({}, threshold {:.2}%)",
            style("Rebalance plan").bold(),
            style(&plan.id).cyan(),
            plan.strategy,
            plan.threshold * 100.0
        );

        if let Some(reason) = &plan.skipped_reason {
            println!("{} {}", style("Skipped:").yellow().bold(), reason);
            return Ok(());
        }
        if plan.is_empty() {
            println!("{}", style("Portfolio is within the drift threshold, no trades needed").green());
            return Ok(());
        }

        #[derive(Tabled)]
        struct ActionRow {
            #[tabled(rename = "#")]
            order: usize,
            #[tabled(rename = "Asset")]
            asset: String,
            #[tabled(rename = "Action")]
            action: String,
            #[tabled(rename = "Current")]
            current: String,
            #[tabled(rename = "Target")]
            target: String,
            #[tabled(rename = "Amount")]
            amount: String,
            #[tabled(rename = "Quantity")]
            quantity: String,
            #[tabled(rename = "Priority")]
            priority: u32,
            #[tabled(rename = "Status")]
            status: String,
        }

        let rows: Vec<ActionRow> = plan
            .actions
            .iter()
            .map(|a| ActionRow {
                order: a.execution_order,
                asset: a.asset_id.clone(),
                action: a.action_type.to_string(),
                current: format!("{:.2}%", a.current_weight * 100.0),
                target: format!("{:.2}%", a.target_weight * 100.0),
                amount: format!("{:.2}", a.required_trade_amount),
                quantity: if a.trade_quantity == 0.0 {
                    "-".to_string()
                } else {
                    format!("{:.6}", a.trade_quantity)
                },
                priority: a.priority,
                status: format!("{:?}", a.status),
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::modern()));

        println!(
            "{} {} buys, {} sells",
            style("Trades:").bold(),
            plan.buys().count(),
            plan.sells().count()
        );
        println!("{} {:.2}", style("Total traded:").bold(), plan.estimated_total_cost);
        println!("{} {:.2}", style("Estimated fees:").bold(), plan.estimated_fees);
        println!("{} {:.2}", style("Net cash flow:").bold(), plan.net_cash_flow);
        println!("{} {}", style("Status:").bold(), plan.status);
        Ok(())
    }

    /// Render the outcome of a simulated execution
    pub fn render_execution(&self, summary: &ExecutionSummary) -> Result<()> {
        if let Some(output) = self.structured(summary)? {
            println!("{}", output);
            return Ok(());
        }
        println!(
            "{} {} executed, {} failed, {:.2} fees paid ({})",
            style("Execution:").bold(),
            summary.executed,
            summary.failed,
            summary.fees_paid,
            summary.status
        );
        Ok(())
    }

    /// Render the available risk profiles
    pub fn render_profiles(&self) -> Result<()> {
        if self.format != DisplayFormat::Text {
            let profiles: BTreeMap<&str, _> = RiskProfile::ALL
                .iter()
                .map(|p| (p.as_str(), p.risk_limits()))
                .collect();
            if let Some(output) = self.structured(&profiles)? {
                println!("{}", output);
            }
            return Ok(());
        }

        #[derive(Tabled)]
        struct ProfileRow {
            #[tabled(rename = "Profile")]
            name: &'static str,
            #[tabled(rename = "Max Position")]
            position: String,
            #[tabled(rename = "Max Sector")]
            sector: String,
            #[tabled(rename = "Max Leverage")]
            leverage: String,
            #[tabled(rename = "Description")]
            description: &'static str,
        }

        let rows: Vec<ProfileRow> = RiskProfile::ALL
            .iter()
            .map(|p| {
                let limits = p.risk_limits();
                ProfileRow {
                    name: p.as_str(),
                    position: format!("{:.0}%", limits.max_position_size * 100.0),
                    sector: format!("{:.0}%", limits.max_sector_exposure * 100.0),
                    leverage: format!("{:.1}x", limits.max_leverage),
                    description: p.description(),
                }
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::modern()));
        Ok(())
    }
}

fn right_aligned(mut table: Table) -> Table {
    table
        .with(Style::modern())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()));
    table
}

fn print_optimization(result: &OptimizationResult) {
    #[derive(Tabled)]
    struct WeightRow {
        #[tabled(rename = "Asset")]
        asset: String,
        #[tabled(rename = "Weight")]
        weight: String,
    }

    println!("\n{} {}", style("Strategy:").bold(), style(result.strategy).cyan());
    let rows: Vec<WeightRow> = result
        .weights
        .iter()
        .map(|(asset, weight)| WeightRow {
            asset: asset.clone(),
            weight: format!("{:.2}%", weight * 100.0),
        })
        .collect();
    println!("{}", right_aligned(Table::new(rows)));

    println!("{} {:.2}%", style("Expected return:").bold(), result.expected_return * 100.0);
    println!("{} {:.2}%", style("Volatility:").bold(), result.volatility * 100.0);
    println!("{} {:.3}", style("Sharpe ratio:").bold(), result.sharpe_ratio);
    println!(
        "{} {} ({})",
        style("Iterations:").bold(),
        result.iterations,
        if result.converged { style("converged").green() } else { style("not converged").yellow() }
    );
    if result.fallback_used {
        println!(
            "{} equal weights used: {}",
            style("!").yellow().bold(),
            result.reason.as_deref().unwrap_or("unknown reason")
        );
    }
}

fn print_metrics(metrics: &RiskMetrics) {
    #[derive(Tabled)]
    struct MetricsRow {
        #[tabled(rename = "Metric")]
        name: &'static str,
        #[tabled(rename = "Value")]
        value: String,
    }

    let rows = vec![
        MetricsRow { name: "Total value", value: format!("{:.2}", metrics.total_value) },
        MetricsRow { name: "Observations", value: metrics.observations.to_string() },
        MetricsRow { name: "VaR 95%", value: format!("{:.2}%", metrics.var_95) },
        MetricsRow { name: "VaR 99%", value: format!("{:.2}%", metrics.var_99) },
        MetricsRow { name: "CVaR 95%", value: format!("{:.2}%", metrics.cvar_95) },
        MetricsRow { name: "CVaR 99%", value: format!("{:.2}%", metrics.cvar_99) },
        MetricsRow { name: "Volatility (ann.)", value: format!("{:.2}%", metrics.volatility) },
        MetricsRow { name: "Max drawdown", value: format!("{:.2}%", metrics.max_drawdown * 100.0) },
        MetricsRow { name: "Total return", value: format!("{:.2}%", metrics.total_return * 100.0) },
        MetricsRow { name: "Sharpe ratio", value: format!("{:.3}", metrics.sharpe_ratio) },
        MetricsRow { name: "Sortino ratio", value: format!("{:.3}", metrics.sortino_ratio) },
        MetricsRow { name: "Calmar ratio", value: format!("{:.3}", metrics.calmar_ratio) },
        MetricsRow { name: "Beta", value: format!("{:.3}", metrics.beta) },
        MetricsRow { name: "Herfindahl index", value: format!("{:.4}", metrics.herfindahl_index) },
        MetricsRow { name: "Largest position", value: format!("{:.2}%", metrics.max_position_weight) },
        MetricsRow { name: "Leverage", value: format!("{:.2}x", metrics.leverage) },
        MetricsRow { name: "Avg correlation", value: format!("{:.3}", metrics.average_correlation) },
    ];
    println!("\n{}", style("Metrics").bold().underlined());
    println!("{}", right_aligned(Table::new(rows)));

    if !metrics.sector_concentration.is_empty() {
        println!("{}", style("Sectors:").bold());
        for (sector, weight) in &metrics.sector_concentration {
            println!("  {:<20} {:>7.2}%", sector, weight);
        }
    }
}

fn print_breaches(breaches: &[RiskLimit]) {
    if breaches.is_empty() {
        println!("\n{}", style("All risk limits respected").green());
        return;
    }

    #[derive(Tabled)]
    struct BreachRow {
        #[tabled(rename = "Severity")]
        severity: String,
        #[tabled(rename = "Limit")]
        limit: String,
        #[tabled(rename = "Subject")]
        subject: String,
        #[tabled(rename = "Current")]
        current: String,
        #[tabled(rename = "Limit Value")]
        limit_value: String,
        #[tabled(rename = "Message")]
        message: String,
    }

    let rows: Vec<BreachRow> = breaches
        .iter()
        .map(|b| BreachRow {
            severity: severity_label(b.severity),
            limit: b.limit_type.to_string(),
            subject: b.subject.clone().unwrap_or_else(|| "-".to_string()),
            current: format!("{:.4}", b.current_value),
            limit_value: format!("{:.4}", b.limit_value),
            message: b.message.clone(),
        })
        .collect();
    println!("\n{}", style(format!("{} limit breach(es)", breaches.len())).red().bold());
    println!("{}", Table::new(rows).with(Style::modern()));
}

fn severity_label(severity: Severity) -> String {
    let label = severity.to_string();
    match severity {
        Severity::Low => style(label).dim().to_string(),
        Severity::Medium => style(label).yellow().to_string(),
        Severity::High => style(label).red().to_string(),
        Severity::Critical => style(label).red().bold().to_string(),
    }
}

fn print_stress_table(results: &[&StressTestResult]) {
    #[derive(Tabled)]
    struct StressRow {
        #[tabled(rename = "Scenario")]
        scenario: String,
        #[tabled(rename = "Loss")]
        loss: String,
        #[tabled(rename = "Loss %")]
        loss_pct: String,
        #[tabled(rename = "Stressed Value")]
        stressed_value: String,
        #[tabled(rename = "Affected")]
        affected: usize,
        #[tabled(rename = "Result")]
        result: String,
    }

    let rows: Vec<StressRow> = results
        .iter()
        .map(|r| StressRow {
            scenario: r.scenario_name.clone(),
            loss: format!("{:.2}", r.estimated_loss),
            loss_pct: format!("{:.2}%", r.loss_percentage),
            stressed_value: format!("{:.2}", r.stressed_value),
            affected: r.affected_positions.len(),
            result: if r.passed {
                style("PASS").green().to_string()
            } else {
                style("FAIL").red().bold().to_string()
            },
        })
        .collect();
    println!("\n{}", style("Stress tests").bold().underlined());
    println!("{}", Table::new(rows).with(Style::modern()));
}

fn print_monte_carlo(result: &MonteCarloResult) {
    println!("\n{}", style("Monte Carlo").bold().underlined());
    println!(
        "{} {:?} ({} of {} scenarios, {} periods, {}ms)",
        style("Status:").bold(),
        result.status,
        result.simulations_run,
        result.simulations_requested,
        result.horizon_days,
        result.elapsed_ms
    );
    if let Some(reason) = &result.reason {
        println!("{} {}", style("Note:").yellow().bold(), reason);
    }
    println!("  {:<16} {:>14.2}", "Initial value", result.initial_value);
    println!("  {:<16} {:>14.2}", "Mean value", result.mean_value);
    println!("  {:<16} {:>14.2}", "Std deviation", result.std_value);
    println!("  {:<16} {:>14.2}", "Min value", result.min_value);
    println!("  {:<16} {:>14.2}", "Max value", result.max_value);
    println!("  {:<16} {:>13.2}%", "VaR 95%", result.var_95);
    println!("  {:<16} {:>13.2}%", "VaR 99%", result.var_99);
    println!("  {:<16} {:>13.2}%", "CVaR 95%", result.cvar_95);
    println!("  {:<16} {:>13.2}%", "CVaR 99%", result.cvar_99);
}
