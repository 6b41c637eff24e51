//! Command Line Interface for the pocket hedge fund engine
//!
//! This module provides a CLI over portfolio files:
//! - Full risk reports with limit breaches
//! - Stress scenarios and Monte Carlo simulation
//! - Weight optimization
//! - Rebalance planning with optional paper execution

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use pocket_hedge_config::{ConfigLoader, EngineConfig, RiskProfile};
use pocket_hedge_logging::{generate_correlation_id, init_logging, set_correlation_id, timer_stats};
use pocket_hedge_rebalancing::{
    execute_plan, OptimizationRequest, OptimizationStrategy, OptimizerPool, RebalanceContext, RebalancePlanner,
    RebalanceStrategy,
};
use pocket_hedge_risk::{MonteCarloSimulator, ReportInputs, RiskEngine, StressScenario};
use tracing::{debug, info, warn};

mod display;
mod input;
mod paper;
mod utils;

use display::{DisplayFormat, Renderer};
use input::{load_portfolio, load_scenarios, PortfolioInput};
use paper::PaperExecutor;
use utils::{create_config_interactive, create_spinner, print_error, print_success, print_warning};

/// Pocket hedge fund engine CLI
#[derive(Parser, Debug)]
#[clap(name = "pocket-hedge", version, about, long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[clap(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Starts from a risk profile instead of the built-in defaults
    #[clap(short, long, value_name = "PROFILE")]
    profile: Option<RiskProfile>,

    /// Overrides the configured log level
    #[clap(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Output format
    #[clap(short, long, value_enum, default_value = "text", global = true)]
    format: DisplayFormat,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Option<Commands>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Full risk report: metrics, limit breaches and stress scenarios
    RiskReport {
        /// Portfolio file (JSON or YAML)
        #[clap(value_name = "PORTFOLIO")]
        input: PathBuf,

        /// Include a Monte Carlo simulation
        #[clap(short, long)]
        monte_carlo: bool,

        /// Scenarios to run instead of the standard set
        #[clap(short, long = "scenario", value_name = "SCENARIO")]
        scenarios: Vec<String>,
    },

    /// Run stress scenarios
    Stress {
        /// Portfolio file (JSON or YAML)
        #[clap(value_name = "PORTFOLIO")]
        input: PathBuf,

        /// Scenario names, the standard set when omitted
        #[clap(short, long = "scenario", value_name = "SCENARIO")]
        scenarios: Vec<String>,

        /// File with custom scenario definitions
        #[clap(long, value_name = "FILE")]
        custom: Option<PathBuf>,
    },

    /// Monte Carlo simulation of the portfolio value
    Simulate {
        /// Portfolio file (JSON or YAML)
        #[clap(value_name = "PORTFOLIO")]
        input: PathBuf,

        /// Number of scenarios
        #[clap(short = 'n', long)]
        simulations: Option<usize>,

        /// Horizon in return periods
        #[clap(long)]
        horizon: Option<u32>,

        /// Seed for a reproducible run
        #[clap(long)]
        seed: Option<u64>,
    },

    /// Optimize target weights from the asset return history
    Optimize {
        /// Portfolio file (JSON or YAML)
        #[clap(value_name = "PORTFOLIO")]
        input: PathBuf,

        /// Optimization strategies
        #[clap(short, long = "strategy", value_name = "STRATEGY", default_value = "mean_variance")]
        strategies: Vec<OptimizationStrategy>,

        /// Run every strategy
        #[clap(long)]
        all: bool,

        /// Annualized target return, as a fraction
        #[clap(long)]
        target_return: Option<f64>,

        /// Risk tolerance for mean-variance
        #[clap(long)]
        risk_tolerance: Option<f64>,
    },

    /// Plan a rebalance towards target weights
    Rebalance {
        /// Portfolio file (JSON or YAML)
        #[clap(value_name = "PORTFOLIO")]
        input: PathBuf,

        /// Rebalancing strategy, the configured one when omitted
        #[clap(short, long, value_name = "STRATEGY")]
        strategy: Option<RebalanceStrategy>,

        /// Derive targets with an optimizer instead of the file's target weights
        #[clap(long, value_name = "STRATEGY")]
        optimizer: Option<OptimizationStrategy>,

        /// Paper-execute the plan at the current prices
        #[clap(short, long)]
        execute: bool,

        /// Write the plan to a JSON file
        #[clap(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// List the risk profiles
    Profiles,

    /// Generate a default configuration
    GenerateConfig {
        /// Output file
        #[clap(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Create interactively with prompts
        #[clap(short, long)]
        interactive: bool,
    },
}

/// Main entry point
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::GenerateConfig { output, interactive }) = &cli.command {
        let config = if *interactive {
            create_config_interactive()?
        } else {
            cli.profile.map(|p| p.config()).unwrap_or_default()
        };
        if output.exists() && !utils::confirm(&format!("{} exists. Overwrite?", output.display()), false)? {
            print_warning("Configuration not written");
            return Ok(());
        }
        ConfigLoader::new().save_config(&config, output)?;
        print_success(&format!("Configuration generated: {}", output.display()));
        return Ok(());
    }

    let mut loader = ConfigLoader::new().with_cli_config_path(cli.config.as_deref());
    if let Some(profile) = cli.profile {
        loader = loader.with_profile(profile);
    }
    let mut config = loader.load().context("Failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    let _guard = init_logging(&config.logging).context("Failed to initialize logging")?;
    set_correlation_id(generate_correlation_id());
    for source in loader.used_sources() {
        debug!(source = %source, "configuration source");
    }

    let renderer = Renderer::new(cli.format);
    let result = match cli.command {
        Some(command) => process_command(command, &config, &renderer).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    for stats in timer_stats(None) {
        info!(
            timer = %stats.name,
            count = stats.count,
            avg_us = stats.avg.as_micros() as u64,
            max_us = stats.max.as_micros() as u64,
            "timer summary"
        );
    }

    if let Err(e) = &result {
        print_error(&format!("{:#}", e));
    }
    result
}

/// Process CLI command
async fn process_command(command: Commands, config: &EngineConfig, renderer: &Renderer) -> Result<()> {
    match command {
        Commands::RiskReport { input, monte_carlo, scenarios } => {
            let portfolio = load_portfolio(&input)?;
            let snapshot = portfolio.snapshot(config)?;
            let model = portfolio.return_model();
            let scenarios = load_scenarios(&scenarios, None)?;

            let mut risk = config.risk.clone();
            risk.run_monte_carlo |= monte_carlo;
            let engine = RiskEngine::new(risk);

            let pb = create_spinner("Computing risk report...");
            let report = engine.full_report(&snapshot, report_inputs(&portfolio, model.as_ref()), &scenarios);
            pb.finish_and_clear();

            renderer.render_report(&report)?;
        }
        Commands::Stress { input, scenarios, custom } => {
            let portfolio = load_portfolio(&input)?;
            let snapshot = portfolio.snapshot(config)?;

            let mut scenarios = load_scenarios(&scenarios, custom.as_deref())?;
            if scenarios.is_empty() {
                scenarios = StressScenario::standard_set();
            }

            let engine = RiskEngine::new(config.risk.clone());
            let returns = (!portfolio.returns.is_empty()).then_some(portfolio.returns.as_slice());
            let results = engine.stress_tester().run_all(&snapshot, &scenarios, returns);
            if results.len() < scenarios.len() {
                print_warning(&format!(
                    "{} scenario(s) could not be evaluated, see the log for details",
                    scenarios.len() - results.len()
                ));
            }

            renderer.render_stress(&results)?;
        }
        Commands::Simulate { input, simulations, horizon, seed } => {
            let portfolio = load_portfolio(&input)?;
            let snapshot = portfolio.snapshot(config)?;
            let model = portfolio.return_model();

            let mut monte_carlo = config.risk.monte_carlo.clone();
            if let Some(simulations) = simulations {
                monte_carlo.num_simulations = simulations;
            }
            if let Some(horizon) = horizon {
                monte_carlo.horizon_days = horizon;
            }
            if seed.is_some() {
                monte_carlo.seed = seed;
            }

            let pb = create_spinner(&format!("Simulating {} scenarios...", monte_carlo.num_simulations));
            let result =
                tokio::task::spawn_blocking(move || MonteCarloSimulator::new(monte_carlo).simulate(&snapshot, model.as_ref()))
                    .await
                    .context("Simulation task failed")?;
            pb.finish_and_clear();

            renderer.render_monte_carlo(&result)?;
        }
        Commands::Optimize {
            input,
            strategies,
            all,
            target_return,
            risk_tolerance,
        } => {
            let portfolio = load_portfolio(&input)?;
            let model = Arc::new(require_model(&portfolio)?);

            let strategies = if all { OptimizationStrategy::ALL.to_vec() } else { strategies };
            let requests: Vec<OptimizationRequest> = strategies
                .into_iter()
                .map(|strategy| build_request(strategy, target_return, risk_tolerance))
                .collect();

            let pool = OptimizerPool::new(config.optimizer.clone());
            let pb = create_spinner("Optimizing...");
            let outcomes = pool.optimize_all(model, &requests).await;
            pb.finish_and_clear();

            let mut results = Vec::with_capacity(outcomes.len());
            for (request, outcome) in requests.iter().zip(outcomes) {
                match outcome {
                    Ok(result) => results.push(result),
                    Err(e) => print_error(&format!("{} failed: {}", request.strategy, e)),
                }
            }
            if results.is_empty() {
                bail!("No optimization succeeded");
            }

            renderer.render_optimizations(&results)?;
        }
        Commands::Rebalance {
            input,
            strategy,
            optimizer,
            execute,
            output,
        } => {
            let portfolio = load_portfolio(&input)?;
            let snapshot = portfolio.snapshot(config)?;
            let model = portfolio.return_model();

            let engine = RiskEngine::new(config.risk.clone());
            let metrics = engine.metrics(&snapshot, report_inputs(&portfolio, model.as_ref()));
            let breaches = engine.checker().check(&snapshot, &metrics);

            let target = match (optimizer, &portfolio.target_weights) {
                (Some(optimizer), _) => {
                    let model = model.ok_or_else(|| anyhow!("--optimizer needs asset_returns in the portfolio file"))?;
                    let pool = OptimizerPool::new(config.optimizer.clone());
                    let result = pool.optimize(Arc::new(model), OptimizationRequest::new(optimizer)).await?;
                    if result.fallback_used {
                        warn!(reason = ?result.reason, "optimizer fell back to equal weights");
                    }
                    result.weights
                }
                (None, Some(target)) => target.clone(),
                (None, None) => bail!("No target weights: add target_weights to the portfolio file or pass --optimizer"),
            };

            let context = RebalanceContext::from_snapshot(&snapshot)
                .with_metrics(&metrics)
                .with_breaches(&breaches);

            let planner = RebalancePlanner::new(config.rebalance.clone());
            let current = snapshot.weight_fractions();
            let mut plan = match strategy {
                Some(strategy) => planner.plan_with(strategy, &current, &target, &context)?,
                None => planner.plan(&current, &target, &context)?,
            };
            renderer.render_plan(&plan)?;

            if execute && !plan.is_empty() {
                let summary = execute_plan(&mut plan, &PaperExecutor::new(config.rebalance.fee_rate)).await?;
                renderer.render_execution(&summary)?;
            }

            if let Some(path) = output {
                let contents = serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?;
                std::fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
                print_success(&format!("Plan written to {}", path.display()));
            }
        }
        Commands::Profiles => {
            renderer.render_profiles()?;
        }
        Commands::GenerateConfig { .. } => {
            // Already handled above
        }
    }

    Ok(())
}

fn report_inputs<'a>(
    portfolio: &'a PortfolioInput,
    model: Option<&'a pocket_hedge_risk::ReturnModel>,
) -> ReportInputs<'a> {
    ReportInputs {
        returns: &portfolio.returns,
        benchmark: portfolio.benchmark.as_deref(),
        model,
    }
}

fn require_model(portfolio: &PortfolioInput) -> Result<pocket_hedge_risk::ReturnModel> {
    portfolio
        .return_model()
        .ok_or_else(|| anyhow!("Optimization needs at least two aligned periods of asset_returns for every position"))
}

fn build_request(
    strategy: OptimizationStrategy,
    target_return: Option<f64>,
    risk_tolerance: Option<f64>,
) -> OptimizationRequest {
    let mut request = OptimizationRequest::new(strategy);
    if let Some(target) = target_return {
        request = request.with_target_return(target);
    }
    if let Some(tolerance) = risk_tolerance {
        request = request.with_risk_tolerance(tolerance);
    }
    request
}
