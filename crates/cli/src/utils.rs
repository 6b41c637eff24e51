//! Utility functions for the CLI

use std::time::Duration;

use anyhow::Result;
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use pocket_hedge_config::{EngineConfig, RiskProfile};
use pocket_hedge_rebalancing::RebalanceStrategy;

/// Create a new configuration interactively
pub fn create_config_interactive() -> Result<EngineConfig> {
    println!("{}", style("Pocket Hedge Configuration").bold().cyan());
    println!("Let's set up your configuration...\n");

    let theme = ColorfulTheme::default();

    let profiles: Vec<String> = RiskProfile::ALL
        .iter()
        .map(|p| format!("{} - {}", p, p.description()))
        .collect();
    let selection = Select::with_theme(&theme)
        .with_prompt("Risk profile")
        .items(&profiles)
        .default(1)
        .interact()?;
    let profile = RiskProfile::ALL[selection];
    let mut config = profile.config();

    let strategies = RebalanceStrategy::ALL;
    let names: Vec<&str> = strategies.iter().map(|s| s.as_str()).collect();
    let selection = Select::with_theme(&theme)
        .with_prompt("Rebalancing strategy")
        .items(&names)
        .default(0)
        .interact()?;
    config.rebalance.strategy = strategies[selection];

    config.rebalance.threshold = Input::with_theme(&theme)
        .with_prompt("Drift threshold (fraction)")
        .default(config.rebalance.threshold)
        .validate_with(|value: &f64| {
            if *value > 0.0 && *value < 1.0 {
                Ok(())
            } else {
                Err("threshold must be between 0 and 1")
            }
        })
        .interact_text()?;

    if config.rebalance.strategy == RebalanceStrategy::TimeBased {
        config.rebalance.frequency_days = Input::with_theme(&theme)
            .with_prompt("Rebalance every N days")
            .default(config.rebalance.frequency_days)
            .interact_text()?;
    }

    config.risk.run_monte_carlo = Confirm::with_theme(&theme)
        .with_prompt("Include Monte Carlo simulation in risk reports?")
        .default(config.risk.run_monte_carlo)
        .interact()?;

    config.logging.level = Input::with_theme(&theme)
        .with_prompt("Log level")
        .default(config.logging.level.clone())
        .interact_text()?;

    println!();
    print_info(&format!("Using the {} profile", profile));
    Ok(config)
}

/// Create a spinner with the specified message
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(spinner_style) = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.green} {msg}")
    {
        pb.set_style(spinner_style);
    }

    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));

    pb
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", style("i").blue().bold(), message);
}

/// Prompt for confirmation with yes/no
pub fn confirm(message: &str, default: bool) -> Result<bool> {
    Ok(Confirm::new().with_prompt(message).default(default).interact()?)
}
