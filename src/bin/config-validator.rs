//! # Reliability Configuration Validator
//!
//! Command-line tool for validating reliability configuration files for an
//! environment before deploying them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reliability_core::config::{ConfigManager, ReliabilityConfig};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate reliability configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long, default_value = "development", env = "RELIABILITY_ENV")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long, env = "RELIABILITY_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate every section and print a summary
    All,

    /// Print the per-service circuit breaker table
    Breakers,

    /// Print the effective configuration as JSON
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = load(&cli).and_then(|manager| match &cli.command {
        Some(Commands::All) | None => validate_all(&manager),
        Some(Commands::Breakers) => {
            print_breakers(manager.config());
            Ok(())
        }
        Some(Commands::Show) => show_config(&manager),
    });

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("Configuration invalid: {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("loading configuration for '{}'", cli.environment))
}

fn validate_all(manager: &ConfigManager) -> Result<()> {
    let config = manager.config();

    println!("Validating reliability configuration");
    println!("Environment: {}", manager.environment());
    println!("Config Directory: {}", manager.config_directory().display());
    println!();

    print_breakers(config);

    println!("Retry:");
    println!(
        "   max_attempts={} base_delay={}ms max_delay={}ms base={} jitter={}",
        config.retry.max_attempts,
        config.retry.base_delay_ms,
        config.retry.max_delay_ms,
        config.retry.exponential_base,
        config.retry.jitter
    );

    println!("Degradation:");
    println!(
        "   default_duration={}s rate_limit_default={}s",
        config.degradation.default_duration_seconds, config.rate_limit.default_retry_after_seconds
    );

    println!("Backup:");
    println!(
        "   directory={} prefix={} schema_version={}",
        config.backup.directory, config.backup.file_prefix, config.backup.schema_version
    );
    for group in &config.backup.record_groups {
        println!(
            "   - {} -> {} (keys: {})",
            group.name,
            group.table,
            group.key_columns.join(", ")
        );
    }
    println!(
        "   auto_backup enabled={} interval={}s spacing={}s",
        config.backup.auto_backup.enabled,
        config.backup.auto_backup.interval_seconds,
        config.backup.auto_backup.spacing_seconds
    );

    println!("Watchdog:");
    println!(
        "   enabled={} check_interval={}s open_alert={}s degraded_alert={} failure_ceiling={}",
        config.watchdog.enabled,
        config.watchdog.check_interval_seconds,
        config.watchdog.open_alert_threshold_seconds,
        config.watchdog.degraded_services_alert_count,
        config.watchdog.failure_ceiling
    );

    println!("\nAll configuration validation checks passed");
    Ok(())
}

fn print_breakers(config: &ReliabilityConfig) {
    let breakers = &config.circuit_breakers;
    println!(
        "Circuit breakers (enabled={}, half_open_admission={:?}):",
        breakers.enabled, breakers.half_open_admission
    );

    let mut names: Vec<&String> = breakers.component_configs.keys().collect();
    names.sort();
    for name in names {
        let component = breakers.config_for_component(name);
        println!(
            "   {:<14} failures={:<3} timeout={:>4}s probes={}",
            name,
            component.failure_threshold,
            component.timeout_seconds,
            component.half_open_max_probes
        );
    }
}

fn show_config(manager: &ConfigManager) -> Result<()> {
    let value = manager.debug_config().context("serializing configuration")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
