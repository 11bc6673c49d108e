//! # Job Executor Configuration Validator
//!
//! Command-line tool for validating job executor configuration across environments.
//! Prints the idle and contention backoff tables the configured values produce, so
//! pacing changes can be reviewed before they reach a running executor.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tasker_job_executor::acquisition::strategy::{level_wait_ms, max_level};
use tasker_job_executor::config::{ConfigManager, JobExecutorConfig};
use tasker_job_executor::execution::RetryPolicy;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate job executor configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format (table, json)
    #[arg(long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the whole configuration
    All,

    /// Validate one section (acquisition, worker_pool, jobs)
    Component { name: String },

    /// Print the idle and backoff wait for every level
    Levels,

    /// Print the effective configuration
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
        Some(Commands::Component { name }) => validate_component(manager.config(), name),
        Some(Commands::Levels) => show_levels(manager.config(), &cli.format),
        Some(Commands::Show) => show_config(&manager, &cli.format),
    });

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<std::sync::Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("loading configuration for '{}'", cli.environment))
}

fn validate_all(manager: &ConfigManager) -> anyhow::Result<()> {
    println!("🔧 Validating Job Executor Configuration");
    println!("Environment: {}", manager.environment());
    println!("Config Directory: {}", manager.config_directory().display());
    println!();
    println!("✅ Configuration loaded and validated");

    let config = manager.config();
    validate_acquisition(config)?;
    validate_worker_pool(config)?;
    validate_jobs(config)?;

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn validate_component(config: &JobExecutorConfig, name: &str) -> anyhow::Result<()> {
    match name.to_lowercase().replace('-', "_").as_str() {
        "acquisition" => validate_acquisition(config)?,
        "worker_pool" => validate_worker_pool(config)?,
        "jobs" => validate_jobs(config)?,
        _ => bail!("Unknown component: {name}"),
    }
    println!("✅ Component '{name}' validation passed!");
    Ok(())
}

fn validate_acquisition(config: &JobExecutorConfig) -> anyhow::Result<()> {
    let acquisition = &config.acquisition;
    println!("🔎 Acquisition");
    println!(
        "   ✅ {} jobs per cycle, lock time {}ms",
        acquisition.max_jobs_per_acquisition, acquisition.lock_time_ms
    );
    println!(
        "   ✅ Idle wait {}ms → {}ms (x{})",
        acquisition.wait_time_ms, acquisition.max_wait_ms, acquisition.wait_increase_factor
    );
    if acquisition.backoff_time_ms == 0 {
        println!("   ℹ️  Contention backoff disabled");
    } else {
        println!(
            "   ✅ Backoff {}ms → {}ms (x{}), lowered after {} clean cycles",
            acquisition.backoff_time_ms,
            acquisition.max_backoff_ms,
            acquisition.backoff_increase_factor,
            acquisition.backoff_decrease_threshold
        );
    }
    match &acquisition.lock_owner {
        Some(owner) => println!("   ✅ Lock owner: {owner}"),
        None => println!("   ℹ️  Lock owner generated per executor"),
    }
    Ok(())
}

fn validate_worker_pool(config: &JobExecutorConfig) -> anyhow::Result<()> {
    let pool = &config.worker_pool;
    println!("👷 Worker Pool");
    println!(
        "   ✅ {} workers, queue of {}, shutdown timeout {}s",
        pool.core_pool_size, pool.queue_size, pool.shutdown_timeout_seconds
    );
    println!("   ✅ Rejected batches: {:?}", pool.rejected_jobs_policy);
    Ok(())
}

fn validate_jobs(config: &JobExecutorConfig) -> anyhow::Result<()> {
    println!("🔁 Jobs");
    println!("   ✅ Default retries: {}", config.jobs.default_retries);
    match RetryPolicy::from_config(&config.jobs)? {
        RetryPolicy::Default => println!("   ℹ️  Failed jobs retry immediately"),
        RetryPolicy::TimeCycle(cycle) => println!(
            "   ✅ Retry cycle: {} retries over {} interval(s)",
            cycle.retries(),
            cycle.intervals().len()
        ),
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct LevelRow {
    level: u32,
    idle_wait_ms: u64,
    backoff_wait_ms: u64,
}

fn level_rows(config: &JobExecutorConfig) -> Vec<LevelRow> {
    let a = &config.acquisition;
    let idle_max = max_level(a.wait_time_ms, a.max_wait_ms, a.wait_increase_factor);
    let backoff_max = max_level(a.backoff_time_ms, a.max_backoff_ms, a.backoff_increase_factor);

    (0..=idle_max.max(backoff_max))
        .map(|level| LevelRow {
            level,
            idle_wait_ms: level_wait_ms(
                level.min(idle_max),
                idle_max,
                a.wait_time_ms,
                a.wait_increase_factor,
                a.max_wait_ms,
            ),
            backoff_wait_ms: level_wait_ms(
                level.min(backoff_max),
                backoff_max,
                a.backoff_time_ms,
                a.backoff_increase_factor,
                a.max_backoff_ms,
            ),
        })
        .collect()
}

fn show_levels(config: &JobExecutorConfig, format: &str) -> anyhow::Result<()> {
    let rows = level_rows(config);
    if format.eq_ignore_ascii_case("json") {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{:>5}  {:>12}  {:>15}", "level", "idle wait ms", "backoff wait ms");
    for row in rows {
        println!(
            "{:>5}  {:>12}  {:>15}",
            row.level, row.idle_wait_ms, row.backoff_wait_ms
        );
    }
    Ok(())
}

fn show_config(manager: &ConfigManager, format: &str) -> anyhow::Result<()> {
    let sanitized = manager.debug_config();
    if format.eq_ignore_ascii_case("json") {
        println!("{}", serde_json::to_string_pretty(&sanitized)?);
    } else {
        println!("📋 Effective configuration ({})", manager.environment());
        println!("{sanitized:#}");
    }
    Ok(())
}
