//! # Courier Configuration Validator
//!
//! Loads the layered configuration for an environment, runs validation, and
//! prints the result with secrets masked. Intended for CI and deploy checks
//! before starting workers.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use courier_core::config::{ConfigManager, CourierConfig, QueueBackend};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate courier configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment overlay to apply (courier.<environment>.toml)
    #[arg(short, long, env = "COURIER_ENV", default_value = "development")]
    environment: String,

    /// Directory holding courier.toml and its overlays
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the whole configuration (default)
    All,

    /// Show one section
    Component {
        /// dispatch, queues, correlation, routing or database
        name: String,
    },

    /// List environments that have an overlay file
    Environments,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _ = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all(&cli),
        Some(Commands::Component { name }) => show_component(&cli, name),
        Some(Commands::Environments) => list_environments(&cli.config_dir),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<Arc<ConfigManager>> {
    ConfigManager::load_from_directory(cli.config_dir.clone(), &cli.environment).with_context(
        || {
            format!(
                "loading {} for environment '{}'",
                cli.config_dir.display(),
                cli.environment
            )
        },
    )
}

fn validate_all(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;

    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&manager.sanitized())?);
        }
        OutputFormat::Table => {
            println!("🔧 Validating courier configuration");
            println!("Environment: {}", manager.environment());
            println!("Config Directory: {}", manager.config_directory().display());
            println!();
            print_summary(manager.config());
            println!("\n🎉 All configuration validation checks passed!");
        }
    }
    Ok(())
}

fn print_summary(config: &CourierConfig) {
    println!("📨 Dispatch");
    println!("   provider timeout: {}ms", config.dispatch.provider_timeout_ms);
    println!(
        "   mark failed on dead letter: {}",
        config.dispatch.mark_failed_on_dead_letter
    );

    println!("📬 Queues");
    println!("   backend: {:?}", config.queues.backend);
    println!(
        "   {} → {} → {}",
        config.queues.primary_queue, config.queues.retry_queue, config.queues.dead_letter_queue
    );
    println!("   max receive count: {}", config.queues.max_receive_count);

    println!("🔗 Correlation");
    println!("   retention: {}h", config.correlation.retention_hours);

    println!("📡 Routing");
    let mut overrides: Vec<_> = config.routing.filter_policies.keys().collect();
    overrides.sort();
    if overrides.is_empty() {
        println!("   built-in filter policies");
    } else {
        println!("   filter policy overrides: {overrides:?}");
    }

    println!("🗄️  Database");
    match (&config.database.url, config.queues.backend) {
        (Some(_), _) => println!("   url configured, pool size {}", config.database.max_connections),
        (None, QueueBackend::InMemory) => println!("   not used by the in-memory backend"),
        (None, QueueBackend::Pgmq) => println!("   ⚠️  url missing"),
    }
}

fn show_component(cli: &Cli, name: &str) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let sanitized = manager.sanitized();
    let key = name.to_lowercase().replace('-', "_");
    let Some(section) = sanitized.pointer(&format!("/config/{key}")) else {
        bail!("Unknown component: {name}");
    };
    println!("{}", serde_json::to_string_pretty(section)?);
    Ok(())
}

fn list_environments(config_dir: &Path) -> anyhow::Result<()> {
    println!("📋 Available Environments:");

    let mut environments = Vec::new();
    for entry in std::fs::read_dir(config_dir)
        .with_context(|| format!("reading {}", config_dir.display()))?
    {
        let file_name = entry?.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if let Some(env) = name
            .strip_prefix("courier.")
            .and_then(|rest| rest.strip_suffix(".toml"))
        {
            environments.push(env.to_string());
        }
    }
    environments.sort();

    for env in environments {
        println!("  • {env}");
    }
    Ok(())
}
