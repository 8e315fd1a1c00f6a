//! Lander CLI - Command line interface for the lander learner
//!
//! Checks definition files, evaluates formulas, trains value tables by
//! replaying recorded flights and inspects the stored tables.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::unused_async)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_precision_loss)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{definition, formula, replay, table};
use config::Config;

#[derive(Parser)]
#[command(name = "lander")]
#[command(author, version, about = "Lander - tabular reinforcement learning for a rocket lander", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to LANDER_CONFIG, ./lander.toml, ~/.config/lander/lander.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and describe MDP definitions
    #[command(subcommand)]
    Definition(definition::DefinitionCommands),

    /// Formula operations
    #[command(subcommand)]
    Formula(formula::FormulaCommands),

    /// Train value tables by replaying recorded episodes
    Replay(replay::ReplayArgs),

    /// Stored table operations
    #[command(subcommand)]
    Table(table::TableCommands),

    /// Show the effective configuration
    Config,
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lander_cli={level},lander_rl={level},lander_core={level}").into());

    let json = config.logging.json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from lander.env file (before reading configuration)
    let env_file = lander_core::util::load_env_file();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config, cli.verbose);

    match &config.source {
        Some(source) => info!(source = %source.display(), "Configuration loaded"),
        None => info!("No config file found, using defaults"),
    }
    if let Some(env_file) = env_file {
        info!(path = %env_file.display(), "Environment file applied");
    }

    match cli.command {
        Commands::Definition(cmd) => definition::run(cmd, &config).await,
        Commands::Formula(cmd) => formula::run(cmd).await,
        Commands::Replay(args) => replay::run(args, config).await,
        Commands::Table(cmd) => table::run(cmd, &config).await,
        Commands::Config => show_config(&config),
    }
}

fn show_config(config: &Config) -> Result<()> {
    match &config.source {
        Some(source) => println!("# Config file: {}\n", source.display()),
        None => println!("# No configuration file found. Using defaults.\n"),
    }
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
