use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(
    name = "nsrecruit",
    version,
    about = "Rate-limited NationStates recruitment engine",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// TOML configuration file (environment variables are used otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the recruiter until Ctrl+C
    Run {
        /// Do not start the control API
        #[arg(long, default_value = "false")]
        no_server: bool,
    },

    /// Print candidate counts from the store
    Status,

    /// Evaluate a nation against the criteria and the live API
    Check {
        /// Nation name
        nation: String,
    },

    /// List a region's members from the live API
    Members {
        /// Region name
        region: String,
    },

    /// Move skipped nations back to pending
    Requeue {
        /// Nations to requeue (all skipped nations if empty)
        names: Vec<String>,
    },

    /// Reserve nations for manual recruiting and print them
    Recruitable {
        /// Number of nations to reserve
        count: usize,
    },

    /// Load dump files from disk and print region statistics
    ImportDump {
        /// regions.xml(.gz)
        regions: PathBuf,

        /// nations.xml(.gz)
        nations: PathBuf,

        /// Number of regions to list
        #[arg(short, long, default_value = "10")]
        top: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Run { no_server } => {
            tracing::info!(no_server = %no_server, "Starting run command");
            commands::run(config, !no_server).await?;
        }

        Commands::Status => {
            commands::status(&config)?;
        }

        Commands::Check { nation } => {
            tracing::info!(nation = %nation, "Starting check command");
            commands::check(&config, &nation).await?;
        }

        Commands::Members { region } => {
            commands::members(&config, &region).await?;
        }

        Commands::Requeue { names } => {
            commands::requeue(&config, &names)?;
        }

        Commands::Recruitable { count } => {
            tracing::info!(count = %count, "Starting recruitable command");
            commands::recruitable(&config, count).await?;
        }

        Commands::ImportDump {
            regions,
            nations,
            top,
        } => {
            tracing::info!(
                regions = %regions.display(),
                nations = %nations.display(),
                "Starting import-dump command"
            );
            commands::import_dump(&config, &regions, &nations, top).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("nsrecruit=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("nsrecruit={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
