mod alerting;
mod backoff;
mod cleanup;
mod cli;
mod config;
mod daemon;
mod db;
mod dispatch;
mod error;
mod ingest;
mod models;
mod nag;
mod reports;
mod resolver;
mod schedule;
mod server;
mod store;
mod transport;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Commands, ConfigCommands};
use crate::config::{load_config, validate_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.core.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config_path = %cli.config.display(), "config loaded");

    validate_config(&config).context("config validation failed")?;
    info!("config validated successfully");

    match cli.command {
        Some(Commands::Config {
            command: ConfigCommands::Validate,
        }) => {
            println!("Configuration is valid.");
        }
        Some(Commands::Migrate) => {
            let pool = db::create_pool(&config.db_path(), config.database.max_connections)
                .await
                .context("running migrations")?;
            pool.close().await;
            println!("Migrations applied.");
        }
        Some(Commands::Sendalerts { num_workers, pool: _ }) => {
            let mut config = config;
            if let Some(n) = num_workers {
                config.alerting.num_workers = n;
            }
            let pool = db::create_pool(&config.db_path(), config.database.max_connections)
                .await
                .context("creating database")?;
            daemon::run_sendalerts(pool, config).await?;
        }
        Some(Commands::Sendreports { loop_ }) => {
            let pool = db::create_pool(&config.db_path(), config.database.max_connections)
                .await
                .context("creating database")?;
            if loop_ {
                let cancel = tokio_util::sync::CancellationToken::new();
                reports::sendreports_loop(pool, Arc::new(config), cancel).await;
            } else {
                let reported = reports::run_once(&pool).await?;
                println!("Sent {reported} summary reports.");
                pool.close().await;
            }
        }
        Some(Commands::Serve) => {
            let pool = db::create_pool(&config.db_path(), config.database.max_connections)
                .await
                .context("creating database")?;
            daemon::run_server(pool, config).await?;
        }
        None => {
            println!("No command given. Try --help for the available subcommands.");
        }
    }

    Ok(())
}
