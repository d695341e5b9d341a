use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "heartbox", about = "Cron-job and heartbeat monitor core")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Run the embedded migration ledger and exit
    Migrate,

    /// Run the alerting, nag, and dispatch loops continuously
    Sendalerts {
        /// Fan-out pool size for channel dispatch (overrides config)
        #[arg(long)]
        num_workers: Option<u32>,

        /// Enable the DB connection pool (no-op placeholder flag, kept
        /// for parity with the reference daemon's command-line surface)
        #[arg(long)]
        pool: bool,
    },

    /// Run the periodic summary-report daemon
    Sendreports {
        /// Keep running, re-sending reports on the configured cadence
        #[arg(long = "loop")]
        loop_: bool,
    },

    /// Run the HTTP ping-intake + badge surface
    Serve,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Parse and validate the config file without starting anything
    Validate,
}
