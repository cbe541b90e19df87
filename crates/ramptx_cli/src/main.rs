//! RampTx CLI
//!
//! Runs the transaction protocol against an in-memory store and prints
//! what every document looks like along the way.
//!
//! # Commands
//!
//! - `swap` - Two-party swap, staged then committed
//! - `crash` - Swap whose coordinator dies after a number of store writes,
//!   followed by recovery
//! - `scan` - Leaves transactions in flight and lists them from the store

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Command-line scenarios for RampTx transactions.
#[derive(Parser)]
#[command(name = "ramptx")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Age in logical ticks after which staged metadata is abandoned
    #[arg(global = true, long, default_value = "8")]
    staleness: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Swap values between two documents in one transaction
    Swap {
        /// Value written to the first document
        #[arg(long, default_value = "jeff")]
        first: String,

        /// Value written to the second document
        #[arg(long, default_value = "mike")]
        second: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Crash the coordinator mid-transaction, then recover
    Crash {
        /// Number of store writes the coordinator completes before dying
        #[arg(short, long)]
        after: usize,

        /// Number of participant documents
        #[arg(short, long, default_value = "2")]
        participants: usize,

        /// Delete placeholder documents on rollback
        #[arg(long)]
        remove_placeholders: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List in-flight transactions reconstructed from staging metadata
    Scan {
        /// Transactions left staged before the scan
        #[arg(short, long, default_value = "3")]
        transactions: usize,

        /// Resolve abandoned transactions after listing them
        #[arg(short, long)]
        resolve: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = ramptx_core::Config::new().staleness_threshold(cli.staleness);

    match cli.command {
        Commands::Swap {
            first,
            second,
            format,
        } => {
            commands::swap::run(config, &first, &second, &format)?;
        }
        Commands::Crash {
            after,
            participants,
            remove_placeholders,
            format,
        } => {
            let config = if remove_placeholders {
                config.placeholder_policy(ramptx_core::PlaceholderPolicy::Remove)
            } else {
                config
            };
            commands::crash::run(config, after, participants, &format)?;
        }
        Commands::Scan {
            transactions,
            resolve,
            format,
        } => {
            commands::scan::run(config, transactions, resolve, &format)?;
        }
    }

    Ok(())
}
