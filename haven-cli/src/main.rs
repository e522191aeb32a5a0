//! havenctl: run and inspect a personal Haven relay from the terminal.
//!
//! # Usage
//!
//! ```text
//! havenctl config init [--owner <npub>] [--relay-url <url>] [--force]
//! havenctl config show [--json]
//! havenctl config path
//! havenctl relay run [--import] [--worker <path>]
//! havenctl relay clear-locks [--worker-name <name>]
//! havenctl feed [--relay <url>]... [--for <secs>] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config::ConfigCommand, feed::FeedArgs, relay::RelayCommand};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "havenctl",
    version,
    about = "Supervise a Haven relay and watch its live feed",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage ~/.haven/config.yaml.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Run the relay worker or repair its data directory.
    Relay {
        #[command(subcommand)]
        command: RelayCommand,
    },

    /// Subscribe to relays and print the aggregated feed.
    Feed(FeedArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Config { command } => commands::config::run(command),
        Commands::Relay { command } => commands::relay::run(command),
        Commands::Feed(args) => args.run(),
    }
}

/// Diagnostics go to stderr so command output stays pipeable.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
