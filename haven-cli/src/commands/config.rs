//! `havenctl config`: create and inspect the relay configuration.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use haven_core::config::{config_path_at, load_at, save_at};
use haven_core::RelayConfig;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a default config file.
    Init(ConfigInitArgs),
    /// Print the effective configuration.
    Show(ConfigShowArgs),
    /// Print where the config file lives.
    Path,
}

#[derive(Args, Debug)]
pub struct ConfigInitArgs {
    /// Owner public key (npub) the relay serves.
    #[arg(long)]
    pub owner: Option<String>,

    /// Public URL the relay is reachable at.
    #[arg(long)]
    pub relay_url: Option<String>,

    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigShowArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = super::home()?;
    match command {
        ConfigCommand::Init(args) => init(&home, args),
        ConfigCommand::Show(args) => show(&home, args),
        ConfigCommand::Path => {
            println!("{}", config_path_at(&home).display());
            Ok(())
        }
    }
}

fn init(home: &Path, args: ConfigInitArgs) -> Result<()> {
    let path = config_path_at(home);
    if path.exists() && !args.force {
        bail!(
            "config already exists at {}; pass --force to overwrite",
            path.display()
        );
    }

    let mut config = RelayConfig::default();
    if let Some(owner) = args.owner {
        config.owner_npub = owner;
    }
    if let Some(url) = args.relay_url {
        config.relay_url = url;
    }

    let written = save_at(home, &config).context("failed to write config")?;
    println!("✓ Wrote {}", written.display());
    Ok(())
}

#[derive(Tabled)]
struct ConfigRow {
    #[tabled(rename = "setting")]
    key: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

fn show(home: &Path, args: ConfigShowArgs) -> Result<()> {
    let config = load_at(home).context("failed to load config")?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&config).context("failed to serialize config JSON")?
        );
        return Ok(());
    }

    let or_unset = |value: &str| {
        if value.is_empty() {
            "(unset)".to_string()
        } else {
            value.to_string()
        }
    };
    let rows = vec![
        ConfigRow { key: "owner_npub", value: or_unset(&config.owner_npub) },
        ConfigRow { key: "relay_url", value: or_unset(&config.relay_url) },
        ConfigRow { key: "relay_port", value: config.relay_port.to_string() },
        ConfigRow { key: "db_engine", value: config.db_engine.clone() },
        ConfigRow { key: "log_level", value: config.log_level.clone() },
        ConfigRow { key: "blossom_path", value: config.blossom_path.clone() },
        ConfigRow { key: "import_start_date", value: config.import_start_date.clone() },
        ConfigRow {
            key: "import_seed_relays",
            value: config.import_seed_relays.join("\n"),
        },
        ConfigRow {
            key: "blastr_relays",
            value: config.blastr_relays.join("\n"),
        },
        ConfigRow {
            key: "worker_binary",
            value: config
                .worker_binary
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(bundled or /usr/local/bin/haven)".to_string()),
        },
    ];

    println!("{}", config_path_at(home).display());
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}
