//! `havenctl relay`: foreground supervision and lock repair.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Subcommand};
use colored::Colorize;

use haven_core::{LogEntry, LogLevel, ProcessState, RelayConfig};
use haven_supervisor::{locks, paths, Supervisor, SupervisorOptions};

const LOG_POLL: Duration = Duration::from_millis(250);

#[derive(Subcommand, Debug)]
pub enum RelayCommand {
    /// Run the relay in the foreground until it exits or Ctrl-C.
    Run(RelayRunArgs),
    /// Delete stale database locks and kill stray worker processes.
    ClearLocks(ClearLocksArgs),
}

#[derive(Args, Debug)]
pub struct RelayRunArgs {
    /// Run the one-shot note import instead of serving.
    #[arg(long)]
    pub import: bool,

    /// Worker executable to use instead of the configured or bundled one.
    #[arg(long, value_name = "PATH")]
    pub worker: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ClearLocksArgs {
    /// Process name to force-kill.
    #[arg(long, default_value = paths::WORKER_BINARY)]
    pub worker_name: String,
}

pub fn run(command: RelayCommand) -> Result<()> {
    let home = super::home()?;
    match command {
        RelayCommand::Run(args) => {
            let mut config =
                haven_core::config::load_at(&home).context("failed to load config")?;
            if let Some(worker) = args.worker {
                config.worker_binary = Some(worker);
            }
            let options = SupervisorOptions::for_home(&home);
            super::runtime()?.block_on(run_relay(options, config, args.import))
        }
        RelayCommand::ClearLocks(args) => {
            let data_dir = paths::data_dir(&home);
            for entry in locks::clear_locks(&data_dir, &args.worker_name) {
                println!("{}", format_entry(&entry));
            }
            Ok(())
        }
    }
}

async fn run_relay(options: SupervisorOptions, config: RelayConfig, import: bool) -> Result<()> {
    let supervisor = Supervisor::spawn(options);
    let mut cursor = LogCursor::default();

    let launched = if import {
        supervisor.import_notes(config).await
    } else {
        supervisor.start(config).await
    };
    launched.context("supervisor unavailable")?;
    cursor.print(&supervisor.logs().await?);
    // The worker may already have exited; `started_at` survives that.
    if supervisor.snapshot().started_at.is_none() {
        bail!("relay did not start");
    }

    let mut state = supervisor.subscribe();
    let mut ticker = tokio::time::interval(LOG_POLL);
    let mut last_status = String::new();
    let mut stopping = false;
    let outcome = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = state.changed() => {
                if changed.is_err() {
                    break supervisor.snapshot();
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                println!("{}", "stopping relay".yellow());
                stopping = true;
                supervisor.stop().await?;
            }
        }

        cursor.print(&supervisor.logs().await?);
        let current = supervisor.snapshot();
        if let Some(status) = status_line(&current) {
            if status != last_status {
                println!("{}", status.cyan());
                last_status = status;
            }
        }
        if !current.running && !supervisor.import_pending().await? {
            break current;
        }
    };

    cursor.print(&supervisor.logs().await?);
    supervisor.shutdown().await?;

    if outcome.locked {
        println!(
            "{}",
            "Database is locked. Run 'havenctl relay clear-locks' and try again.".yellow()
        );
    }
    if import {
        if outcome.import_status.starts_with("Import Complete") {
            println!("{}", outcome.import_status.green());
            return Ok(());
        }
        bail!("{}", outcome.import_status);
    }
    if !stopping {
        bail!("relay exited unexpectedly");
    }
    tracing::info!("relay stopped");
    Ok(())
}

/// One line summarising what the relay is doing, if anything.
fn status_line(state: &ProcessState) -> Option<String> {
    if state.importing {
        return Some(format!(
            "import: {} ({:.0}%)",
            state.import_status,
            state.import_progress * 100.0
        ));
    }
    if state.booting {
        return Some(format!("boot: {}", state.boot_status));
    }
    if state.running {
        return Some(format!(
            "serving: {} connections, {} events stored",
            state.active_connections, state.events_stored
        ));
    }
    None
}

fn format_entry(entry: &LogEntry) -> String {
    let time = entry.timestamp.with_timezone(&Local).format("%H:%M:%S");
    let level = match entry.level {
        LogLevel::Info => "INFO ".normal(),
        LogLevel::Warn => "WARN ".yellow().bold(),
        LogLevel::Error => "ERROR".red().bold(),
    };
    format!("{} {level} {}", time.to_string().bright_black(), entry.message)
}

/// Prints each log entry once across repeated snapshots of the buffer.
#[derive(Default)]
struct LogCursor {
    last: Option<LogEntry>,
}

impl LogCursor {
    fn print(&mut self, entries: &[LogEntry]) {
        let fresh = match &self.last {
            None => entries,
            Some(last) => match entries.iter().position(|e| e.id == last.id) {
                Some(index) => &entries[index + 1..],
                // Evicted from the buffer: fall back to timestamps.
                None => {
                    let start = entries
                        .iter()
                        .position(|e| e.timestamp > last.timestamp)
                        .unwrap_or(entries.len());
                    &entries[start..]
                }
            },
        };
        for entry in fresh {
            println!("{}", format_entry(entry));
        }
        if let Some(newest) = fresh.last() {
            self.last = Some(newest.clone());
        }
    }
}
