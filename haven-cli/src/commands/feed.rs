//! `havenctl feed`: live aggregated view of one or more relays.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use haven_core::MediaKind;
use haven_feed::{FeedOptions, FeedService, FeedSnapshot, FeedUpdate};

const PREVIEW_ROWS: usize = 10;
const PREVIEW_CHARS: usize = 60;

/// Arguments for `havenctl feed`.
#[derive(Args, Debug)]
pub struct FeedArgs {
    /// Relay endpoint to subscribe to (repeatable). Defaults to the
    /// configured import seed relays.
    #[arg(long = "relay", value_name = "URL")]
    pub relays: Vec<String>,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long = "for", value_name = "SECS")]
    pub duration: Option<u64>,

    /// Emit one JSON object per update.
    #[arg(long)]
    pub json: bool,
}

impl FeedArgs {
    pub fn run(self) -> Result<()> {
        let relays = if self.relays.is_empty() {
            let home = super::home()?;
            haven_core::config::load_at(&home)
                .context("failed to load config")?
                .import_seed_relays
        } else {
            self.relays.clone()
        };
        super::runtime()?.block_on(self.watch(relays))
    }

    async fn watch(self, relays: Vec<String>) -> Result<()> {
        let (mut service, mut updates) = FeedService::spawn(FeedOptions::default());
        let opened = service
            .fetch(&relays)
            .context("invalid relay endpoint")?;
        if !self.json {
            println!("subscribed to {opened} relays");
        }

        let deadline = self.duration.map(Duration::from_secs);
        let stop = async {
            match deadline {
                Some(after) => {
                    tokio::time::sleep(after).await;
                    Ok(())
                }
                None => tokio::signal::ctrl_c().await,
            }
        };
        tokio::pin!(stop);

        let mut latest: Option<FeedUpdate> = None;
        loop {
            tokio::select! {
                update = updates.recv() => {
                    let Some(update) = update else { break };
                    let connected = service
                        .connection_status()
                        .iter()
                        .filter(|s| s.connected)
                        .count();
                    self.print_update(&update, connected, relays.len())?;
                    latest = Some(update);
                }
                stopped = &mut stop => {
                    stopped.context("failed to listen for ctrl-c")?;
                    break;
                }
            }
        }
        service.shutdown();

        if !self.json {
            print_summary(latest.as_ref().map(|u| u.snapshot.as_ref()));
        }
        Ok(())
    }

    fn print_update(&self, update: &FeedUpdate, connected: usize, total: usize) -> Result<()> {
        let snapshot = &update.snapshot;
        if self.json {
            let line = UpdateJson {
                new_records: update.new_records,
                new_media: update.new_media,
                records: snapshot.records.len(),
                media: snapshot.media.len(),
                connected,
            };
            println!(
                "{}",
                serde_json::to_string(&line).context("failed to serialize update JSON")?
            );
            return Ok(());
        }
        println!(
            "{} +{} notes, +{} media | {} notes, {} media | {}/{} relays connected",
            Local::now().format("%H:%M:%S").to_string().bright_black(),
            update.new_records.to_string().green(),
            update.new_media.to_string().green(),
            snapshot.records.len(),
            snapshot.media.len(),
            connected,
            total,
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct UpdateJson {
    new_records: usize,
    new_media: usize,
    records: usize,
    media: usize,
    connected: usize,
}

#[derive(Tabled)]
struct NoteRow {
    #[tabled(rename = "time")]
    time: String,
    #[tabled(rename = "author")]
    author: String,
    #[tabled(rename = "note")]
    content: String,
}

fn print_summary(snapshot: Option<&FeedSnapshot>) {
    let Some(snapshot) = snapshot.filter(|s| !s.records.is_empty() || !s.media.is_empty()) else {
        println!("0 notes received");
        return;
    };

    let videos = snapshot
        .media
        .iter()
        .filter(|m| m.kind == MediaKind::Video)
        .count();
    println!(
        "{} notes, {} images, {} videos",
        snapshot.records.len(),
        snapshot.media.len() - videos,
        videos
    );

    let mut newest: Vec<_> = snapshot.records.iter().collect();
    newest.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let rows: Vec<NoteRow> = newest
        .into_iter()
        .take(PREVIEW_ROWS)
        .map(|record| NoteRow {
            time: record
                .created_at_utc()
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            author: record.author_key.chars().take(12).collect(),
            content: preview(&record.content),
        })
        .collect();
    if rows.is_empty() {
        return;
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn preview(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(PREVIEW_CHARS - 1).collect();
    cut.push('…');
    cut
}
