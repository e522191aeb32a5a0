//! The supervisor's owned state and every rule that mutates it.
//!
//! Pure: no I/O, no clocks except what callers pass in. The actor in
//! `supervisor` is the only owner, so nothing here needs synchronisation.

use std::collections::VecDeque;

use chrono::{DateTime, NaiveDate, Utc};

use haven_classifier::{classify, level_of, ClassifyContext, Signal};
use haven_core::types::{LogEntry, ProcessState};

use crate::import::{self, ImportRun};
use crate::process::RunMode;

pub const BOOT_STATUS_STARTING: &str = "Starting system...";
pub const IMPORT_STATUS_STARTING: &str = "Starting import...";
pub const IMPORT_STATUS_CANCELLED: &str = "Import cancelled";

/// How a finished run should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// The run ended on its own or after a plain stop.
    Natural,
    /// The run was an import the caller cancelled or dismissed.
    Abandoned,
}

#[derive(Debug)]
pub struct SupervisorState {
    process: ProcessState,
    logs: VecDeque<LogEntry>,
    capacity: usize,
    import: Option<ImportRun>,
}

impl SupervisorState {
    pub fn new(capacity: usize) -> Self {
        Self {
            process: ProcessState::default(),
            logs: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            import: None,
        }
    }

    pub fn process(&self) -> &ProcessState {
        &self.process
    }

    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    pub fn import(&self) -> Option<&ImportRun> {
        self.import.as_ref()
    }

    /// Whether a stop is waiting to hand over to an import.
    pub fn import_pending(&self) -> bool {
        self.import
            .as_ref()
            .is_some_and(|run| run.pending_config.is_some())
    }

    pub fn push_log(&mut self, entry: LogEntry) {
        while self.logs.len() >= self.capacity {
            self.logs.pop_front();
        }
        self.logs.push_back(entry);
    }

    // -----------------------------------------------------------------------
    // Lifecycle transitions
    // -----------------------------------------------------------------------

    pub fn mark_serving(&mut self, now: DateTime<Utc>) {
        let p = &mut self.process;
        p.running = true;
        p.booting = true;
        p.boot_status = BOOT_STATUS_STARTING.to_string();
        p.importing = false;
        p.locked = false;
        p.started_at = Some(now);
    }

    pub fn mark_importing(&mut self, run: ImportRun, now: DateTime<Utc>) {
        let p = &mut self.process;
        p.running = true;
        p.booting = false;
        p.boot_status.clear();
        p.importing = true;
        p.import_progress = 0.0;
        p.import_status = IMPORT_STATUS_STARTING.to_string();
        p.started_at = Some(now);
        self.import = Some(run);
    }

    /// Record a pending import to launch once the current run exits.
    pub fn set_pending_import(&mut self, run: ImportRun) {
        self.import = Some(run);
    }

    /// Drop the pending import, returning its config if one was waiting.
    pub fn take_pending_config(&mut self) -> Option<haven_core::RelayConfig> {
        self.import.as_mut().and_then(|run| run.pending_config.take())
    }

    pub fn cancel_import(&mut self) {
        let p = &mut self.process;
        p.importing = false;
        p.import_progress = 0.0;
        p.import_status = IMPORT_STATUS_CANCELLED.to_string();
        self.import = None;
    }

    pub fn dismiss_import(&mut self) {
        self.process.importing = false;
    }

    pub fn clear_locked(&mut self) {
        self.process.locked = false;
    }

    /// Apply a worker exit. Returns the config to restart with when a
    /// successful import was waiting to hand back to a serve run.
    pub fn finish_run(&mut self, mode: RunMode, code: i32, kind: ExitKind) -> Option<haven_core::RelayConfig> {
        self.push_log(LogEntry::warn(format!(
            "Relay process terminated with code: {code}"
        )));

        let p = &mut self.process;
        p.running = false;
        p.booting = false;
        p.boot_status.clear();

        match (mode, kind) {
            (RunMode::Serve, _) => {
                p.importing = false;
                None
            }
            (RunMode::Import, ExitKind::Abandoned) => {
                p.importing = false;
                None
            }
            (RunMode::Import, ExitKind::Natural) if code == 0 => {
                p.importing = false;
                p.import_progress = import::PROGRESS_DONE;
                let restart = self.import.take().and_then(|run| run.pending_config);
                p.import_status = if restart.is_some() {
                    "Import Complete - Restarting".to_string()
                } else {
                    "Import Complete".to_string()
                };
                restart
            }
            (RunMode::Import, ExitKind::Natural) => {
                // Stays importing so the failure remains visible until dismissed.
                p.import_status = format!("Import Failed (code {code})");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Output lines
    // -----------------------------------------------------------------------

    /// Classify one worker line, apply its signals, and store it.
    pub fn apply_line(&mut self, line: &str, today: NaiveDate) {
        let context = ClassifyContext {
            importing: self.process.importing,
            booting: self.process.booting,
        };
        for signal in classify(line, context) {
            self.apply_signal(signal, today);
        }
        self.push_log(LogEntry::new(level_of(line), line));
    }

    fn apply_signal(&mut self, signal: Signal, today: NaiveDate) {
        let start_date = self.import.as_ref().map(|run| run.start_date);
        let p = &mut self.process;
        match signal {
            Signal::BootPhase(phase) => {
                if p.booting {
                    p.boot_status = phase;
                }
            }
            Signal::BootComplete => {
                p.booting = false;
                p.boot_status.clear();
            }
            Signal::ImportConnected => {
                p.import_progress = import::advance(p.import_progress, import::PROGRESS_CONNECTED);
                p.import_status = "Connected to relays...".to_string();
            }
            Signal::ImportProgressHint(day) => {
                if let Some(start) = start_date {
                    let scaled = import::scaled_progress(start, day, today);
                    p.import_progress = import::advance(p.import_progress, scaled);
                }
            }
            Signal::ImportRangeFound(from) => {
                p.import_status = match from {
                    Some(from) => format!("Found notes from {from}..."),
                    None => "Found notes...".to_string(),
                };
            }
            Signal::ImportTaggedStarted => {
                p.import_progress = import::advance(p.import_progress, import::PROGRESS_TAGGED);
                p.import_status = "Importing tagged notes...".to_string();
            }
            Signal::ImportTaggedDone(count) => {
                p.import_progress =
                    import::advance(p.import_progress, import::PROGRESS_TAGGED_DONE);
                p.import_status = match count {
                    Some(count) => format!("Imported {count} tagged notes"),
                    None => "Tagged notes imported".to_string(),
                };
            }
            Signal::ImportComplete => {
                p.import_progress = import::PROGRESS_DONE;
                p.import_status = "Import Complete".to_string();
            }
            Signal::ImportNoneFound { until, checking } => {
                match (until, start_date) {
                    (Some(day), Some(start)) => {
                        let scaled = import::scaled_progress(start, day, today);
                        p.import_progress = import::advance(p.import_progress, scaled);
                    }
                    (Some(_), None) => {}
                    (None, _) => p.import_progress = import::empty_window_step(p.import_progress),
                }
                if let Some(checking) = checking {
                    p.import_status = format!("Checking {checking}... (No notes found)");
                }
            }
            Signal::EventCountDelta(count) => {
                p.events_stored = p.events_stored.saturating_add(count);
            }
            Signal::ConnectionDelta(delta) => {
                p.active_connections = p.active_connections.saturating_add_signed(delta);
            }
            Signal::LockDetected => p.locked = true,
        }
    }
}
