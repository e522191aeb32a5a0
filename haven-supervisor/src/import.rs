//! Import progress model.
//!
//! Progress is an estimate with a fixed ordering of checkpoints:
//! connect < date scan < tagged start < tagged done < complete.

use chrono::NaiveDate;

use haven_core::RelayConfig;

pub const PROGRESS_CONNECTED: f64 = 0.1;
pub const PROGRESS_SCAN_END: f64 = 0.9;
pub const PROGRESS_TAGGED: f64 = 0.85;
pub const PROGRESS_TAGGED_DONE: f64 = 0.95;
pub const PROGRESS_DONE: f64 = 1.0;

/// Step taken for an empty window with no usable date, and its ceiling.
pub const EMPTY_WINDOW_STEP: f64 = 0.03;
pub const EMPTY_WINDOW_CEILING: f64 = 0.85;

/// The import currently requested or running.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRun {
    pub start_date: NaiveDate,
    /// Set while a serve run is being stopped to make room for the import.
    pub pending_config: Option<RelayConfig>,
}

impl ImportRun {
    pub fn new(start_date: NaiveDate) -> Self {
        Self {
            start_date,
            pending_config: None,
        }
    }

    pub fn pending(start_date: NaiveDate, config: RelayConfig) -> Self {
        Self {
            start_date,
            pending_config: Some(config),
        }
    }
}

/// Linear position of `current` between `start` and `today`, mapped onto
/// `[0.1, 0.9]`. A degenerate window counts as fully scanned.
pub fn scaled_progress(start: NaiveDate, current: NaiveDate, today: NaiveDate) -> f64 {
    let total = (today - start).num_days();
    if total <= 0 {
        return PROGRESS_SCAN_END;
    }
    let elapsed = (current - start).num_days() as f64;
    let span = PROGRESS_SCAN_END - PROGRESS_CONNECTED;
    (PROGRESS_CONNECTED + span * elapsed / total as f64).clamp(PROGRESS_CONNECTED, PROGRESS_SCAN_END)
}

/// Next value after an empty import window.
pub fn empty_window_step(current: f64) -> f64 {
    (current + EMPTY_WINDOW_STEP).min(EMPTY_WINDOW_CEILING).max(current)
}

/// Progress never moves backwards within a run.
pub fn advance(current: f64, candidate: f64) -> f64 {
    current.max(candidate)
}
