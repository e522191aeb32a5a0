//! Domain types shared by the supervisor, the feed, and the CLI.
//!
//! Everything here is plain data: no I/O, no interior mutability. Ownership of
//! the live instances is described on the owning components, not here.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Process state
// ---------------------------------------------------------------------------

/// Operational state of the supervised relay worker.
///
/// `importing` and `booting` are never both true. `running` is true only while
/// an OS-level child process is alive.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessState {
    pub running: bool,
    pub booting: bool,
    pub boot_status: String,
    pub importing: bool,
    pub import_status: String,
    /// Estimated import completion in `[0, 1]`.
    pub import_progress: f64,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Live client connections reported by the worker, floored at zero.
    pub active_connections: u32,
    /// Cumulative stored-event count; monotonic for the supervisor's lifetime.
    pub events_stored: u64,
}

// ---------------------------------------------------------------------------
// Log entries
// ---------------------------------------------------------------------------

/// Severity of a captured log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// One captured line of worker output or supervisor commentary. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Numeric record kind as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKind(pub u32);

impl RecordKind {
    /// Short text note.
    pub const NOTE: RecordKind = RecordKind(1);
    /// File metadata; carries its media URL in a `url` tag.
    pub const FILE_METADATA: RecordKind = RecordKind(1063);
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for RecordKind {
    fn from(kind: u32) -> Self {
        Self(kind)
    }
}

/// A timestamped, content-addressed event received from a subscription.
///
/// Identity is `id`; two records with the same `id` are the same record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(rename = "pubkey")]
    pub author_key: String,
    /// Unix seconds.
    pub created_at: i64,
    pub kind: RecordKind,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl Record {
    pub fn created_at_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.created_at, 0).unwrap_or_default()
    }

    /// Value of the first tag named `name` that carries a value.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.len() >= 2 && tag[0] == name)
            .map(|tag| tag[1].as_str())
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Displayable media extracted from (or tagged on) a record.
///
/// Deduplicated by `url` when presented, not when stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub id: Uuid,
    pub url: String,
    pub kind: MediaKind,
    pub added_at: DateTime<Utc>,
}

impl MediaReference {
    pub fn new(url: impl Into<String>, kind: MediaKind, added_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            kind,
            added_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_display() {
        assert_eq!(LogLevel::Info.to_string(), "INFO");
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
        assert_eq!(LogLevel::Error.to_string(), "ERROR");
    }

    #[test]
    fn log_entries_get_distinct_ids() {
        let a = LogEntry::info("same");
        let b = LogEntry::info("same");
        assert_ne!(a.id, b.id);
        assert_eq!(a.message, b.message);
    }

    #[test]
    fn record_decodes_wire_shape() {
        let json = r#"{
            "id": "abc",
            "pubkey": "npubkey",
            "created_at": 1700000000,
            "kind": 1,
            "tags": [["p", "x"], ["url", "https://m.example/a.png"]],
            "content": "hello",
            "sig": "deadbeef"
        }"#;
        let record: Record = serde_json::from_str(json).expect("decode");
        assert_eq!(record.kind, RecordKind::NOTE);
        assert_eq!(record.author_key, "npubkey");
        assert_eq!(record.tag_value("url"), Some("https://m.example/a.png"));
        assert_eq!(record.tag_value("e"), None);
        assert_eq!(record.created_at_utc().timestamp(), 1_700_000_000);
    }

    #[test]
    fn record_tolerates_missing_optional_fields() {
        let json = r#"{"id":"x","pubkey":"p","created_at":1,"kind":1063}"#;
        let record: Record = serde_json::from_str(json).expect("decode");
        assert!(record.tags.is_empty());
        assert!(record.content.is_empty());
        assert!(record.sig.is_none());
        assert_eq!(record.kind, RecordKind::FILE_METADATA);
    }

    #[test]
    fn default_process_state_is_idle() {
        let state = ProcessState::default();
        assert!(!state.running && !state.booting && !state.importing && !state.locked);
        assert_eq!(state.events_stored, 0);
        assert!(state.started_at.is_none());
    }
}
