//! Haven core library: shared domain types, relay configuration, errors.
//!
//! - [`types`]: process state, log entries, records, media references
//! - [`config`]: [`RelayConfig`] snapshot and its YAML persistence
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::RelayConfig;
pub use error::ConfigError;
pub use types::{
    LogEntry, LogLevel, MediaKind, MediaReference, ProcessState, Record, RecordKind,
};
