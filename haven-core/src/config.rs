//! Relay configuration snapshot and its YAML persistence.
//!
//! # Storage layout
//!
//! ```text
//! ~/.haven/
//!   config.yaml   (mode 0600, created by `save`)
//! ```
//!
//! # API pattern
//!
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

pub const CONFIG_FILE: &str = "config.yaml";

/// Settings the supervisor needs to bootstrap and launch the worker.
///
/// Passed by value into `start` / `import_notes`; the supervisor keeps its own
/// copy for the duration of a pending import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub owner_npub: String,
    pub relay_url: String,
    pub relay_port: u16,
    pub db_engine: String,
    pub log_level: String,
    pub blossom_path: String,
    /// First day the one-shot import fetches from, `YYYY-MM-DD`.
    pub import_start_date: String,
    pub import_seed_relays_file: String,
    pub import_seed_relays: Vec<String>,
    pub blastr_relays_file: String,
    pub blastr_relays: Vec<String>,
    /// Explicit worker executable; checked before the bundled and system locations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_binary: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            owner_npub: String::new(),
            relay_url: String::new(),
            relay_port: 3355,
            db_engine: "badger".to_string(),
            log_level: "INFO".to_string(),
            blossom_path: "blossom/".to_string(),
            import_start_date: "2023-01-01".to_string(),
            import_seed_relays_file: "relays_import.json".to_string(),
            import_seed_relays: vec![
                "wss://relay.damus.io".to_string(),
                "wss://relay.primal.net".to_string(),
                "wss://relay.snort.social".to_string(),
                "wss://relay.nos.social".to_string(),
            ],
            blastr_relays_file: "relays_blastr.json".to_string(),
            blastr_relays: vec![
                "wss://relay.damus.io".to_string(),
                "wss://relay.primal.net".to_string(),
                "wss://nos.lol".to_string(),
                "wss://nostr.wine".to_string(),
            ],
            worker_binary: None,
        }
    }
}

impl RelayConfig {
    /// Parsed `import_start_date`.
    pub fn import_start(&self) -> Result<NaiveDate, ConfigError> {
        NaiveDate::parse_from_str(self.import_start_date.trim(), "%Y-%m-%d")
            .map_err(|_| ConfigError::InvalidStartDate(self.import_start_date.clone()))
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.haven/`
pub fn config_dir_at(home: &Path) -> PathBuf {
    home.join(".haven")
}

/// `<home>/.haven/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    config_dir_at(home).join(CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load the config from `<home>/.haven/config.yaml`.
///
/// A missing file yields [`RelayConfig::default`]; a malformed one yields
/// `ConfigError::Parse` with path and line context.
pub fn load_at(home: &Path) -> Result<RelayConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(RelayConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<RelayConfig, ConfigError> {
    load_at(&home()?)
}

/// Write the config to `<home>/.haven/config.yaml`, creating the directory.
pub fn save_at(home: &Path, config: &RelayConfig) -> Result<PathBuf, ConfigError> {
    let dir = config_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    let path = config_path_at(home);
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&path, yaml).map_err(|e| io_err(&path, e))?;
    set_file_permissions(&path)?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(config: &RelayConfig) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, config)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
