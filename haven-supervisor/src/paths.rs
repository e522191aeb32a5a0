use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DATA_DIR_NAME: &str = "haven_relay";
pub const WORKER_BINARY: &str = "haven";
pub const SYSTEM_WORKER_PATH: &str = "/usr/local/bin/haven";

pub const ENV_FILE: &str = ".env";
pub const TEMPLATES_DIR: &str = "templates";
pub const LOCK_FILE: &str = "LOCK";

/// Database partitions the worker keeps under `db/`, each with its own lock.
pub const DB_PARTITIONS: [&str; 5] = ["blossom", "chat", "inbox", "outbox", "private"];

pub const IMPORT_FLAG: &str = "--import";

pub const STOP_GRACE: Duration = Duration::from_millis(500);
pub const RESTART_DELAY: Duration = Duration::from_secs(1);
pub const LOG_CAPACITY: usize = 1000;

pub fn data_dir(home: &Path) -> PathBuf {
    home.join(DATA_DIR_NAME)
}

pub fn db_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("db")
}

pub fn lock_path(data_dir: &Path, partition: &str) -> PathBuf {
    db_dir(data_dir).join(partition).join(LOCK_FILE)
}

pub fn env_path(data_dir: &Path) -> PathBuf {
    data_dir.join(ENV_FILE)
}

pub fn templates_path(data_dir: &Path) -> PathBuf {
    data_dir.join(TEMPLATES_DIR)
}

/// `<dir of the running binary>/haven`, when the running binary can be located.
pub fn bundled_worker_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BINARY)))
}

/// `<dir of the running binary>/templates`, the bundled copy refreshed on every start.
pub fn bundled_templates_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(TEMPLATES_DIR)))
}
