//! Database lock recovery.
//!
//! Blocking; the supervisor runs it on `spawn_blocking`. Best effort: a
//! missing lock file is fine and failures become WARN entries.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};

use haven_core::types::LogEntry;

use crate::paths::{lock_path, DB_PARTITIONS, LOCK_FILE};

/// Remove every partition lock under `<data_dir>/db/` and force-kill stray
/// workers named `worker_name`. Returns the entries to record.
pub fn clear_locks(data_dir: &Path, worker_name: &str) -> Vec<LogEntry> {
    let mut entries = Vec::new();

    for partition in DB_PARTITIONS {
        let path = lock_path(data_dir, partition);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "removed database lock");
                entries.push(LogEntry::info(format!(
                    "Deleted lock file: {LOCK_FILE} in {partition}"
                )));
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove lock");
                entries.push(LogEntry::warn(format!(
                    "Could not delete {}: {err}",
                    path.display()
                )));
            }
        }
    }

    kill_stray_workers(worker_name);

    entries.push(LogEntry::info(
        "Database locks cleared. You can now try starting the relay again.",
    ));
    entries
}

fn kill_stray_workers(worker_name: &str) {
    // pkill exits 1 when nothing matched; only a failed spawn is worth noting.
    let status = Command::new("pkill")
        .arg("-9")
        .arg(worker_name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = status {
        tracing::warn!(worker = worker_name, error = %err, "pkill unavailable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // A name no real process carries, so pkill never matches anything.
    const NO_SUCH_WORKER: &str = "haven-test-no-such-worker";

    #[test]
    fn removes_present_locks_and_ignores_missing() {
        let dir = TempDir::new().expect("tmp");
        for partition in ["chat", "inbox"] {
            let lock = lock_path(dir.path(), partition);
            fs::create_dir_all(lock.parent().expect("parent")).expect("mkdir");
            fs::write(&lock, "").expect("lock");
        }

        let entries = clear_locks(dir.path(), NO_SUCH_WORKER);

        let messages: Vec<&str> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Deleted lock file: LOCK in chat",
                "Deleted lock file: LOCK in inbox",
                "Database locks cleared. You can now try starting the relay again.",
            ]
        );
        assert!(!lock_path(dir.path(), "chat").exists());
        assert!(!lock_path(dir.path(), "inbox").exists());
    }

    #[test]
    fn empty_data_dir_is_not_an_error() {
        let dir = TempDir::new().expect("tmp");
        let entries = clear_locks(&dir.path().join("absent"), NO_SUCH_WORKER);
        assert_eq!(entries.len(), 1);
    }
}
