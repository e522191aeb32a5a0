//! Filesystem collaborator: the relay data directory and the worker binary.
//!
//! Everything here is synchronous and returns the [`LogEntry`]s it wants
//! recorded instead of touching the supervisor's log buffer. Bootstrap is
//! check-then-create; only `templates/` is replaced wholesale on serve start.

use std::fs;
use std::path::{Path, PathBuf};

use tera::{Context, Tera};

use haven_core::types::LogEntry;
use haven_core::RelayConfig;

use crate::error::{io_err, SupervisorError};
use crate::paths;

const ENV_TEMPLATE: &str = include_str!("templates/env.tera");

/// Outcome of writing one bootstrap file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileWrite {
    Written { path: PathBuf },
    Unchanged { path: PathBuf },
    Kept { path: PathBuf },
}

/// The per-user relay data directory plus where to find the worker.
#[derive(Debug, Clone)]
pub struct RelayWorkspace {
    data_dir: PathBuf,
    templates_source: Option<PathBuf>,
    executables: Vec<PathBuf>,
}

impl RelayWorkspace {
    /// Workspace rooted at `data_dir`, looking for the bundled worker first and
    /// the system install second.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let mut executables = Vec::new();
        if let Some(bundled) = paths::bundled_worker_path() {
            executables.push(bundled);
        }
        executables.push(PathBuf::from(paths::SYSTEM_WORKER_PATH));
        Self {
            data_dir: data_dir.into(),
            templates_source: paths::bundled_templates_path(),
            executables,
        }
    }

    /// `<home>/haven_relay`.
    pub fn for_home(home: &Path) -> Self {
        Self::new(paths::data_dir(home))
    }

    pub fn with_templates_source(mut self, source: Option<PathBuf>) -> Self {
        self.templates_source = source;
        self
    }

    /// Replace the executable lookup order.
    pub fn with_executables(mut self, executables: Vec<PathBuf>) -> Self {
        self.executables = executables;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Inputs for a normal serve run: fresh templates, relay lists synced from
    /// `config`, and an env file when none exists yet.
    pub fn prepare_serve(&self, config: &RelayConfig) -> Result<Vec<LogEntry>, SupervisorError> {
        let mut entries = Vec::new();
        self.ensure_data_dir()?;
        entries.push(self.refresh_templates()?);

        let seed = self.data_dir.join(&config.import_seed_relays_file);
        write_relay_list(&seed, &config.import_seed_relays, true)?;

        let blastr = self.data_dir.join(&config.blastr_relays_file);
        if let FileWrite::Written { .. } = write_relay_list(&blastr, &config.blastr_relays, true)? {
            entries.push(LogEntry::info(format!(
                "Wrote {} blastr relays to {}",
                config.blastr_relays.len(),
                config.blastr_relays_file
            )));
        }

        self.ensure_env_file(config)?;
        Ok(entries)
    }

    /// Inputs for a one-shot import: create whatever is missing, overwrite nothing.
    pub fn prepare_import(&self, config: &RelayConfig) -> Result<Vec<LogEntry>, SupervisorError> {
        let mut entries = Vec::new();
        self.ensure_data_dir()?;
        if let FileWrite::Written { path } = self.ensure_env_file(config)? {
            entries.push(LogEntry::info(format!("Created {}", path.display())));
        }
        let seed = self.data_dir.join(&config.import_seed_relays_file);
        write_relay_list(&seed, &config.import_seed_relays, false)?;
        let blastr = self.data_dir.join(&config.blastr_relays_file);
        write_relay_list(&blastr, &config.blastr_relays, false)?;
        Ok(entries)
    }

    /// First existing executable in lookup order, with the entries describing
    /// any fallback taken.
    pub fn locate_executable(
        &self,
        config: &RelayConfig,
    ) -> Result<(PathBuf, Vec<LogEntry>), SupervisorError> {
        let candidates: Vec<PathBuf> = config
            .worker_binary
            .iter()
            .cloned()
            .chain(self.executables.iter().cloned())
            .collect();

        let mut entries = Vec::new();
        for (idx, candidate) in candidates.iter().enumerate() {
            if candidate.is_file() {
                if let Some(entry) = ensure_executable(candidate)? {
                    entries.push(entry);
                }
                return Ok((candidate.clone(), entries));
            }
            if let Some(next) = candidates.get(idx + 1) {
                entries.push(LogEntry::warn(format!(
                    "haven binary not found at {}, trying {}",
                    candidate.display(),
                    next.display()
                )));
            }
        }
        Err(SupervisorError::ExecutableNotFound {
            searched: candidates,
        })
    }

    /// Render the worker env file from `config`.
    pub fn render_env(config: &RelayConfig) -> Result<String, SupervisorError> {
        let context = Context::from_serialize(config)?;
        Ok(Tera::one_off(ENV_TEMPLATE, &context, false)?)
    }

    fn ensure_data_dir(&self) -> Result<(), SupervisorError> {
        if !self.data_dir.exists() {
            fs::create_dir_all(&self.data_dir).map_err(|e| io_err(&self.data_dir, e))?;
        }
        Ok(())
    }

    fn ensure_env_file(&self, config: &RelayConfig) -> Result<FileWrite, SupervisorError> {
        let path = paths::env_path(&self.data_dir);
        if path.exists() {
            return Ok(FileWrite::Kept { path });
        }
        write_atomic(&path, &Self::render_env(config)?)?;
        Ok(FileWrite::Written { path })
    }

    fn refresh_templates(&self) -> Result<LogEntry, SupervisorError> {
        let Some(source) = self.templates_source.as_ref().filter(|src| src.is_dir()) else {
            return Ok(LogEntry::warn("Templates folder not found in bundle"));
        };
        let dest = paths::templates_path(&self.data_dir);
        if dest.exists() {
            fs::remove_dir_all(&dest).map_err(|e| io_err(&dest, e))?;
        }
        copy_dir(source, &dest)?;
        Ok(LogEntry::info(format!(
            "Copied templates to {}",
            dest.display()
        )))
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Write `relays` as pretty JSON. With `sync` the file follows the config;
/// without it an existing file is left alone.
fn write_relay_list(path: &Path, relays: &[String], sync: bool) -> Result<FileWrite, SupervisorError> {
    if path.exists() {
        if !sync {
            return Ok(FileWrite::Kept {
                path: path.to_path_buf(),
            });
        }
        let current = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        if serde_json::from_str::<Vec<String>>(&current).ok().as_deref() == Some(relays) {
            return Ok(FileWrite::Unchanged {
                path: path.to_path_buf(),
            });
        }
    }
    write_atomic(path, &serde_json::to_string_pretty(relays)?)?;
    Ok(FileWrite::Written {
        path: path.to_path_buf(),
    })
}

fn write_atomic(path: &Path, content: &str) -> Result<(), SupervisorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = PathBuf::from(format!("{}.haven.tmp", path.display()));
    fs::write(&tmp, content).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

fn copy_dir(src: &Path, dst: &Path) -> Result<(), SupervisorError> {
    fs::create_dir_all(dst).map_err(|e| io_err(dst, e))?;
    for entry in fs::read_dir(src).map_err(|e| io_err(src, e))? {
        let entry = entry.map_err(|e| io_err(src, e))?;
        let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
        let target = dst.join(entry.file_name());
        if ty.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| io_err(&target, e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn ensure_executable(path: &Path) -> Result<Option<LogEntry>, SupervisorError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)
        .map_err(|e| io_err(path, e))?
        .permissions()
        .mode();
    if mode & 0o111 != 0 {
        return Ok(None);
    }
    match fs::set_permissions(path, fs::Permissions::from_mode(0o755)) {
        Ok(()) => Ok(Some(LogEntry::info("Fixed permissions for binary"))),
        Err(err) => Ok(Some(LogEntry::warn(format!(
            "Could not set permissions: {err}"
        )))),
    }
}

#[cfg(not(unix))]
fn ensure_executable(_path: &Path) -> Result<Option<LogEntry>, SupervisorError> {
    Ok(None)
}
