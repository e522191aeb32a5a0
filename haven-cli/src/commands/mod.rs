pub mod config;
pub mod feed;
pub mod relay;

use anyhow::{Context, Result};

/// Multi-thread runtime for the async commands.
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")
}

pub(crate) fn home() -> Result<std::path::PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}
