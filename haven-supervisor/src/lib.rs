//! Relay worker supervision: lifecycle, output classification, one-shot import.

mod error;
pub mod import;
pub mod locks;
mod options;
pub mod paths;
pub mod process;
pub mod state;
mod supervisor;
pub mod workspace;

pub use error::SupervisorError;
pub use import::ImportRun;
pub use options::SupervisorOptions;
pub use supervisor::Supervisor;
pub use workspace::RelayWorkspace;
