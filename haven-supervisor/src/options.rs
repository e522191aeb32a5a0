use std::path::Path;
use std::time::Duration;

use crate::paths::{LOG_CAPACITY, RESTART_DELAY, STOP_GRACE, WORKER_BINARY};
use crate::workspace::RelayWorkspace;

/// Tunables for one supervisor instance.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub workspace: RelayWorkspace,
    /// Process name used when force-killing stray workers.
    pub worker_name: String,
    /// How long `stop()` waits before reporting completion.
    pub stop_grace: Duration,
    /// Pause between a successful import and the automatic restart.
    pub restart_delay: Duration,
    pub log_capacity: usize,
}

impl SupervisorOptions {
    pub fn new(workspace: RelayWorkspace) -> Self {
        Self {
            workspace,
            worker_name: WORKER_BINARY.to_string(),
            stop_grace: STOP_GRACE,
            restart_delay: RESTART_DELAY,
            log_capacity: LOG_CAPACITY,
        }
    }

    /// Defaults for the relay under `<home>/haven_relay`.
    pub fn for_home(home: &Path) -> Self {
        Self::new(RelayWorkspace::for_home(home))
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }
}
