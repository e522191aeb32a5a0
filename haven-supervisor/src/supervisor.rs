//! Supervisor actor and its cloneable handle.
//!
//! One task owns [`SupervisorState`] and the live worker. Caller commands,
//! worker output and internal timers all arrive as messages, so every state
//! mutation happens on that task. Readers get snapshots through a `watch`
//! channel and never block the actor.

use chrono::{Local, Utc};
use tokio::sync::{mpsc, oneshot, watch};

use haven_core::types::{LogEntry, LogLevel, ProcessState};
use haven_core::RelayConfig;

use crate::error::SupervisorError;
use crate::import::ImportRun;
use crate::locks;
use crate::options::SupervisorOptions;
use crate::process::{spawn_worker, RunId, RunMode, WorkerEvent, WorkerProcess};
use crate::state::{ExitKind, SupervisorState};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

enum Command {
    Start {
        config: RelayConfig,
        respond_to: oneshot::Sender<()>,
    },
    Stop {
        respond_to: oneshot::Sender<()>,
    },
    ImportNotes {
        config: RelayConfig,
        respond_to: oneshot::Sender<()>,
    },
    CancelImport {
        respond_to: oneshot::Sender<()>,
    },
    DismissImport {
        respond_to: oneshot::Sender<()>,
    },
    ClearLocks {
        respond_to: oneshot::Sender<()>,
    },
    Logs {
        respond_to: oneshot::Sender<Vec<LogEntry>>,
    },
    ImportPending {
        respond_to: oneshot::Sender<bool>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

enum Internal {
    LocksCleared {
        entries: Vec<LogEntry>,
        respond_to: oneshot::Sender<()>,
    },
    Restart(RelayConfig),
}

/// Why the current run is being torn down.
#[derive(Debug)]
enum Ending {
    Stop,
    /// Stopping a serve run so the pending import can take over.
    ImportHandoff,
    Cancel,
    /// Dismissed; restart with this config once the worker is gone.
    Dismiss(Option<RelayConfig>),
    Shutdown,
}

struct ActiveRun {
    worker: WorkerProcess,
    /// Cleared on stop; output from a detached run is dropped.
    attached: bool,
    ending: Option<Ending>,
}

impl ActiveRun {
    fn end(&mut self, ending: Ending) {
        self.attached = false;
        self.ending = Some(ending);
        self.worker.terminate();
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable handle to a supervisor task. Dropping every handle shuts it down.
#[derive(Clone)]
pub struct Supervisor {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ProcessState>,
}

impl Supervisor {
    /// Spawn the supervisor task on the current tokio runtime.
    pub fn spawn(options: SupervisorOptions) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ProcessState::default());
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let actor = SupervisorActor {
            state: SupervisorState::new(options.log_capacity),
            options,
            active: None,
            next_run: 1,
            state_tx,
            worker_tx,
            internal_tx,
        };
        tokio::spawn(actor.run(commands_rx, worker_rx, internal_rx));

        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    /// Launch the relay. No-op while a worker is alive; begins a pending
    /// import instead when one is waiting.
    pub async fn start(&self, config: RelayConfig) -> Result<(), SupervisorError> {
        self.request(|respond_to| Command::Start { config, respond_to }).await
    }

    /// Request graceful termination. Completes after the grace delay, not on
    /// process exit; a no-op when nothing is running.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        self.request(|respond_to| Command::Stop { respond_to }).await
    }

    /// Run the one-shot import, stopping the relay first if it is serving.
    pub async fn import_notes(&self, config: RelayConfig) -> Result<(), SupervisorError> {
        self.request(|respond_to| Command::ImportNotes { config, respond_to })
            .await
    }

    pub async fn cancel_import(&self) -> Result<(), SupervisorError> {
        self.request(|respond_to| Command::CancelImport { respond_to })
            .await
    }

    /// Hide the import overlay, restarting the relay if an import had
    /// interrupted it.
    pub async fn dismiss_import(&self) -> Result<(), SupervisorError> {
        self.request(|respond_to| Command::DismissImport { respond_to })
            .await
    }

    /// Remove database locks and kill stray workers off the actor task.
    /// Resolves once the `locked` flag has been cleared.
    pub async fn clear_locks(&self) -> Result<(), SupervisorError> {
        self.request(|respond_to| Command::ClearLocks { respond_to })
            .await
    }

    /// Copy of the capped log buffer, oldest first.
    pub async fn logs(&self) -> Result<Vec<LogEntry>, SupervisorError> {
        self.request(|respond_to| Command::Logs { respond_to }).await
    }

    /// Whether an import is waiting for the current run to stop.
    pub async fn import_pending(&self) -> Result<bool, SupervisorError> {
        self.request(|respond_to| Command::ImportPending { respond_to })
            .await
    }

    pub fn snapshot(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state.clone()
    }

    /// Terminate any live worker and end the supervisor task.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        self.request(|respond_to| Command::Shutdown { respond_to })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| SupervisorError::ChannelClosed("supervisor commands"))?;
        rx.await
            .map_err(|_| SupervisorError::ChannelClosed("supervisor response"))
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct SupervisorActor {
    options: SupervisorOptions,
    state: SupervisorState,
    active: Option<ActiveRun>,
    next_run: RunId,
    state_tx: watch::Sender<ProcessState>,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl SupervisorActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut shutdown_reply = None;
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Shutdown { respond_to }) => {
                            shutdown_reply = Some(respond_to);
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                Some(event) = worker_rx.recv() => self.handle_worker(event).await,
                Some(internal) = internal_rx.recv() => self.handle_internal(internal).await,
            }
            self.publish();
        }

        self.shutdown(&mut worker_rx).await;
        self.publish();
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
        tracing::info!("supervisor stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { config, respond_to } => {
                self.start(config).await;
                self.reply(respond_to, ());
            }
            Command::Stop { respond_to } => self.stop(respond_to),
            Command::ImportNotes { config, respond_to } => {
                self.import_notes(config).await;
                self.reply(respond_to, ());
            }
            Command::CancelImport { respond_to } => {
                self.cancel_import();
                self.reply(respond_to, ());
            }
            Command::DismissImport { respond_to } => {
                self.dismiss_import().await;
                self.reply(respond_to, ());
            }
            Command::ClearLocks { respond_to } => self.clear_locks(respond_to),
            Command::Logs { respond_to } => {
                self.reply(respond_to, self.state.logs().cloned().collect());
            }
            Command::ImportPending { respond_to } => {
                self.reply(respond_to, self.state.import_pending());
            }
            Command::Shutdown { respond_to } => {
                // Handled by the loop; answer anyway so a caller never hangs.
                self.reply(respond_to, ());
            }
        }
    }

    async fn handle_worker(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Line { run, line } => {
                let attached = self
                    .active
                    .as_ref()
                    .is_some_and(|active| active.worker.run() == run && active.attached);
                if attached {
                    self.state.apply_line(&line, Local::now().date_naive());
                }
            }
            WorkerEvent::Exited { run, code } => {
                if !self.active.as_ref().is_some_and(|a| a.worker.run() == run) {
                    tracing::debug!(run, code, "exit from a finished run");
                    return;
                }
                if let Some(active) = self.active.take() {
                    self.on_exit(active, code).await;
                }
            }
        }
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::LocksCleared {
                entries,
                respond_to,
            } => {
                for entry in entries {
                    self.record(entry);
                }
                self.state.clear_locked();
                self.reply(respond_to, ());
            }
            Internal::Restart(config) => {
                tracing::info!("restarting relay after import");
                self.start(config).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    async fn start(&mut self, config: RelayConfig) {
        if self.active.is_some() {
            tracing::debug!("start ignored; worker already running");
            return;
        }
        if self.state.import_pending() {
            if let Some(pending) = self.state.take_pending_config() {
                tracing::info!("start picked up a pending import");
                self.begin_pending_import(pending).await;
                return;
            }
        }
        self.launch(RunMode::Serve, config, None).await;
    }

    fn stop(&mut self, respond_to: oneshot::Sender<()>) {
        let Some(active) = self.active.as_mut() else {
            let _ = respond_to.send(());
            return;
        };
        if active.ending.is_none() {
            active.end(Ending::Stop);
        }
        let grace = self.options.stop_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = respond_to.send(());
        });
    }

    async fn import_notes(&mut self, config: RelayConfig) {
        let start_date = match config.import_start() {
            Ok(date) => date,
            Err(err) => {
                self.record(LogEntry::error(err.to_string()));
                return;
            }
        };

        match self.active.as_ref().map(|active| active.worker.mode()) {
            Some(RunMode::Import) => {
                self.record(LogEntry::warn("Import already in progress"));
            }
            Some(RunMode::Serve) => {
                if let Some(active) = self.active.as_mut() {
                    active.end(Ending::ImportHandoff);
                }
                self.state
                    .set_pending_import(ImportRun::pending(start_date, config));
                tracing::info!(%start_date, "stopping relay for import");
            }
            None => {
                self.launch(RunMode::Import, config, Some(ImportRun::new(start_date)))
                    .await;
            }
        }
    }

    fn cancel_import(&mut self) {
        if let Some(active) = self.active.as_mut() {
            match active.worker.mode() {
                RunMode::Import => active.end(Ending::Cancel),
                // An import was waiting on this run's exit; the stop stands.
                RunMode::Serve if matches!(active.ending, Some(Ending::ImportHandoff)) => {
                    active.ending = Some(Ending::Stop);
                }
                RunMode::Serve => {}
            }
        }
        self.state.cancel_import();
    }

    async fn dismiss_import(&mut self) {
        let pending = self.state.take_pending_config();
        self.state.dismiss_import();
        if let Some(active) = self.active.as_mut() {
            active.end(Ending::Dismiss(pending));
        } else if let Some(config) = pending {
            self.start(config).await;
        }
    }

    fn clear_locks(&mut self, respond_to: oneshot::Sender<()>) {
        let data_dir = self.options.workspace.data_dir().to_path_buf();
        let worker_name = self.options.worker_name.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let entries = tokio::task::spawn_blocking(move || {
                locks::clear_locks(&data_dir, &worker_name)
            })
            .await
            .unwrap_or_else(|err| vec![LogEntry::error(format!("Lock clearing failed: {err}"))]);
            let _ = internal.send(Internal::LocksCleared {
                entries,
                respond_to,
            });
        });
    }

    // -----------------------------------------------------------------------
    // Run lifecycle
    // -----------------------------------------------------------------------

    /// Prepare the data directory, find the executable and spawn the worker.
    /// Any failure becomes an ERROR entry and leaves state untouched.
    async fn launch(&mut self, mode: RunMode, config: RelayConfig, import: Option<ImportRun>) {
        let workspace = self.options.workspace.clone();
        let prepared = tokio::task::spawn_blocking(move || {
            let mut entries = match mode {
                RunMode::Serve => workspace.prepare_serve(&config)?,
                RunMode::Import => workspace.prepare_import(&config)?,
            };
            let (program, lookup) = workspace.locate_executable(&config)?;
            entries.extend(lookup);
            Ok::<_, SupervisorError>((entries, program))
        })
        .await;

        let (entries, program) = match prepared {
            Ok(Ok(prepared)) => prepared,
            Ok(Err(err)) => {
                self.record(LogEntry::error(launch_failure(&err)));
                return;
            }
            Err(err) => {
                self.record(LogEntry::error(format!("Failed to prepare relay: {err}")));
                return;
            }
        };
        for entry in entries {
            self.record(entry);
        }

        let run = self.next_run;
        self.next_run += 1;
        let data_dir = self.options.workspace.data_dir();
        let worker = match spawn_worker(&program, data_dir, mode, run, self.worker_tx.clone()) {
            Ok(worker) => worker,
            Err(err) => {
                self.record(LogEntry::error(format!("Failed to start relay: {err}")));
                return;
            }
        };

        let now = Utc::now();
        match (mode, import) {
            (RunMode::Import, Some(import)) => self.state.mark_importing(import, now),
            _ => self.state.mark_serving(now),
        }
        self.active = Some(ActiveRun {
            worker,
            attached: true,
            ending: None,
        });
    }

    async fn begin_pending_import(&mut self, config: RelayConfig) {
        let start_date = match config.import_start() {
            Ok(date) => date,
            Err(err) => {
                self.record(LogEntry::error(err.to_string()));
                return;
            }
        };
        // Keep the config so a successful import can restart the relay with it.
        let import = ImportRun::pending(start_date, config.clone());
        self.launch(RunMode::Import, config.clone(), Some(import)).await;
        if self.active.is_none() {
            // Launch failed; leave the import pending for the next start.
            self.state
                .set_pending_import(ImportRun::pending(start_date, config));
        }
    }

    async fn on_exit(&mut self, active: ActiveRun, code: i32) {
        let mode = active.worker.mode();
        let kind = match active.ending {
            Some(Ending::Cancel) | Some(Ending::Dismiss(_)) => ExitKind::Abandoned,
            _ => ExitKind::Natural,
        };
        tracing::info!(run = active.worker.run(), code, ?mode, ending = ?active.ending, "run finished");
        let restart = self.state.finish_run(mode, code, kind);

        match active.ending {
            Some(Ending::Dismiss(Some(config))) => self.start(config).await,
            Some(Ending::Shutdown) => {}
            _ if mode == RunMode::Serve => {
                if let Some(config) = self.state.take_pending_config() {
                    self.begin_pending_import(config).await;
                }
            }
            _ => {
                if let Some(config) = restart {
                    self.schedule_restart(config);
                }
            }
        }
    }

    fn schedule_restart(&self, config: RelayConfig) {
        let delay = self.options.restart_delay;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::Restart(config));
        });
    }

    async fn shutdown(&mut self, worker_rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.end(Ending::Shutdown);
        let run = active.worker.run();
        let waited = tokio::time::timeout(self.options.stop_grace, async {
            while let Some(event) = worker_rx.recv().await {
                if let WorkerEvent::Exited { run: exited, code } = event {
                    if exited == run {
                        return Some(code);
                    }
                }
            }
            None
        })
        .await;
        match waited {
            Ok(Some(code)) => self.on_exit(active, code).await,
            // Dropping the handle kills whatever is left.
            _ => tracing::warn!(run, "worker did not exit within grace period"),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn record(&mut self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info => tracing::info!("{}", entry.message),
            LogLevel::Warn => tracing::warn!("{}", entry.message),
            LogLevel::Error => tracing::error!("{}", entry.message),
        }
        self.state.push_log(entry);
    }

    /// Publish first so a caller that awaited the command sees its effect.
    fn reply<T>(&self, respond_to: oneshot::Sender<T>, value: T) {
        self.publish();
        let _ = respond_to.send(value);
    }

    fn publish(&self) {
        let current = self.state.process();
        self.state_tx.send_if_modified(|published| {
            if published == current {
                false
            } else {
                *published = current.clone();
                true
            }
        });
    }
}

fn launch_failure(err: &SupervisorError) -> String {
    match err {
        SupervisorError::ExecutableNotFound { .. } => format!("haven binary not found: {err}"),
        other => format!("Failed to prepare relay: {other}"),
    }
}
