//! Worker child process: launch, output pump, termination.
//!
//! One task per run owns the child. Stdout and stderr share the write end of
//! a single pipe, so the pump sees lines in the order the worker wrote them.
//! After the child exits and the pipe reaches EOF, a single
//! [`WorkerEvent::Exited`] follows, so the last output line is always
//! delivered before the exit.

use std::io::{BufRead, BufReader, PipeReader};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::error::{io_err, SupervisorError};
use crate::paths::IMPORT_FLAG;

/// How long to keep draining output after exit; a detached grandchild can
/// hold the pipe open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub type RunId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Long-running relay.
    Serve,
    /// One-shot historical import, launched with `--import`.
    Import,
}

impl RunMode {
    fn args(self) -> &'static [&'static str] {
        match self {
            RunMode::Serve => &[],
            RunMode::Import => &[IMPORT_FLAG],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Line { run: RunId, line: String },
    Exited { run: RunId, code: i32 },
}

/// Handle to a live worker. Dropping it terminates the child.
#[derive(Debug)]
pub struct WorkerProcess {
    run: RunId,
    mode: RunMode,
    terminate: Option<oneshot::Sender<()>>,
}

impl WorkerProcess {
    pub fn run(&self) -> RunId {
        self.run
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Ask the child to exit gracefully. Further calls do nothing.
    pub fn terminate(&mut self) {
        if let Some(tx) = self.terminate.take() {
            let _ = tx.send(());
        }
    }
}

/// Launch `program` in `cwd` and start pumping its output into `events`.
pub fn spawn_worker(
    program: &Path,
    cwd: &Path,
    mode: RunMode,
    run: RunId,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> Result<WorkerProcess, SupervisorError> {
    let (output, writer) = std::io::pipe().map_err(|e| io_err(program, e))?;
    let stderr = writer.try_clone().map_err(|e| io_err(program, e))?;

    // The Command holds the parent's copies of the write end; it must be
    // dropped before the pump can see EOF.
    let child = Command::new(program)
        .args(mode.args())
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(stderr)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| io_err(program, e))?;

    let pid = child.id();
    tracing::info!(run, pid = ?pid, program = %program.display(), ?mode, "worker launched");

    let pump = spawn_pump(output, run, events.clone());
    let (terminate_tx, terminate_rx) = oneshot::channel();
    tokio::spawn(supervise_child(child, run, pid, pump, terminate_rx, events));

    Ok(WorkerProcess {
        run,
        mode,
        terminate: Some(terminate_tx),
    })
}

async fn supervise_child(
    mut child: Child,
    run: RunId,
    pid: Option<u32>,
    pump: oneshot::Receiver<()>,
    mut terminate_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // Fires on an explicit request and when the handle is dropped.
        _ = &mut terminate_rx => {
            request_termination(&mut child);
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => exit_code(status),
        Err(err) => {
            tracing::error!(run, error = %err, "failed waiting for worker");
            -1
        }
    };

    if tokio::time::timeout(DRAIN_TIMEOUT, pump).await.is_err() {
        tracing::warn!(run, "worker output still open after exit; detaching");
    }

    tracing::info!(run, pid = ?pid, code, "worker exited");
    let _ = events.send(WorkerEvent::Exited { run, code });
}

/// Reads the shared output pipe on a plain thread so a grandchild holding the
/// pipe open cannot stall runtime shutdown. The returned receiver resolves
/// once the pump stops.
fn spawn_pump(
    output: PipeReader,
    run: RunId,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> oneshot::Receiver<()> {
    let (done_tx, done_rx) = oneshot::channel();
    std::thread::spawn(move || {
        pump_lines(output, run, &events);
        let _ = done_tx.send(());
    });
    done_rx
}

fn pump_lines(output: PipeReader, run: RunId, events: &mpsc::UnboundedSender<WorkerEvent>) {
    let mut reader = BufReader::new(output);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                // Output is not guaranteed UTF-8; never drop a line over it.
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                if line.is_empty() {
                    continue;
                }
                tracing::debug!(target: "worker", run, "{line}");
                if events
                    .send(WorkerEvent::Line {
                        run,
                        line: line.to_string(),
                    })
                    .is_err()
                {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(run, error = %err, "worker output read failed");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    if let Some(pid) = child.id() {
        let status = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if matches!(status, Ok(s) if s.success()) {
            return;
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal()).unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("worker.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = matches!(event, WorkerEvent::Exited { .. });
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn lines_precede_exit_and_blank_lines_are_skipped() {
        let dir = TempDir::new().expect("tmp");
        let program = script(&dir, "printf 'one\\r\\n\\ntwo\\n'\nexit 3");
        let (tx, rx) = mpsc::unbounded_channel();

        let _worker = spawn_worker(&program, dir.path(), RunMode::Serve, 7, tx).expect("spawn");
        let events = collect(rx).await;

        assert_eq!(
            events,
            vec![
                WorkerEvent::Line { run: 7, line: "one".to_string() },
                WorkerEvent::Line { run: 7, line: "two".to_string() },
                WorkerEvent::Exited { run: 7, code: 3 },
            ]
        );
    }

    #[tokio::test]
    async fn stdout_and_stderr_keep_their_written_order() {
        let dir = TempDir::new().expect("tmp");
        let program = script(
            &dir,
            "i=0\nwhile [ $i -lt 300 ]; do\n  echo \"out $i\"\n  echo \"err $i\" >&2\n  i=$((i+1))\ndone",
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let _worker = spawn_worker(&program, dir.path(), RunMode::Serve, 4, tx).expect("spawn");
        let lines: Vec<String> = collect(rx)
            .await
            .into_iter()
            .filter_map(|event| match event {
                WorkerEvent::Line { line, .. } => Some(line),
                WorkerEvent::Exited { .. } => None,
            })
            .collect();

        let expected: Vec<String> = (0..300)
            .flat_map(|i| [format!("out {i}"), format!("err {i}")])
            .collect();
        assert_eq!(lines, expected);
    }

    #[tokio::test]
    async fn import_mode_passes_flag_and_uses_cwd() {
        let dir = TempDir::new().expect("tmp");
        let program = script(&dir, "echo \"$1 $(basename \"$PWD\")\"");
        let cwd = dir.path().join("relaydata");
        fs::create_dir_all(&cwd).expect("mkdir");
        let (tx, rx) = mpsc::unbounded_channel();

        let _worker = spawn_worker(&program, &cwd, RunMode::Import, 1, tx).expect("spawn");
        let events = collect(rx).await;

        assert_eq!(
            events[0],
            WorkerEvent::Line { run: 1, line: "--import relaydata".to_string() }
        );
    }

    #[tokio::test]
    async fn terminate_ends_a_long_running_worker() {
        let dir = TempDir::new().expect("tmp");
        let program = script(&dir, "echo ready\nexec sleep 30");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut worker = spawn_worker(&program, dir.path(), RunMode::Serve, 2, tx).expect("spawn");
        assert_eq!(
            rx.recv().await,
            Some(WorkerEvent::Line { run: 2, line: "ready".to_string() })
        );
        worker.terminate();
        worker.terminate();

        match rx.recv().await {
            Some(WorkerEvent::Exited { run: 2, code }) => assert_ne!(code, 0),
            other => panic!("expected exit, got {other:?}"),
        }
    }

    #[test]
    fn spawn_failure_reports_path() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        rt.block_on(async {
            let (tx, _rx) = mpsc::unbounded_channel();
            let missing = Path::new("/nonexistent/haven");
            match spawn_worker(missing, Path::new("/"), RunMode::Serve, 0, tx) {
                Err(SupervisorError::Io { path, .. }) => assert_eq!(path, missing),
                other => panic!("expected io error, got {other:?}"),
            }
        });
    }
}
