//! Keeps the worker process alive until shutdown.
//!
//! A single monitor task owns the child: it spawns, waits for the exit and
//! respawns immediately (no backoff, no ceiling) while the shared
//! [`CancellationToken`] is not cancelled. A failed spawn (missing binary,
//! permission denied) is terminal because it would fail the same way on every
//! retry. The monitor is the only place a spawn happens and it re-checks
//! cancellation right before each spawn; [`Supervisor::stop`] waits for the
//! monitor to settle, so no spawn can happen after it returns.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::cancel::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Starting,
    Running,
    Stopped,
    Terminating,
}

/// Snapshot of the supervised worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedProcess {
    pub command: Vec<String>,
    pub working_directory: PathBuf,
    pub status: ProcessStatus,
    /// Respawns after unexpected exits.
    pub restart_count: u32,
    pub pid: Option<u32>,
}

/// Diagnostics emitted by the monitor. They never drive state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Spawned { pid: Option<u32> },
    Stdout(String),
    Stderr(String),
    Exited { code: Option<i32> },
    SpawnFailed { error: String },
}

struct SupervisorState {
    process: SupervisedProcess,
    started: bool,
    spawn_failed: bool,
}

struct Inner {
    cancel: CancellationToken,
    state: Mutex<SupervisorState>,
    events: broadcast::Sender<ProcessEvent>,
    spawns: AtomicU64,
    settled: watch::Sender<bool>,
}

/// Handle to the worker supervisor. Clones share the same worker.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Create a supervisor for `command` run in `working_directory`.
    ///
    /// Nothing is spawned until [`start`](Self::start).
    pub fn new(
        command: Vec<String>,
        working_directory: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let (settled, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cancel,
                state: Mutex::new(SupervisorState {
                    process: SupervisedProcess {
                        command,
                        working_directory: working_directory.into(),
                        status: ProcessStatus::Stopped,
                        restart_count: 0,
                        pid: None,
                    },
                    started: false,
                    spawn_failed: false,
                }),
                events,
                spawns: AtomicU64::new(0),
                settled,
            }),
        }
    }

    /// Begin supervising. No-op if already started, cancelled, or if a previous
    /// spawn failed. Must be called inside a tokio runtime.
    pub fn start(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.started || state.spawn_failed || self.inner.cancel.is_cancelled() {
                debug!(
                    started = state.started,
                    spawn_failed = state.spawn_failed,
                    "start ignored"
                );
                return;
            }
            state.started = true;
            state.process.status = ProcessStatus::Starting;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _settle = SettleOnDrop(inner.clone());
            monitor(&inner).await;
        });
    }

    /// Liveness of the worker. No side effects.
    pub fn is_running(&self) -> bool {
        self.inner.lock_state().process.status == ProcessStatus::Running
    }

    /// Cancel, terminate the worker and wait until the monitor has settled.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let started = self.inner.lock_state().started;
        if !started {
            self.inner.lock_state().process.status = ProcessStatus::Stopped;
            return;
        }
        let mut settled = self.inner.settled.subscribe();
        if settled.wait_for(|done| *done).await.is_err() {
            warn!("supervisor monitor vanished before settling");
        }
    }

    pub fn snapshot(&self) -> SupervisedProcess {
        self.inner.lock_state().process.clone()
    }

    /// True once a spawn attempt failed; the instance will not spawn again.
    pub fn spawn_failed(&self) -> bool {
        self.inner.lock_state().spawn_failed
    }

    /// Number of spawn attempts made so far.
    pub fn spawn_count(&self) -> u64 {
        self.inner.spawns.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.inner.events.subscribe()
    }
}

/// Marks the monitor as settled when its task ends, including by panic.
struct SettleOnDrop(Arc<Inner>);

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        {
            let mut state = self.0.lock_state();
            state.process.status = ProcessStatus::Stopped;
            state.process.pid = None;
        }
        self.0.settled.send_replace(true);
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_status(&self, status: ProcessStatus, pid: Option<u32>) {
        let mut state = self.lock_state();
        state.process.status = status;
        state.process.pid = pid;
    }

    fn emit(&self, event: ProcessEvent) {
        // No subscribers is fine: events are diagnostics only.
        let _ = self.events.send(event);
    }

    /// Spawn one worker, unless cancellation was requested in the meantime.
    fn spawn_worker(&self) -> Option<std::io::Result<Child>> {
        let state = self.lock_state();
        if self.cancel.is_cancelled() {
            return None;
        }
        let (program, args) = match state.process.command.split_first() {
            Some(split) => split,
            None => {
                return Some(Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "empty worker command",
                )));
            }
        };
        self.spawns.fetch_add(1, Ordering::SeqCst);
        Some(
            Command::new(program)
                .args(args)
                .current_dir(&state.process.working_directory)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn(),
        )
    }
}

#[instrument(skip_all)]
async fn monitor(inner: &Arc<Inner>) {
    loop {
        inner.set_status(ProcessStatus::Starting, None);
        let mut child = match inner.spawn_worker() {
            None => {
                debug!("cancelled before spawn");
                inner.set_status(ProcessStatus::Stopped, None);
                return;
            }
            Some(Err(err)) => {
                error!(err = %err, "worker failed to spawn, giving up");
                {
                    let mut state = inner.lock_state();
                    state.spawn_failed = true;
                    state.process.status = ProcessStatus::Stopped;
                    state.process.pid = None;
                }
                inner.emit(ProcessEvent::SpawnFailed {
                    error: err.to_string(),
                });
                return;
            }
            Some(Ok(child)) => child,
        };

        let pid = child.id();
        inner.set_status(ProcessStatus::Running, pid);
        info!(pid = ?pid, "worker started");
        inner.emit(ProcessEvent::Spawned { pid });
        forward_output(inner, &mut child);

        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => {
                inner.set_status(ProcessStatus::Terminating, pid);
                if let Err(err) = child.start_kill() {
                    warn!(err = %err, "failed to signal worker");
                }
                let code = match child.wait().await {
                    Ok(status) => status.code(),
                    Err(err) => {
                        warn!(err = %err, "failed to reap worker");
                        None
                    }
                };
                info!(code = ?code, "worker terminated");
                inner.emit(ProcessEvent::Exited { code });
                inner.set_status(ProcessStatus::Stopped, None);
                return;
            }
            status = child.wait() => {
                let code = match status {
                    Ok(status) => status.code(),
                    Err(err) => {
                        warn!(err = %err, "failed to wait for worker");
                        None
                    }
                };
                inner.emit(ProcessEvent::Exited { code });
                if inner.cancel.is_cancelled() {
                    info!(code = ?code, "worker exited during shutdown");
                    inner.set_status(ProcessStatus::Stopped, None);
                    return;
                }
                let restarts = {
                    let mut state = inner.lock_state();
                    state.process.restart_count += 1;
                    state.process.restart_count
                };
                warn!(code = ?code, restarts, "worker exited, restarting");
            }
        }
    }
}

fn forward_output(inner: &Arc<Inner>, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let inner = inner.clone();
        tokio::spawn(async move {
            forward_lines(stdout, |line| {
                debug!(target: "panel::worker", "stdout: {line}");
                inner.emit(ProcessEvent::Stdout(line));
            })
            .await;
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let inner = inner.clone();
        tokio::spawn(async move {
            forward_lines(stderr, |line| {
                debug!(target: "panel::worker", "stderr: {line}");
                inner.emit(ProcessEvent::Stderr(line));
            })
            .await;
        });
    }
}

async fn forward_lines<R, F>(reader: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => on_line(line),
            Ok(None) => break,
            Err(err) => {
                debug!(err = %err, "worker output stream closed");
                break;
            }
        }
    }
}

/// Build a supervisor for the site whose config file is `site_config`.
pub fn for_site(command: Vec<String>, site_config: &Path, cancel: CancellationToken) -> Supervisor {
    Supervisor::new(command, crate::io::discovery::worker_dir(site_config), cancel)
}
