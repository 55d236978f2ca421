//! Model server supervisor - owns the external worker process lifecycle.
//!
//! Flow:
//! 1. Probe the configured address; skip autostart if something answers
//! 2. Resolve an interpreter (explicit path, venv candidates, bare name)
//! 3. Spawn the worker and drain its output into the tracing sink
//! 4. Poll readiness under a bounded overall timeout
//! 5. On stop: signal descendants, then the worker, escalating to SIGKILL
//!
//! The supervisor never touches processes it did not spawn; a worker found
//! already running on the address is left alone on both start and stop.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use sysinfo::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep};
pub use tokio_util::sync::CancellationToken;

use crate::config::{AddressError, ModelServerConfig, WorkerAddress};
use crate::health::{StartReport, WorkerState};
use crate::probe::probe_ready;
use crate::process_tree;

/// Handle to a worker process spawned by this supervisor.
///
/// Exclusively owned; only the supervisor that created it may signal or
/// kill the process.
#[derive(Debug)]
pub struct WorkerHandle {
    pid: u32,
    child: Child,
}

impl WorkerHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Outcome of a `start` call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Autostart is disabled in configuration.
    Disabled,
    /// Something is already answering on the configured address; nothing
    /// was spawned. Makes `start` idempotent across host restarts.
    AlreadyRunning,
    /// Worker spawned and confirmed ready.
    Started { pid: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("invalid model server url: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("failed to spawn model server: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("model server exited during startup with {0}")]
    EarlyExit(std::process::ExitStatus),
    #[error("model server did not become ready within {0:?}")]
    StartupTimeout(Duration),
    #[error("model server startup interrupted by shutdown")]
    Interrupted,
}

/// Supervises the external model server process.
pub struct WorkerSupervisor {
    config: ModelServerConfig,
    handle: Option<WorkerHandle>,
    stopped: bool,
    last_report: Option<StartReport>,
}

impl WorkerSupervisor {
    pub fn new(config: ModelServerConfig) -> Self {
        Self {
            config,
            handle: None,
            stopped: false,
            last_report: None,
        }
    }

    pub fn config(&self) -> &ModelServerConfig {
        &self.config
    }

    /// The most recent autostart attempt, if any.
    pub fn last_report(&self) -> Option<&StartReport> {
        self.last_report.as_ref()
    }

    /// Start the worker if configured to and if nothing already answers on
    /// the address.
    ///
    /// Cancelling `cancel` while readiness polling is underway tears the
    /// spawned process down before returning, so a host shutting down
    /// mid-startup leaks nothing.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<StartOutcome, StartError> {
        if !self.config.autostart {
            tracing::info!("Model server autostart is disabled");
            self.last_report = Some(StartReport::skipped("autostart disabled"));
            return Ok(StartOutcome::Disabled);
        }

        if self.handle.is_some() {
            tracing::info!("Model server already started by this supervisor");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let address = WorkerAddress::parse(&self.config.server_url)?;

        if probe_ready(&address, self.config.probe_timeout).await {
            tracing::info!(%address, "Model server already answering, skipping autostart");
            self.last_report = Some(StartReport::skipped("worker already answering"));
            return Ok(StartOutcome::AlreadyRunning);
        }

        let report = StartReport::starting();
        let python = resolve_python(&self.config);
        tracing::info!(
            python = %python.display(),
            script = %self.config.script_name,
            dir = %self.config.script_dir.display(),
            "Spawning model server"
        );

        let spawn_result = Command::new(&python)
            .arg(&self.config.script_name)
            .current_dir(&self.config.script_dir)
            // Force unbuffered output so log lines show up as they happen
            // rather than at process exit.
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawn_result {
            Ok(child) => child,
            Err(e) => {
                self.last_report = Some(report.failed(format!("spawn failed: {e}")));
                return Err(StartError::Spawn(e));
            }
        };
        let pid = child.id().unwrap_or_default();
        spawn_output_drain(&mut child, pid);
        tracing::info!(pid, "Model server process started");

        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            if probe_ready(&address, self.config.probe_timeout).await {
                tracing::info!(pid, %address, "Model server is ready");
                self.stopped = false;
                self.handle = Some(WorkerHandle { pid, child });
                self.last_report = Some(report.succeeded());
                return Ok(StartOutcome::Started { pid });
            }

            // A worker that died will never become ready; fail fast rather
            // than polling out the full startup timeout.
            if let Ok(Some(status)) = child.try_wait() {
                tracing::error!(pid, %status, "Model server exited during startup");
                reap_and_kill_tree(child, pid).await;
                self.last_report = Some(report.failed(format!("exited during startup: {status}")));
                return Err(StartError::EarlyExit(status));
            }

            if Instant::now() >= deadline {
                tracing::warn!(
                    pid,
                    timeout = ?self.config.startup_timeout,
                    "Model server did not become ready, killing spawn"
                );
                reap_and_kill_tree(child, pid).await;
                self.last_report = Some(report.failed("startup timed out"));
                return Err(StartError::StartupTimeout(self.config.startup_timeout));
            }

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {}
                _ = cancel.cancelled() => {
                    tracing::info!(pid, "Startup interrupted, killing spawn");
                    reap_and_kill_tree(child, pid).await;
                    self.last_report = Some(report.failed("interrupted by shutdown"));
                    return Err(StartError::Interrupted);
                }
            }
        }
    }

    /// Observed worker state, derived fresh on every call.
    pub async fn state(&mut self) -> WorkerState {
        let Ok(address) = WorkerAddress::parse(&self.config.server_url) else {
            return WorkerState::NotStarted;
        };

        if probe_ready(&address, self.config.probe_timeout).await {
            return WorkerState::Ready;
        }

        if let Some(handle) = self.handle.as_mut()
            && matches!(handle.child.try_wait(), Ok(None))
        {
            return WorkerState::Starting;
        }

        if self.stopped {
            return WorkerState::Stopped;
        }
        if matches!(
            self.last_report.as_ref().map(|r| r.status),
            Some(crate::health::StartStatus::Failed)
        ) {
            return WorkerState::Failed;
        }
        WorkerState::NotStarted
    }

    /// Stop the worker this supervisor spawned. Idempotent, best-effort,
    /// never fails; a no-op for workers found already running.
    ///
    /// Descendants are signalled before the parent - they are the actual
    /// model-serving children and a dead parent does not imply dead
    /// children.
    pub async fn stop(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        self.stopped = true;

        let pid = Pid::from_u32(handle.pid);
        let sys = process_tree::refreshed_system();
        let kids = process_tree::descendants(&sys, pid);

        let alive = matches!(handle.child.try_wait(), Ok(None));
        if alive {
            tracing::info!(
                pid = handle.pid,
                descendants = kids.len(),
                "Stopping model server"
            );

            for kid in &kids {
                if !process_tree::terminate(&sys, *kid) {
                    tracing::warn!(pid = kid.as_u32(), "Failed to signal descendant");
                }
            }
            process_tree::terminate(&sys, pid);

            match tokio::time::timeout(self.config.stop_grace, handle.child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(pid = handle.pid, %status, "Model server exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(pid = handle.pid, error = %e, "Failed waiting for model server");
                }
                Err(_) => {
                    tracing::warn!(
                        pid = handle.pid,
                        grace = ?self.config.stop_grace,
                        "Model server ignored graceful stop, force killing"
                    );
                    let sys = process_tree::refreshed_system();
                    for kid in process_tree::descendants(&sys, pid) {
                        process_tree::force_kill(&sys, kid);
                    }
                    process_tree::force_kill(&sys, pid);
                    let _ = handle.child.wait().await;
                }
            }
        } else {
            // Parent already dead; descendants may still be holding the
            // socket or the GPU.
            let _ = handle.child.wait().await;
        }

        // Sweep survivors from the original enumeration either way.
        let sys = process_tree::refreshed_system();
        for kid in kids {
            if process_tree::is_alive(&sys, kid) {
                tracing::warn!(pid = kid.as_u32(), "Cleaning up orphaned descendant");
                process_tree::force_kill(&sys, kid);
            }
        }

        tracing::info!("Model server stopped");
    }
}

/// Force-kill a spawn that never became ready, descendants first, and reap
/// it so nothing is left behind as a zombie.
async fn reap_and_kill_tree(mut child: Child, pid: u32) {
    let root = Pid::from_u32(pid);
    let sys = process_tree::refreshed_system();
    for kid in process_tree::descendants(&sys, root) {
        process_tree::force_kill(&sys, kid);
    }
    process_tree::force_kill(&sys, root);
    if let Err(e) = child.kill().await {
        tracing::debug!(pid, error = %e, "Kill after startup failure");
    }
    let _ = child.wait().await;
}

/// Pick the interpreter for the worker script.
///
/// An explicit configured path wins. Otherwise the first existing regular
/// file among the venv candidates under the script directory and its
/// parent is used, falling back silently to a bare `python` resolved via
/// PATH.
fn resolve_python(config: &ModelServerConfig) -> PathBuf {
    const VENV_CANDIDATES: &[&str] = &[
        "venv/bin/python",
        ".venv/bin/python",
        "venv/Scripts/python.exe",
        ".venv/Scripts/python.exe",
    ];

    if let Some(explicit) = &config.python_path
        && !explicit.as_os_str().is_empty()
    {
        return explicit.clone();
    }

    let mut roots = vec![config.script_dir.clone()];
    if let Some(parent) = config.script_dir.parent()
        && !parent.as_os_str().is_empty()
    {
        roots.push(parent.to_path_buf());
    }

    for root in &roots {
        for candidate in VENV_CANDIDATES {
            let path = root.join(candidate);
            if path.is_file() {
                tracing::debug!(python = %path.display(), "Using virtualenv interpreter");
                return path;
            }
        }
    }

    PathBuf::from("python")
}

/// Drain both output pipes into the logging sink until end-of-stream.
///
/// Detached: the tasks live for as long as the worker writes and exit
/// quietly when the pipes close. Stream closure on process exit is
/// expected, not an error, and nothing here reaches the request path.
fn spawn_output_drain(child: &mut Child, pid: u32) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(drain_lines(stdout, pid));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain_lines(stderr, pid));
    }
}

async fn drain_lines<R>(stream: R, pid: u32)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "qclet::worker", pid, "{}", line);
    }
    tracing::trace!(pid, "Worker output stream closed");
}
