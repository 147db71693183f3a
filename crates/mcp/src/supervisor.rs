//! Worker process supervision (spawn, observe exit, stop).

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{Error, Result};

/// How long `stop()` waits after SIGTERM before killing the worker.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Search-path entries that point at project-local tool installs. The worker
/// must resolve system tools, not same-named vendored ones.
const VENDORED_BIN_DIRS: &[&str] = &["node_modules/.bin", ".venv/bin", "venv/bin"];

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    fn from_status(status: std::io::Result<ExitStatus>) -> Self {
        match status {
            Ok(status) => Self {
                code: status.code(),
                signal: exit_signal(&status),
            },
            Err(_) => Self {
                code: None,
                signal: None,
            },
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Handle to one running worker process.
///
/// Dropping the handle kills the worker: the exit observer treats a dropped
/// kill sender the same as an explicit kill request.
pub struct WorkerHandle {
    pid: Option<u32>,
    generation: u64,
    stdin: Option<ChildStdin>,
    kill: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<Option<ExitInfo>>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    fn has_exited(&self) -> bool {
        self.exited.borrow().is_some()
    }

    fn terminate(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                debug!(pid, "sending SIGTERM to worker");
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    debug!(pid, error = %e, "SIGTERM failed");
                }
            }
        }

        #[cfg(not(unix))]
        self.kill();
    }

    fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    fn exit_info(&self) -> Option<ExitInfo> {
        *self.exited.borrow()
    }

    async fn wait(&mut self) -> Option<ExitInfo> {
        self.exited
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|info| *info)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Owns the lifecycle of a single worker subprocess.
pub struct Supervisor {
    project_root: PathBuf,
    worker_name: Option<String>,
    worker: Option<WorkerHandle>,
    generation: u64,
}

impl Supervisor {
    /// Create a supervisor for the worker configured under `project_root`.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            worker_name: None,
            worker: None,
            generation: 0,
        }
    }

    /// Select a specific entry from the launch config.
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = Some(name.into());
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Check if a worker is running (spawned and not yet exited).
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.has_exited())
    }

    /// Generation of the most recently started worker (0 before any start).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.worker.as_ref().and_then(|w| w.pid)
    }

    /// Start the worker unless one is already running.
    ///
    /// Returns the worker's stdout for a fresh start, `None` when a worker was
    /// already running. `on_exit` runs once, from the exit observer, with the
    /// worker's generation.
    pub fn start<F>(&mut self, on_exit: F) -> Result<Option<ChildStdout>>
    where
        F: FnOnce(u64, ExitInfo) + Send + 'static,
    {
        if self.is_running() {
            return Ok(None);
        }
        // An exited worker's handle is stale; discard it.
        self.worker = None;

        let config = WorkerConfig::load(&self.project_root, self.worker_name.as_deref())?;

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .current_dir(&self.project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let path = config
            .env
            .get("PATH")
            .map(OsString::from)
            .or_else(|| std::env::var_os("PATH"));
        if let Some(path) = path {
            cmd.env("PATH", sanitize_search_path(&path));
        }

        let mut child = cmd.spawn().map_err(Error::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdout")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stderr")))?;

        self.generation += 1;
        let generation = self.generation;
        let pid = child.id();
        info!(
            worker = %config.name,
            command = %config.command,
            pid,
            generation,
            "worker started"
        );

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let stderr_task = tokio::spawn(forward_stderr(stderr, generation));
        tokio::spawn(observe_exit(child, kill_rx, exit_tx, generation, on_exit));

        self.worker = Some(WorkerHandle {
            pid,
            generation,
            stdin: Some(stdin),
            kill: Some(kill_tx),
            exited: exit_rx,
            tasks: vec![stderr_task],
        });

        Ok(Some(stdout))
    }

    /// Tie a task's lifetime to the current worker; it is aborted on stop.
    pub fn attach(&mut self, task: JoinHandle<()>) {
        match self.worker.as_mut() {
            Some(worker) => worker.tasks.push(task),
            None => task.abort(),
        }
    }

    /// The running worker's stdin.
    pub fn stdin(&mut self) -> Option<&mut ChildStdin> {
        match self.worker.as_mut() {
            Some(worker) if !worker.has_exited() => worker.stdin.as_mut(),
            _ => None,
        }
    }

    /// How the current worker ended, if it has.
    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.worker.as_ref().and_then(WorkerHandle::exit_info)
    }

    /// Wait up to `limit` for the current worker to exit.
    pub async fn wait_exit(&mut self, limit: Duration) -> Option<ExitInfo> {
        let worker = self.worker.as_mut()?;
        tokio::time::timeout(limit, worker.wait()).await.ok().flatten()
    }

    /// Stop the worker: close stdin, SIGTERM, then kill after the grace period.
    ///
    /// Returns how the worker ended, or `None` if nothing was running. A worker
    /// that already exited is not signalled; its pid may have been reused.
    pub async fn stop(&mut self) -> Option<ExitInfo> {
        let mut worker = self.worker.take()?;
        if let Some(exit) = worker.exit_info() {
            debug!(generation = worker.generation, %exit, "worker already exited");
            return Some(exit);
        }
        info!(pid = worker.pid, generation = worker.generation, "stopping worker");

        drop(worker.stdin.take());
        worker.terminate();

        let exit = match tokio::time::timeout(STOP_GRACE_PERIOD, worker.wait()).await {
            Ok(exit) => exit,
            Err(_) => {
                warn!(pid = worker.pid, "worker ignored termination, killing");
                worker.kill();
                worker.wait().await
            }
        };

        if let Some(exit) = exit {
            info!(generation = worker.generation, %exit, "worker stopped");
        }
        exit
    }
}

async fn observe_exit<F>(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exited: watch::Sender<Option<ExitInfo>>,
    generation: u64,
    on_exit: F,
) where
    F: FnOnce(u64, ExitInfo) + Send + 'static,
{
    // A dropped sender counts as a kill request.
    let finished = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill => None,
    };

    let status = match finished {
        Some(status) => status,
        None => {
            if let Err(e) = child.start_kill() {
                debug!(generation, error = %e, "kill failed");
            }
            child.wait().await
        }
    };

    let info = ExitInfo::from_status(status);
    debug!(generation, exit = %info, "worker exited");
    // Publish the exit before notifying, so the worker no longer counts as
    // running by the time pending requests are rejected.
    let _ = exited.send(Some(info));
    on_exit(generation, info);
}

async fn forward_stderr(stderr: ChildStderr, generation: u64) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "worker", generation, "{line}");
    }
}

/// Remove vendored executable directories from a search path.
pub fn sanitize_search_path(path: &OsStr) -> OsString {
    let kept = std::env::split_paths(path).filter(|entry| !is_vendored_bin(entry));
    std::env::join_paths(kept).unwrap_or_else(|_| path.to_os_string())
}

fn is_vendored_bin(entry: &Path) -> bool {
    VENDORED_BIN_DIRS.iter().any(|dir| entry.ends_with(dir))
}
