//! Child process spawning and exit monitoring.
//!
//! Spawns the supervised command with:
//! - all three standard streams piped,
//! - `kill_on_drop(true)` so the process can never outlive its handle,
//! - on unix, its own process group, so wrapper commands (`npx`, shells) and
//!   the servers they launch are signalled together.
//!
//! [`monitor_exit`] owns the [`Child`] afterwards. It either reports a
//! natural exit, or, when its cancellation token fires, terminates the
//! process group: `SIGTERM` first (unix), then a hard kill after a grace
//! period.

use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ChildConfig;
use crate::{AppError, Result};

/// Command line for the supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Executable to launch.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory; inherited when `None`.
    pub working_dir: Option<PathBuf>,
}

impl From<&ChildConfig> for SpawnConfig {
    fn from(config: &ChildConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
        }
    }
}

/// Stdio connection to a freshly spawned child.
///
/// The caller must hand `child` to [`monitor_exit`] (or otherwise keep it
/// alive) for as long as the process should run.
#[derive(Debug)]
pub struct ChildConnection {
    /// OS process id, if the process is still known to the OS.
    pub pid: Option<u32>,
    /// Process handle with `kill_on_drop` set.
    pub child: Child,
    /// Child's stdin for requests.
    pub stdin: ChildStdin,
    /// Child's stdout carrying protocol messages.
    pub stdout: ChildStdout,
    /// Child's stderr carrying diagnostics.
    pub stderr: ChildStderr,
}

/// How a monitored child ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, `None` when killed by a signal or unknown.
    pub code: Option<i32>,
    /// Human-readable summary.
    pub reason: String,
}

impl ExitReport {
    fn from_status(status: ExitStatus) -> Self {
        let code = status.code();
        let reason = code.map_or_else(
            || "process terminated by signal".to_owned(),
            |c| format!("process exited with code {c}"),
        );
        Self { code, reason }
    }
}

/// Spawn the child described by `config` with piped stdio.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn …")`: OS spawn failure.
/// - `AppError::Spawn("failed to capture …")`: a pipe was not created.
pub fn spawn_child(config: &SpawnConfig) -> Result<ChildConnection> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!("failed to spawn {:?}: {err}", config.command))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture child stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture child stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture child stderr".into()))?;

    let pid = child.id();
    info!(?pid, command = %config.command, args = ?config.args, "child process spawned");

    Ok(ChildConnection {
        pid,
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Spawn a task that owns `child` until it exits or `cancel` fires.
///
/// - Natural exit: `on_exit` runs to completion with the [`ExitReport`].
/// - Cancellation: the child is terminated (see [`terminate`]) and `on_exit`
///   is **not** called; whoever cancelled is responsible for cleanup.
///
/// Awaiting the returned handle therefore guarantees the process is gone.
#[must_use]
pub fn monitor_exit<F, Fut>(
    mut child: Child,
    grace: Duration,
    cancel: CancellationToken,
    on_exit: F,
) -> JoinHandle<()>
where
    F: FnOnce(ExitReport) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let pid = child.id();
        tokio::select! {
            result = child.wait() => {
                let report = match result {
                    Ok(status) => ExitReport::from_status(status),
                    Err(err) => {
                        warn!(?pid, %err, "error waiting for child process");
                        ExitReport { code: None, reason: format!("wait error: {err}") }
                    }
                };
                info!(?pid, code = ?report.code, reason = %report.reason, "child process exited");
                // Descendants left behind by the exited leader.
                signal_group(pid, GroupSignal::Kill);
                on_exit(report).await;
            }
            () = cancel.cancelled() => {
                terminate(&mut child, grace).await;
            }
        }
    })
}

/// Terminate `child` and its process group: polite signal, bounded wait,
/// then hard kill.
pub async fn terminate(child: &mut Child, grace: Duration) {
    let pid = child.id();

    if signal_group(pid, GroupSignal::Term) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(?pid, ?status, "child process terminated");
                signal_group(pid, GroupSignal::Kill);
                return;
            }
            Ok(Err(err)) => warn!(?pid, %err, "error waiting for terminated child"),
            Err(_elapsed) => warn!(?pid, ?grace, "child ignored SIGTERM, killing"),
        }
    }

    signal_group(pid, GroupSignal::Kill);
    if let Err(err) = child.kill().await {
        warn!(?pid, %err, "failed to kill child process");
    } else {
        info!(?pid, "child process killed");
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Term,
    Kill,
}

/// Signal every process in the group led by `pid`.
///
/// Returns whether the signal was delivered. A group that is already empty
/// is not an error.
#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: GroupSignal) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return false;
    };
    let signal = match signal {
        GroupSignal::Term => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };

    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(err) => {
            warn!(pgid = raw, %err, ?signal, "failed to signal child process group");
            false
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: GroupSignal) -> bool {
    false
}
