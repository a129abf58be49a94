//! Child process supervisor.
//!
//! A [`Supervisor`] owns the single supervised child, its readiness flag and
//! the [`Correlator`] of in-flight requests. It is a cheap `Clone` handle;
//! all clones drive the same child.
//!
//! # Lifecycle
//!
//! 1. [`Supervisor::start`] spawns the child and wires four tasks around it:
//!    stdin writer, stdout reader, stderr logger and a warm-up timer, plus the
//!    exit monitor that owns the process handle.
//! 2. The child becomes ready on its first stdout line or when the warm-up
//!    delay elapses, whichever happens first.
//! 3. [`Supervisor::submit`] registers the request, queues it for the writer
//!    and awaits the correlated response.
//! 4. On exit the pending table is drained with [`AppError::ProcessExited`]
//!    and, if enabled, a respawn is scheduled.
//! 5. [`Supervisor::shutdown`] terminates the child and waits for every task.
//!
//! Child state and the pending table are only ever mutated while holding the
//! state lock (state first, then the correlator's), and never across an
//! `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::correlator::Correlator;
use crate::bridge::message::ensure_id;
use crate::bridge::reader::{run_reader, run_stderr_logger};
use crate::bridge::spawner::{monitor_exit, spawn_child, ChildConnection, ExitReport, SpawnConfig};
use crate::bridge::writer::run_writer;
use crate::config::RelayConfig;
use crate::{AppError, Result};

/// How long an exited child's stdout may keep draining before its pending
/// requests are rejected.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Supervisor tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Child command line.
    pub spawn: SpawnConfig,
    /// Deadline for each correlated response.
    pub request_timeout: Duration,
    /// Readiness fallback delay after spawn.
    pub warmup: Duration,
    /// Grace period between `SIGTERM` and a hard kill.
    pub shutdown_grace: Duration,
    /// Delay before respawning after an unexpected exit; `None` disables it.
    pub restart_delay: Option<Duration>,
}

impl From<&RelayConfig> for SupervisorConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            spawn: SpawnConfig::from(&config.child),
            request_timeout: config.request_timeout(),
            warmup: config.warmup(),
            shutdown_grace: config.shutdown_grace(),
            restart_delay: config.restart_delay(),
        }
    }
}

/// Handle to the running child and everything wired around it.
#[derive(Debug)]
struct ActiveChild {
    generation: u64,
    pid: Option<u32>,
    ready: bool,
    /// Set once exit is detected; the child can no longer become ready.
    exiting: bool,
    outbound: mpsc::UnboundedSender<Value>,
    cancel: CancellationToken,
    monitor: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl ActiveChild {
    /// Wait for the monitor (and with it the process) and every helper task.
    async fn join(self) {
        if let Err(err) = self.monitor.await {
            warn!(pid = ?self.pid, %err, "child monitor task failed");
        }
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(pid = ?self.pid, %err, "child io task failed");
            }
        }
    }
}

#[derive(Debug, Default)]
struct SupervisorState {
    /// Incremented on every spawn; events from older children are ignored.
    generation: u64,
    child: Option<ActiveChild>,
}

#[derive(Debug)]
struct Inner {
    config: SupervisorConfig,
    correlator: Arc<Correlator>,
    state: Mutex<SupervisorState>,
    /// Parent of every per-child token; cancelled on shutdown or drop.
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Supervisor of the single stdio child process.
#[derive(Debug, Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Create a supervisor. No process is spawned until [`Supervisor::start`].
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                correlator: Arc::new(Correlator::new()),
                state: Mutex::new(SupervisorState::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Spawn the child unless one is already running.
    ///
    /// Idempotent: with a running child this logs and returns `Ok(())`. The
    /// new child starts out not ready. When the spawn fails and restarts are
    /// enabled, another attempt is scheduled.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotReady`] after [`Supervisor::shutdown`].
    /// - [`AppError::Spawn`] if the process cannot be launched.
    pub fn start(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(AppError::NotReady("supervisor is shut down".into()));
        }

        let mut state = self.inner.lock();
        if let Some(child) = &state.child {
            info!(pid = ?child.pid, "child already running, start ignored");
            return Ok(());
        }

        state.generation += 1;
        let generation = state.generation;

        match spawn_child(&self.inner.config.spawn) {
            Ok(conn) => {
                state.child = Some(self.wire(generation, conn));
                Ok(())
            }
            Err(err) => {
                error!(%err, "failed to start child process");
                self.inner.correlator.reject_all(&err);
                drop(state);
                self.inner.schedule_restart();
                Err(err)
            }
        }
    }

    /// Retire the current child (if any) and spawn a new one.
    ///
    /// Requests pending on the old child are rejected with
    /// [`AppError::ProcessExited`]. The old process is gone before the new
    /// one is spawned.
    ///
    /// # Errors
    ///
    /// Same as [`Supervisor::start`].
    pub async fn restart(&self) -> Result<()> {
        info!("restarting child process");
        self.inner.retire("child process restarted").await;
        self.start()
    }

    /// Terminate the child, reject pending requests and stop all tasks.
    ///
    /// After shutdown the supervisor never spawns again.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.retire("relay shutting down").await;
        info!("supervisor shut down");
    }

    /// Forward `message` to the child and await the correlated response.
    ///
    /// A missing or `null` `id` is replaced by a generated one before the
    /// message is written.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotReady`]: no child, or not ready yet; nothing is registered.
    /// - [`AppError::InvalidRequest`]: not an object, or an unusable `id`.
    /// - [`AppError::DuplicateId`]: the `id` is already in flight.
    /// - [`AppError::Timeout`]: no response within the request timeout.
    /// - [`AppError::ProcessExited`] / [`AppError::Spawn`]: the child went away first.
    pub async fn submit(&self, mut message: Value) -> Result<Value> {
        let (id, reply) = {
            let state = self.inner.lock();
            let Some(child) = state.child.as_ref() else {
                return Err(AppError::NotReady("no child process is running".into()));
            };
            if !child.ready {
                return Err(AppError::NotReady("child process is not ready".into()));
            }

            let id = ensure_id(&mut message)?;
            let reply = self
                .inner
                .correlator
                .register(id.clone(), self.inner.config.request_timeout)?;

            debug!(%id, pid = ?child.pid, "forwarding request to child");
            if child.outbound.send(message).is_err() {
                self.inner.correlator.cancel(&id);
                return Err(AppError::ProcessExited("child stdin is closed".into()));
            }
            (id, reply)
        };

        match reply.await {
            Ok(outcome) => outcome,
            Err(_closed) => Err(AppError::ProcessExited(format!(
                "request {id} was dropped before completion"
            ))),
        }
    }

    /// Whether a child is running and ready for requests.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner
            .lock()
            .child
            .as_ref()
            .is_some_and(|child| child.ready)
    }

    /// Whether a child process is currently held, ready or not.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock().child.is_some()
    }

    /// OS process id of the current child.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().child.as_ref().and_then(|child| child.pid)
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Spawn the tasks around a fresh child. Called with the state lock held.
    fn wire(&self, generation: u64, conn: ChildConnection) -> ActiveChild {
        let ChildConnection {
            pid,
            child,
            stdin,
            stdout,
            stderr,
        } = conn;

        let cancel = self.inner.shutdown.child_token();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(&self.inner);

        let writer = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if let Err(err) = run_writer(pid, stdin, outbound_rx, cancel).await {
                    warn!(?pid, %err, "child writer stopped");
                }
            }
        });

        let stderr_logger = tokio::spawn(run_stderr_logger(pid, stderr, cancel.clone()));

        let reader = tokio::spawn({
            let weak = Weak::clone(&weak);
            run_reader(pid, stdout, cancel.clone(), move |output| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_output(generation, output);
                }
            })
        });

        let warmup = tokio::spawn({
            let weak = Weak::clone(&weak);
            let cancel = cancel.clone();
            let delay = self.inner.config.warmup;
            async move {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(delay) => {
                        if let Some(inner) = weak.upgrade() {
                            inner.mark_ready(generation, "warm-up elapsed");
                        }
                    }
                }
            }
        });

        let monitor = monitor_exit(
            child,
            self.inner.config.shutdown_grace,
            cancel.clone(),
            move |report| async move {
                if let Some(inner) = weak.upgrade() {
                    inner.mark_exiting(generation);
                }
                // Let responses printed just before exit reach their callers.
                if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
                    debug!(?pid, "stdout still open after exit, rejecting pending requests");
                }
                if let Some(inner) = weak.upgrade() {
                    inner.handle_exit(generation, &report);
                }
            },
        );

        ActiveChild {
            generation,
            pid,
            ready: false,
            exiting: false,
            outbound,
            cancel,
            monitor,
            tasks: vec![writer, stderr_logger, warmup],
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current child if it belongs to `generation`.
    fn current(state: &mut SupervisorState, generation: u64) -> Option<&mut ActiveChild> {
        state
            .child
            .as_mut()
            .filter(|child| child.generation == generation)
    }

    /// Reader callback: any line marks readiness; decoded messages are routed.
    fn on_output(&self, generation: u64, output: Option<Value>) {
        let mut state = self.lock();
        let Some(child) = Self::current(&mut state, generation) else {
            return;
        };

        if !child.ready && !child.exiting {
            child.ready = true;
            info!(pid = ?child.pid, reason = "first output", "child process ready");
        }

        if let Some(message) = output {
            self.correlator.resolve_incoming(message);
        }
    }

    fn mark_ready(&self, generation: u64, reason: &str) {
        let mut state = self.lock();
        if let Some(child) = Self::current(&mut state, generation) {
            if !child.ready && !child.exiting {
                child.ready = true;
                info!(pid = ?child.pid, reason, "child process ready");
            }
        }
    }

    fn mark_exiting(&self, generation: u64) {
        let mut state = self.lock();
        if let Some(child) = Self::current(&mut state, generation) {
            child.exiting = true;
            child.ready = false;
        }
    }

    /// Retire an exited child: clear it, reject its requests, maybe respawn.
    fn handle_exit(self: &Arc<Self>, generation: u64, report: &ExitReport) {
        let retired = {
            let mut state = self.lock();
            let is_current = Self::current(&mut state, generation).is_some();
            if is_current {
                self.correlator
                    .reject_all(&AppError::ProcessExited(report.reason.clone()));
                state.child.take()
            } else {
                None
            }
        };

        let Some(retired) = retired else {
            debug!(generation, "ignoring exit of a retired child");
            return;
        };

        warn!(
            pid = ?retired.pid,
            code = ?report.code,
            reason = %report.reason,
            "child process exited unexpectedly"
        );
        // Stops the writer, stderr logger and warm-up timer; the monitor is
        // the task running this code.
        retired.cancel.cancel();
        self.schedule_restart();
    }

    /// Take the current child, reject its requests and wait until it is gone.
    async fn retire(&self, reason: &str) {
        let retired = {
            let mut state = self.lock();
            let child = state.child.take();
            if child.is_some() {
                self.correlator
                    .reject_all(&AppError::ProcessExited(reason.to_owned()));
            }
            child
        };

        if let Some(child) = retired {
            info!(pid = ?child.pid, reason, "retiring child process");
            child.cancel.cancel();
            child.join().await;
        }
    }

    /// Respawn after the configured delay, unless disabled or shutting down.
    fn schedule_restart(self: &Arc<Self>) {
        let Some(delay) = self.config.restart_delay else {
            return;
        };
        if self.shutdown.is_cancelled() {
            return;
        }

        let inner = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        info!(?delay, "scheduling child restart");
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(inner) = inner.upgrade() {
                        let supervisor = Supervisor { inner };
                        if let Err(err) = supervisor.start() {
                            warn!(%err, "scheduled child restart failed");
                        }
                    }
                }
            }
        });
    }
}
