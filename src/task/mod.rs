// src/task/mod.rs

//! Managed processes.
//!
//! A [`Task`] owns one subprocess per run cycle. Each call to [`Task::run`]
//! walks the lifecycle:
//!
//! 1. pre hook (bounded by [`Timeouts::pre_hook`])
//! 2. wait until every dependency is ready, or abort if one fails
//! 3. spawn the process and start streaming stdout/stderr plus the ready
//!    hook
//! 4. wait for the process to exit, or for a stop request which escalates
//!    from an interrupt to a kill after [`Timeouts::stop_grace`]
//! 5. record a non-zero exit in the `failed` signal
//! 6. post hook (bounded by [`Timeouts::post_hook`]) and set `ended`, on
//!    every path
//!
//! - [`signal`] holds the resettable `ready`/`failed`/`ended` flags.
//! - [`hooks`] defines the hook trait and the default hooks.
//! - [`probes`] provides the standard readiness probes.

pub mod hooks;
pub mod probes;
pub mod signal;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Timeouts;
use crate::errors::{KindleError, Result};
use crate::exec::OutputBroadcaster;
use crate::exec::process;
use crate::types::{RunOutcome, TaskName, TaskState};

use self::hooks::{NoopHook, ReadyImmediately, SharedHook, TaskHook};
use self::signal::RunSignal;

/// How long output is still read after the process has exited.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// How a dependency resolved from a dependent's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DependencyStart {
    Ready,
    Failed,
}

/// A managed external process plus its supervision metadata.
///
/// Tasks are shared as `Arc<Task>`: dependents hold references to their
/// dependencies and only ever read their signals. Identity (equality,
/// hashing) is the task name.
pub struct Task {
    name: TaskName,
    command: Vec<String>,
    dependencies: Vec<Arc<Task>>,

    pre_hook: SharedHook,
    post_hook: SharedHook,
    kill_hook: SharedHook,
    ready_hook: SharedHook,

    timeouts: Timeouts,

    ready: RunSignal,
    failed: RunSignal,
    ended: RunSignal,

    stdout: OutputBroadcaster,
    stderr: OutputBroadcaster,

    state: watch::Sender<TaskState>,
    /// Pid of the live process, 0 when none.
    pid: AtomicU32,
    running: AtomicBool,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let deps: Vec<&str> = self.dependencies.iter().map(|d| d.name()).collect();
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("dependencies", &deps)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Task {
    pub fn builder<I, S>(name: impl Into<TaskName>, command: I) -> TaskBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TaskBuilder::new(name, command)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn dependencies(&self) -> &[Arc<Task>] {
        &self.dependencies
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Set once the ready hook has declared the process up.
    pub fn ready(&self) -> &RunSignal {
        &self.ready
    }

    /// Set when the process exited with a non-zero code or was killed, and
    /// when a dependency failure or spawn error kept it from starting.
    pub fn failed(&self) -> &RunSignal {
        &self.failed
    }

    /// Set at the very end of every run cycle.
    pub fn ended(&self) -> &RunSignal {
        &self.ended
    }

    pub fn stdout(&self) -> &OutputBroadcaster {
        &self.stdout
    }

    pub fn stderr(&self) -> &OutputBroadcaster {
        &self.stderr
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// Pid of the live process, if one is running.
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// True while a `run()` call is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Declare the process ready. Meant to be called by the ready hook.
    pub fn set_ready(&self) {
        info!(task = %self.name, "task is ready");
        self.ready.set();
    }

    /// Run one full cycle of the task.
    ///
    /// Cancelling `stop` is the way to shut the task down: before the spawn
    /// it aborts the run, afterwards it triggers the interrupt then kill
    /// escalation. Dropping the returned future instead kills the process
    /// without running the post hook.
    ///
    /// Errors are reserved for failures before or during the spawn (pre
    /// hook, dependency failure, spawn error) and for a failing post hook.
    /// What happened to the process itself is reported through the
    /// [`RunOutcome`] and the `failed` signal.
    pub async fn run(&self, stop: CancellationToken) -> Result<RunOutcome> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(KindleError::AlreadyRunning(self.name.clone()));
        }
        let _running = RunningGuard(&self.running);

        info!(task = %self.name, "starting task");
        debug!(task = %self.name, command = ?self.command, "task command");

        self.ready.reset();
        self.failed.reset();
        self.ended.reset();
        self.set_state(TaskState::Idle);

        let result = self.run_cycle(&stop).await;
        if let Err(e) = &result {
            error!(task = %self.name, error = %e, "task run aborted");
            // A failed dependency or spawn is passed on to dependents so they
            // do not wait forever. A failing pre hook is only reported.
            if !matches!(
                e,
                KindleError::PreHookFailed { .. } | KindleError::PreHookTimeout { .. }
            ) {
                self.failed.set();
            }
        }

        self.set_state(TaskState::PostHook);
        let post = self.run_post_hook().await;

        self.ended.set();
        self.set_state(TaskState::Ended);
        info!(task = %self.name, "task exited");

        result.and_then(|outcome| post.map(|()| outcome))
    }

    async fn run_cycle(&self, stop: &CancellationToken) -> Result<RunOutcome> {
        let prepared = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                info!(task = %self.name, "stop requested before process start; aborting run");
                return Ok(RunOutcome::Aborted);
            }
            prepared = self.prepare() => prepared,
        };
        prepared?;

        self.set_state(TaskState::Starting);
        let mut child = process::spawn(&self.name, &self.command)?;
        let pid = child.id();
        self.pid.store(pid.unwrap_or(0), Ordering::Release);
        info!(task = %self.name, pid = ?pid, "process started");

        self.set_state(TaskState::Running);
        let outcome = self.supervise(&mut child, stop).await;
        self.pid.store(0, Ordering::Release);

        match &outcome {
            Ok(o) if o.success() => {
                debug!(task = %self.name, outcome = ?o, "process finished cleanly");
            }
            Ok(o) => {
                error!(task = %self.name, outcome = ?o, "process returned a non zero code");
                self.failed.set();
            }
            Err(e) => {
                error!(task = %self.name, error = %e, "lost track of process");
            }
        }

        outcome
    }

    async fn prepare(&self) -> Result<()> {
        self.set_state(TaskState::PreHook);
        self.run_pre_hook().await?;

        self.set_state(TaskState::AwaitingDependencies);
        self.await_dependencies().await
    }

    async fn run_pre_hook(&self) -> Result<()> {
        let limit = self.timeouts.pre_hook;
        match timeout(limit, self.pre_hook.call(self)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(KindleError::PreHookFailed {
                task: self.name.clone(),
                source,
            }),
            Err(_) => Err(KindleError::PreHookTimeout {
                task: self.name.clone(),
                timeout: limit,
            }),
        }
    }

    async fn run_post_hook(&self) -> Result<()> {
        let limit = self.timeouts.post_hook;
        let result = match timeout(limit, self.post_hook.call(self)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(KindleError::PostHookFailed {
                task: self.name.clone(),
                source,
            }),
            Err(_) => Err(KindleError::PostHookTimeout {
                task: self.name.clone(),
                timeout: limit,
            }),
        };

        if let Err(e) = &result {
            error!(task = %self.name, error = %e, "post hook did not complete");
        }
        result
    }

    /// Failure or timeout of the kill hook is logged only; the shutdown
    /// sequence carries on either way.
    async fn run_kill_hook(&self) {
        let limit = self.timeouts.kill_hook;
        match timeout(limit, self.kill_hook.call(self)).await {
            Ok(Ok(())) => debug!(task = %self.name, "kill hook finished"),
            Ok(Err(e)) => error!(task = %self.name, error = %e, "kill hook failed"),
            Err(_) => error!(
                task = %self.name,
                timeout = ?limit,
                "kill hook failed to execute in time"
            ),
        }
    }

    /// Wait for every dependency to become ready, concurrently.
    ///
    /// The first dependency that reports `failed` aborts the wait and the
    /// remaining races are cancelled.
    async fn await_dependencies(&self) -> Result<()> {
        if self.dependencies.is_empty() {
            return Ok(());
        }

        info!(
            task = %self.name,
            count = self.dependencies.len(),
            "waiting for dependencies"
        );

        let mut races = JoinSet::new();
        for dep in &self.dependencies {
            let dep = Arc::clone(dep);
            races.spawn(async move {
                let start = dep.wait_started().await;
                (dep.name.clone(), start)
            });
        }

        while let Some(joined) = races.join_next().await {
            let (dependency, start) = joined.map_err(|e| KindleError::Other(e.into()))?;
            match start {
                DependencyStart::Ready => {
                    debug!(task = %self.name, dependency = %dependency, "dependency ready");
                }
                DependencyStart::Failed => {
                    // Dropping `races` aborts the remaining waits.
                    return Err(KindleError::DependencyFailed {
                        task: self.name.clone(),
                        dependency,
                    });
                }
            }
        }

        Ok(())
    }

    /// Resolve on whichever of `ready`/`failed` is set first. When both are
    /// set, failure wins.
    async fn wait_started(&self) -> DependencyStart {
        tokio::select! {
            biased;
            _ = self.failed.wait() => DependencyStart::Failed,
            _ = self.ready.wait() => DependencyStart::Ready,
        }
    }

    /// Drive the live process: stream its output, run the ready hook, and
    /// wait for exit or a stop request. The ready hook and the output
    /// streams are dropped as soon as the process is gone.
    async fn supervise(&self, child: &mut Child, stop: &CancellationToken) -> Result<RunOutcome> {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let output = async {
            tokio::join!(
                process::pump_lines(&self.name, "stdout", stdout, &self.stdout),
                process::pump_lines(&self.name, "stderr", stderr, &self.stderr),
            );
        };
        let mut probe = self.ready_hook.call(self);
        let lifecycle = self.wait_or_stop(child, stop);
        tokio::pin!(output, lifecycle);

        let mut probe_done = false;
        let mut output_done = false;

        // The probe is polled first so it is subscribed before the first
        // output line is published.
        let outcome = loop {
            tokio::select! {
                biased;
                res = &mut probe, if !probe_done => {
                    probe_done = true;
                    if let Err(e) = res {
                        warn!(task = %self.name, error = %e, "ready hook failed");
                    }
                }
                _ = &mut output, if !output_done => {
                    output_done = true;
                }
                outcome = &mut lifecycle => break outcome,
            }
        };

        if !probe_done {
            debug!(task = %self.name, "cancelling ready hook");
        }

        // Lines written just before exit may still sit in the pipes. A
        // grandchild holding the pipes open must not stall the run.
        if !output_done && timeout(OUTPUT_DRAIN, &mut output).await.is_err() {
            debug!(task = %self.name, "output pipes still open after exit; detaching");
        }
        outcome
    }

    async fn wait_or_stop(&self, child: &mut Child, stop: &CancellationToken) -> Result<RunOutcome> {
        tokio::select! {
            status = child.wait() => {
                let status = status?;
                info!(task = %self.name, exit_code = ?status.code(), "process exited");
                Ok(RunOutcome::Exited { code: status.code() })
            }
            _ = stop.cancelled() => self.shutdown(child).await,
        }
    }

    /// Interrupt, wait out the grace period, then kill.
    async fn shutdown(&self, child: &mut Child) -> Result<RunOutcome> {
        warn!(task = %self.name, "requested task stop; sending interrupt");
        self.set_state(TaskState::StoppingGraceful);
        if let Err(e) = process::interrupt(child) {
            warn!(task = %self.name, error = %e, "failed to deliver interrupt");
        }

        let grace = self.timeouts.stop_grace;
        info!(task = %self.name, grace = ?grace, "waiting for process to terminate");

        match timeout(grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                info!(task = %self.name, exit_code = ?status.code(), "process stopped");
                Ok(RunOutcome::Stopped {
                    code: status.code(),
                })
            }
            Err(_) => {
                error!(task = %self.name, "failed to stop process gracefully; killing it");
                self.set_state(TaskState::StoppingForced);
                if let Err(e) = process::kill(child) {
                    error!(task = %self.name, error = %e, "failed to deliver kill signal");
                }

                self.run_kill_hook().await;

                let status = child.wait().await?;
                debug!(task = %self.name, status = ?status, "killed process reaped");
                Ok(RunOutcome::Killed)
            }
        }
    }

    fn set_state(&self, state: TaskState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(task = %self.name, from = %previous, to = %state, "task state transition");
        }
    }
}

/// Clears the running flag however `run()` ends, including being dropped.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Builder for [`Task`].
///
/// ```no_run
/// use kindle::task::{Task, probes};
///
/// # fn main() -> kindle::errors::Result<()> {
/// let broker = Task::builder("broker", ["mosquitto"])
///     .ready_hook(probes::wait_for_pattern(r"mosquitto version [0-9.]+ running")?)
///     .build()?;
///
/// let subscriber = Task::builder("sub", ["mosquitto_sub", "-t", "test_topic"])
///     .after(&broker)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct TaskBuilder {
    name: TaskName,
    command: Vec<String>,
    dependencies: Vec<Arc<Task>>,
    pre_hook: SharedHook,
    post_hook: SharedHook,
    kill_hook: SharedHook,
    ready_hook: SharedHook,
    timeouts: Timeouts,
}

impl TaskBuilder {
    pub fn new<I, S>(name: impl Into<TaskName>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
            dependencies: Vec::new(),
            pre_hook: Arc::new(NoopHook),
            post_hook: Arc::new(NoopHook),
            kill_hook: Arc::new(NoopHook),
            ready_hook: Arc::new(ReadyImmediately),
            timeouts: Timeouts::default(),
        }
    }

    /// Wait for `dependency` to be ready before spawning.
    pub fn after(mut self, dependency: &Arc<Task>) -> Self {
        self.dependencies.push(Arc::clone(dependency));
        self
    }

    pub fn after_all<'a>(mut self, dependencies: impl IntoIterator<Item = &'a Arc<Task>>) -> Self {
        self.dependencies.extend(dependencies.into_iter().cloned());
        self
    }

    pub fn pre_hook(mut self, hook: impl TaskHook + 'static) -> Self {
        self.pre_hook = Arc::new(hook);
        self
    }

    pub fn post_hook(mut self, hook: impl TaskHook + 'static) -> Self {
        self.post_hook = Arc::new(hook);
        self
    }

    pub fn kill_hook(mut self, hook: impl TaskHook + 'static) -> Self {
        self.kill_hook = Arc::new(hook);
        self
    }

    pub fn ready_hook(mut self, hook: impl TaskHook + 'static) -> Self {
        self.ready_hook = Arc::new(hook);
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Time between the interrupt and the kill signal on stop.
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.timeouts.stop_grace = grace;
        self
    }

    pub fn build(self) -> Result<Arc<Task>> {
        if self.name.trim().is_empty() {
            return Err(KindleError::ConfigError("task name must not be empty".into()));
        }
        if self.command.is_empty() {
            return Err(KindleError::ConfigError(format!(
                "task '{}' has an empty command",
                self.name
            )));
        }

        // Dependencies form a set keyed by name.
        let mut dependencies: Vec<Arc<Task>> = Vec::with_capacity(self.dependencies.len());
        for dep in self.dependencies {
            if !dependencies.iter().any(|d| d.name == dep.name) {
                dependencies.push(dep);
            }
        }

        let (state, _) = watch::channel(TaskState::Idle);

        Ok(Arc::new(Task {
            name: self.name,
            command: self.command,
            dependencies,
            pre_hook: self.pre_hook,
            post_hook: self.post_hook,
            kill_hook: self.kill_hook,
            ready_hook: self.ready_hook,
            timeouts: self.timeouts,
            ready: RunSignal::new(),
            failed: RunSignal::new(),
            ended: RunSignal::new(),
            stdout: OutputBroadcaster::new(),
            stderr: OutputBroadcaster::new(),
            state,
            pid: AtomicU32::new(0),
            running: AtomicBool::new(false),
        }))
    }
}
