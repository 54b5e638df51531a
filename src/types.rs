use std::fmt;

/// Task names double as the task's identity: equality, hashing and graph
/// nodes are all keyed by name.
pub type TaskName = String;

/// Lifecycle position of a task within one run cycle.
///
/// A task starts in `Idle`, walks forward through the states below and ends
/// in `Ended`. A new `run()` restarts from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Idle,
    PreHook,
    AwaitingDependencies,
    Starting,
    Running,
    /// Interrupt sent, waiting for the process to exit on its own.
    StoppingGraceful,
    /// Grace period elapsed, kill signal sent.
    StoppingForced,
    PostHook,
    Ended,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Idle => "idle",
            TaskState::PreHook => "pre-hook",
            TaskState::AwaitingDependencies => "awaiting-dependencies",
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::StoppingGraceful => "stopping-graceful",
            TaskState::StoppingForced => "stopping-forced",
            TaskState::PostHook => "post-hook",
            TaskState::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// How a run cycle that got past its pre-spawn checks came to an end.
///
/// `code` is the process exit code, `None` when the process was terminated
/// by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited by itself.
    Exited { code: Option<i32> },
    /// A stop was requested and the process honoured the interrupt within
    /// the grace period.
    Stopped { code: Option<i32> },
    /// A stop was requested, the grace period elapsed and the process was
    /// killed.
    Killed,
    /// A stop was requested before any process was spawned.
    Aborted,
}

impl RunOutcome {
    /// True when the run ended because somebody asked it to stop, as
    /// opposed to the process ending on its own.
    pub fn stop_requested(&self) -> bool {
        !matches!(self, RunOutcome::Exited { .. })
    }

    /// True when the process exited with code 0.
    pub fn success(&self) -> bool {
        matches!(
            self,
            RunOutcome::Exited { code: Some(0) } | RunOutcome::Stopped { code: Some(0) }
        )
    }
}
