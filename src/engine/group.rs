// src/engine/group.rs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{start_order, validate_task_graph};
use crate::errors::{KindleError, Result};
use crate::schedule::{Schedule, run_schedule};
use crate::task::Task;
use crate::types::{RunOutcome, TaskName};

/// Name used in logs for a member whose task panicked.
const PANICKED_MEMBER: &str = "<panicked member>";

enum Member {
    Once(Arc<Task>),
    Scheduled(Arc<Task>, Schedule),
}

impl Member {
    fn task(&self) -> &Arc<Task> {
        match self {
            Member::Once(task) | Member::Scheduled(task, _) => task,
        }
    }
}

/// How a member finished.
enum Finished {
    Ran(RunOutcome),
    ScheduleStopped,
}

/// A set of tasks supervised together.
///
/// Every dependency of a member must itself be a member, so that someone is
/// responsible for making it ready.
#[derive(Default)]
pub struct TaskGroup {
    members: Vec<Member>,
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.members.iter().map(|m| m.task().name()).collect();
        f.debug_struct("TaskGroup").field("members", &names).finish()
    }
}

/// What each member of a finished group did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupReport {
    /// Outcome of every one-shot task that ran to completion.
    pub outcomes: BTreeMap<TaskName, RunOutcome>,
    /// Scheduled tasks whose schedule was stopped cleanly.
    pub schedules_stopped: BTreeSet<TaskName>,
}

impl GroupReport {
    pub fn outcome(&self, task: &str) -> Option<RunOutcome> {
        self.outcomes.get(task).copied()
    }

    /// True when every one-shot task succeeded or was stopped on request.
    pub fn all_succeeded(&self) -> bool {
        self.outcomes
            .values()
            .all(|o| o.success() || o.stop_requested())
    }
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task that runs once.
    pub fn with_task(mut self, task: &Arc<Task>) -> Self {
        self.members.push(Member::Once(Arc::clone(task)));
        self
    }

    /// Add a task driven by `schedule`.
    pub fn with_schedule(mut self, task: &Arc<Task>, schedule: Schedule) -> Self {
        self.members.push(Member::Scheduled(Arc::clone(task), schedule));
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Validate the group and return the dependency-respecting start order.
    pub fn validate(&self) -> Result<Vec<TaskName>> {
        let tasks: Vec<Arc<Task>> = self.members.iter().map(|m| Arc::clone(m.task())).collect();
        validate_task_graph(&tasks)?;

        for member in &self.members {
            if let Member::Scheduled(task, schedule) = member {
                schedule.validate().map_err(|e| {
                    KindleError::ConfigError(format!("schedule of task '{}': {e}", task.name()))
                })?;
            }
        }

        start_order(&tasks)
    }

    /// Run every member concurrently until all have finished.
    ///
    /// Cancelling `stop` stops every member. The first member that returns
    /// an error stops the others too; that error is returned once they have
    /// all shut down. A one-shot task exiting with a non-zero code is not an
    /// error and only shows up in the report.
    pub async fn run(self, stop: CancellationToken) -> Result<GroupReport> {
        let order = self.validate()?;
        info!(tasks = ?order, "starting task group");

        let group_stop = stop.child_token();
        let mut members = JoinSet::new();

        for member in self.members {
            let token = group_stop.clone();
            match member {
                Member::Once(task) => {
                    members.spawn(async move {
                        let result = task.run(token).await.map(Finished::Ran);
                        (task.name().to_string(), result)
                    });
                }
                Member::Scheduled(task, schedule) => {
                    members.spawn(async move {
                        let result = run_schedule(&task, &schedule, token)
                            .await
                            .map(|()| Finished::ScheduleStopped);
                        (task.name().to_string(), result)
                    });
                }
            }
        }

        let mut report = GroupReport::default();
        let mut first_error: Option<KindleError> = None;

        while let Some(joined) = members.join_next().await {
            // A panicked member counts as a member error.
            let (name, result) = match joined {
                Ok(finished) => finished,
                Err(e) => (PANICKED_MEMBER.to_string(), Err(KindleError::Other(e.into()))),
            };
            match result {
                Ok(Finished::Ran(outcome)) => {
                    debug!(task = %name, outcome = ?outcome, "group member finished");
                    report.outcomes.insert(name, outcome);
                }
                Ok(Finished::ScheduleStopped) => {
                    debug!(task = %name, "group member schedule stopped");
                    report.schedules_stopped.insert(name);
                }
                Err(e) if first_error.is_none() => {
                    error!(task = %name, error = %e, "group member failed; stopping group");
                    group_stop.cancel();
                    first_error = Some(e);
                }
                Err(e) => {
                    warn!(task = %name, error = %e, "group member failed during group shutdown");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("task group finished");
                Ok(report)
            }
        }
    }
}
