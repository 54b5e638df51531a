// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Process failures observed *after* a spawn (non-zero exit, forced kill)
//! are not errors; they are reported through the task's run signals and the
//! returned [`RunOutcome`](crate::types::RunOutcome).

use std::time::Duration;

use thiserror::Error;

use crate::types::TaskName;

#[derive(Error, Debug)]
pub enum KindleError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in task graph: {0}")]
    DependencyCycle(String),

    #[error("pre hook of task '{task}' failed: {source}")]
    PreHookFailed {
        task: TaskName,
        #[source]
        source: anyhow::Error,
    },

    #[error("pre hook of task '{task}' did not finish within {timeout:?}")]
    PreHookTimeout { task: TaskName, timeout: Duration },

    #[error("post hook of task '{task}' failed: {source}")]
    PostHookFailed {
        task: TaskName,
        #[source]
        source: anyhow::Error,
    },

    #[error("post hook of task '{task}' did not finish within {timeout:?}")]
    PostHookTimeout { task: TaskName, timeout: Duration },

    #[error("Dependency '{dependency}' of task '{task}' has failed during process start")]
    DependencyFailed {
        task: TaskName,
        dependency: TaskName,
    },

    #[error("spawning process for task '{task}': {source}")]
    Spawn {
        task: TaskName,
        #[source]
        source: std::io::Error,
    },

    #[error("task '{0}' is already running")]
    AlreadyRunning(TaskName),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KindleError {
    /// Name of the dependency whose failure aborted a run, if that is what
    /// this error reports.
    pub fn failed_dependency(&self) -> Option<&str> {
        match self {
            KindleError::DependencyFailed { dependency, .. } => Some(dependency),
            _ => None,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, KindleError>;
