// src/task/probes.rs

//! Standard readiness probes, used as a task's ready hook.
//!
//! A probe runs alongside the process for one run cycle and calls
//! [`Task::set_ready`] when it decides the process is up. The task drops the
//! probe when the process ends, whether or not it fired.

use std::time::Duration;

use regex::Regex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::errors::{KindleError, Result};
use crate::task::Task;
use crate::task::hooks::{HookFuture, TaskHook};

/// Ready once a stderr line matches a pattern.
#[derive(Debug, Clone)]
pub struct PatternProbe {
    pattern: Regex,
}

impl PatternProbe {
    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }
}

/// Build a probe that waits for a stderr line matching `pattern`.
///
/// An invalid regex is a configuration error.
pub fn wait_for_pattern(pattern: &str) -> Result<PatternProbe> {
    let pattern = Regex::new(pattern)
        .map_err(|e| KindleError::ConfigError(format!("invalid readiness pattern '{pattern}': {e}")))?;
    Ok(PatternProbe { pattern })
}

impl From<Regex> for PatternProbe {
    fn from(pattern: Regex) -> Self {
        Self { pattern }
    }
}

impl TaskHook for PatternProbe {
    fn call<'a>(&'a self, task: &'a Task) -> HookFuture<'a> {
        Box::pin(async move {
            info!(task = %task.name(), pattern = %self.pattern, "waiting for readiness line on stderr");

            // Unregisters on every exit path, including being dropped mid-wait.
            let mut lines = task.stderr().subscribe();

            while let Some(line) = lines.recv().await {
                if self.pattern.is_match(&line) {
                    task.set_ready();
                    return anyhow::Ok(());
                }
                debug!(task = %task.name(), "stderr line did not match readiness pattern");
            }

            warn!(task = %task.name(), "stderr subscription closed before readiness pattern matched");
            anyhow::Ok(())
        })
    }
}

/// Ready after a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct DelayProbe {
    delay: Duration,
}

impl DelayProbe {
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Build a probe that marks the task ready `delay` after it starts.
pub fn wait_for_delay(delay: Duration) -> DelayProbe {
    DelayProbe { delay }
}

/// Like [`wait_for_delay`], taking fractional seconds.
///
/// Negative or non-finite values are a configuration error.
pub fn wait_for_seconds(seconds: f64) -> Result<DelayProbe> {
    Duration::try_from_secs_f64(seconds)
        .map(wait_for_delay)
        .map_err(|e| KindleError::ConfigError(format!("invalid readiness delay {seconds}s: {e}")))
}

impl TaskHook for DelayProbe {
    fn call<'a>(&'a self, task: &'a Task) -> HookFuture<'a> {
        Box::pin(async move {
            info!(task = %task.name(), delay = ?self.delay, "waiting before considering task ready");
            sleep(self.delay).await;
            task.set_ready();
            anyhow::Ok(())
        })
    }
}
