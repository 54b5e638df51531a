// src/lib.rs

//! Minimal process supervisor.
//!
//! - [`task`]: a managed subprocess with hooks, dependencies, readiness
//!   detection and interrupt-then-kill shutdown.
//! - [`schedule`]: hourly/daily/weekly/monthly drivers for a task.
//! - [`engine`]: run several tasks and schedules as one group.
//! - [`exec`]: process plumbing and output fan-out.

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod schedule;
pub mod task;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{CliArgs, Command, TaskArgs};
use crate::schedule::run_schedule;
use crate::task::probes;

pub use crate::config::Timeouts;
pub use crate::engine::{GroupReport, TaskGroup};
pub use crate::errors::KindleError;
pub use crate::schedule::{Period, Schedule};
pub use crate::task::{Task, TaskBuilder};
pub use crate::types::{RunOutcome, TaskName, TaskState};

/// High-level entry point used by `main.rs`.
///
/// Builds a single task from the CLI arguments and supervises it once or on
/// a schedule. Ctrl-C requests a graceful stop.
pub async fn run(args: CliArgs) -> Result<()> {
    let stop = CancellationToken::new();

    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; stopping");
            stop.cancel();
        });
    }

    match args.command {
        Command::Run(task_args) => {
            let task = build_task(&task_args)?;
            let outcome = task.run(stop).await?;
            if !(outcome.success() || outcome.stop_requested()) {
                bail!("task '{}' failed: {outcome:?}", task.name());
            }
            Ok(())
        }
        Command::Schedule { period } => {
            let (schedule, task_args) = period.into_parts();
            let task = build_task(&task_args)?;
            run_schedule(&task, &schedule, stop).await?;
            Ok(())
        }
    }
}

fn build_task(args: &TaskArgs) -> Result<Arc<Task>> {
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| default_task_name(&args.command));

    let mut builder = Task::builder(name, args.command.iter().cloned()).stop_grace(args.stop_grace);

    if let Some(pattern) = &args.ready_pattern {
        builder = builder.ready_hook(probes::wait_for_pattern(pattern)?);
    } else if let Some(delay) = args.ready_delay {
        builder = builder.ready_hook(probes::wait_for_delay(delay));
    }

    Ok(builder.build()?)
}

fn default_task_name(command: &[String]) -> String {
    command
        .first()
        .and_then(|program| Path::new(program).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "task".to_string())
}
