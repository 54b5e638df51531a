// src/schedule/driver.rs

use std::time::Duration;

use chrono::{Local, NaiveDateTime, Weekday};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::Result;
use crate::schedule::Schedule;
use crate::task::Task;

/// Run `task` on `schedule` until `stop` is cancelled.
///
/// The schedule is validated before anything runs. Each trigger runs one
/// full task cycle to completion before the next trigger is computed, so a
/// run that overlaps a trigger time delays it rather than doubling up.
///
/// Cancellation is a normal stop and yields `Ok(())`, whether it arrives
/// while sleeping or while the task is running (the run is shut down through
/// the usual interrupt/kill escalation). Errors from the task run itself are
/// returned.
pub async fn run_schedule(task: &Task, schedule: &Schedule, stop: CancellationToken) -> Result<()> {
    schedule.validate()?;

    info!(task = %task.name(), schedule = %schedule.period, "starting schedule");

    if schedule.run_at_start {
        info!(task = %task.name(), "running task at schedule start");
        if !run_once(task, &stop).await? {
            return stopped(task);
        }
    }

    loop {
        if stop.is_cancelled() {
            break;
        }

        let now = Local::now().naive_local();
        let next = schedule.next_after(now)?;
        let wait = time_until(now, next);
        info!(task = %task.name(), next_run = %next, "task scheduled");
        debug!(task = %task.name(), wait = ?wait, "sleeping until next run");

        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = sleep(wait) => {}
        }

        if !run_once(task, &stop).await? {
            break;
        }
    }

    stopped(task)
}

/// Run the task once; false when the schedule should stop.
async fn run_once(task: &Task, stop: &CancellationToken) -> Result<bool> {
    let outcome = task.run(stop.clone()).await?;
    debug!(task = %task.name(), outcome = ?outcome, "scheduled run finished");
    Ok(!(outcome.stop_requested() || stop.is_cancelled()))
}

fn stopped(task: &Task) -> Result<()> {
    info!(task = %task.name(), "schedule stopped");
    Ok(())
}

fn time_until(now: NaiveDateTime, then: NaiveDateTime) -> Duration {
    (then - now).to_std().unwrap_or(Duration::ZERO)
}

/// Run `task` every hour at `minute`.
pub async fn hourly(
    task: &Task,
    minute: u32,
    run_at_start: bool,
    in_same_hour: bool,
    stop: CancellationToken,
) -> Result<()> {
    let schedule = Schedule::hourly(minute)
        .run_at_start(run_at_start)
        .in_same_period(in_same_hour);
    run_schedule(task, &schedule, stop).await
}

/// Run `task` every day at `hour`:00.
pub async fn daily(
    task: &Task,
    hour: u32,
    run_at_start: bool,
    in_same_day: bool,
    stop: CancellationToken,
) -> Result<()> {
    let schedule = Schedule::daily(hour)
        .run_at_start(run_at_start)
        .in_same_period(in_same_day);
    run_schedule(task, &schedule, stop).await
}

/// Run `task` every week on `weekday` at `hour`:00.
pub async fn weekly(
    task: &Task,
    weekday: Weekday,
    hour: u32,
    run_at_start: bool,
    in_same_week: bool,
    stop: CancellationToken,
) -> Result<()> {
    let schedule = Schedule::weekly(weekday, hour)
        .run_at_start(run_at_start)
        .in_same_period(in_same_week);
    run_schedule(task, &schedule, stop).await
}

/// Run `task` every month on `weekday` of week `week`, at midnight.
pub async fn monthly(
    task: &Task,
    week: u32,
    weekday: Weekday,
    run_at_start: bool,
    in_same_month: bool,
    stop: CancellationToken,
) -> Result<()> {
    let schedule = Schedule::monthly(week, weekday)
        .run_at_start(run_at_start)
        .in_same_period(in_same_month);
    run_schedule(task, &schedule, stop).await
}
