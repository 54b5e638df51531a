// src/cli.rs

//! CLI argument parsing using `clap`.

use std::time::Duration;

use chrono::Weekday;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::schedule::Schedule;

/// Command-line arguments for `kindle`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "kindle",
    version,
    about = "Supervise a command: readiness detection, graceful stop, periodic runs.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `KINDLE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a command once and supervise it until it exits or Ctrl-C.
    Run(TaskArgs),

    /// Run a command periodically until Ctrl-C.
    Schedule {
        #[command(subcommand)]
        period: PeriodCommand,
    },
}

/// How to start and stop the supervised command.
#[derive(Debug, Clone, Args)]
pub struct TaskArgs {
    /// Task name used in logs. Defaults to the program name.
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Consider the task ready once a stderr line matches this regex.
    #[arg(long, value_name = "REGEX", conflicts_with = "ready_delay")]
    pub ready_pattern: Option<String>,

    /// Consider the task ready this long after it started (e.g. `500ms`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub ready_delay: Option<Duration>,

    /// Time between the interrupt and the kill signal on stop.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration, default_value = "10s")]
    pub stop_grace: Duration,

    /// Command and arguments, after `--`.
    #[arg(last = true, required = true, value_name = "CMD")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct ScheduleOpts {
    /// Also run once immediately.
    #[arg(long)]
    pub run_at_start: bool,

    /// Never trigger within the current period, start with the next one.
    #[arg(long)]
    pub next_period: bool,

    #[command(flatten)]
    pub task: TaskArgs,
}

#[derive(Debug, Clone, Subcommand)]
pub enum PeriodCommand {
    /// Every hour at the given minute.
    Hourly {
        #[arg(long, default_value_t = 0)]
        minute: u32,
        #[command(flatten)]
        opts: ScheduleOpts,
    },
    /// Every day at the given hour.
    Daily {
        #[arg(long, default_value_t = 0)]
        hour: u32,
        #[command(flatten)]
        opts: ScheduleOpts,
    },
    /// Every week on the given weekday and hour.
    Weekly {
        #[arg(long, value_parser = parse_weekday, default_value = "mon")]
        weekday: Weekday,
        #[arg(long, default_value_t = 0)]
        hour: u32,
        #[command(flatten)]
        opts: ScheduleOpts,
    },
    /// Every month on the given weekday of week 0..=3, at midnight.
    Monthly {
        #[arg(long, default_value_t = 0)]
        week: u32,
        #[arg(long, value_parser = parse_weekday, default_value = "mon")]
        weekday: Weekday,
        #[command(flatten)]
        opts: ScheduleOpts,
    },
}

impl PeriodCommand {
    /// Split into the schedule to follow and the task to run on it.
    pub fn into_parts(self) -> (Schedule, TaskArgs) {
        let (schedule, opts) = match self {
            PeriodCommand::Hourly { minute, opts } => (Schedule::hourly(minute), opts),
            PeriodCommand::Daily { hour, opts } => (Schedule::daily(hour), opts),
            PeriodCommand::Weekly {
                weekday,
                hour,
                opts,
            } => (Schedule::weekly(weekday, hour), opts),
            PeriodCommand::Monthly {
                week,
                weekday,
                opts,
            } => (Schedule::monthly(week, weekday), opts),
        };

        let schedule = schedule
            .run_at_start(opts.run_at_start)
            .in_same_period(!opts.next_period);
        (schedule, opts.task)
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

/// Parse durations like `250ms`, `3s`, `1m`, `2h`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    let too_large = || format!("duration '{s}' is too large");
    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(too_large),
        "h" => value
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .ok_or_else(too_large),
        unit => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}

/// Parse weekday names such as `mon` or `Friday`.
pub fn parse_weekday(s: &str) -> Result<Weekday, String> {
    s.trim()
        .parse::<Weekday>()
        .map_err(|_| format!("invalid weekday '{s}'; expected e.g. mon, tue, ..., sun"))
}

