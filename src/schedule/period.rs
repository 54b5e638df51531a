// src/schedule/period.rs

//! Calendar arithmetic for periodic schedules.
//!
//! All computations work on local naive time: "03:00" means 03:00 on the
//! wall clock of the machine.

use std::fmt;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, TimeDelta, Timelike, Weekday};

use crate::errors::{KindleError, Result};

/// What a periodic schedule is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// Every hour at `minute` (0..=59).
    Hourly { minute: u32 },
    /// Every day at `hour`:00 (0..=23).
    Daily { hour: u32 },
    /// Every week on `weekday` at `hour`:00.
    Weekly { weekday: Weekday, hour: u32 },
    /// Every month on the `weekday` of week `week` (0..=3), at midnight.
    /// Week 0 holds the first such weekday of the month.
    Monthly { week: u32, weekday: Weekday },
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Hourly { minute } => write!(f, "hourly at :{minute:02}"),
            Period::Daily { hour } => write!(f, "daily at {hour:02}:00"),
            Period::Weekly { weekday, hour } => write!(f, "weekly on {weekday} at {hour:02}:00"),
            Period::Monthly { week, weekday } => write!(f, "monthly on {weekday} of week {week}"),
        }
    }
}

impl Period {
    /// Check the period parameters are in range.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Period::Hourly { minute } => check_range("minute", minute, 59),
            Period::Daily { hour } => check_range("hour", hour, 23),
            Period::Weekly { hour, .. } => check_range("hour", hour, 23),
            Period::Monthly { week, .. } => check_range("week", week, 3),
        }
    }

    /// First trigger time strictly after `now`.
    ///
    /// With `in_same_period == false` the trigger is pushed out of the
    /// current hour/day/week/month even if the anchor is still ahead.
    pub fn next_after(&self, now: NaiveDateTime, in_same_period: bool) -> Result<NaiveDateTime> {
        self.validate()?;
        match *self {
            Period::Hourly { minute } => next_hourly(now, minute, in_same_period),
            Period::Daily { hour } => next_daily(now, hour, in_same_period),
            Period::Weekly { weekday, hour } => next_weekly(now, weekday, hour, in_same_period),
            Period::Monthly { week, weekday } => next_monthly(now, week, weekday, in_same_period),
        }
    }
}

fn check_range(field: &str, value: u32, max: u32) -> Result<()> {
    if value > max {
        return Err(KindleError::ConfigError(format!(
            "{field} = {value} is out of 0..={max} range"
        )));
    }
    Ok(())
}

fn out_of_range(what: impl fmt::Display) -> KindleError {
    KindleError::ConfigError(format!("schedule computation left the calendar range: {what}"))
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> Result<NaiveDateTime> {
    date.and_hms_opt(hour, minute, 0)
        .ok_or_else(|| out_of_range(format_args!("{date} {hour:02}:{minute:02}")))
}

fn next_hourly(now: NaiveDateTime, minute: u32, in_same_hour: bool) -> Result<NaiveDateTime> {
    let mut base = now;
    if !in_same_hour || now.minute() >= minute {
        base = now
            .checked_add_signed(TimeDelta::hours(1))
            .ok_or_else(|| out_of_range(now))?;
    }
    at(base.date(), base.hour(), minute)
}

fn next_daily(now: NaiveDateTime, hour: u32, in_same_day: bool) -> Result<NaiveDateTime> {
    let mut date = now.date();
    if !in_same_day || now.hour() >= hour {
        date = date.succ_opt().ok_or_else(|| out_of_range(date))?;
    }
    at(date, hour, 0)
}

fn next_weekly(
    now: NaiveDateTime,
    weekday: Weekday,
    hour: u32,
    in_same_week: bool,
) -> Result<NaiveDateTime> {
    let mut offset = i64::from(weekday.num_days_from_monday())
        - i64::from(now.weekday().num_days_from_monday());

    if !in_same_week || offset < 0 || (offset == 0 && now.hour() >= hour) {
        offset += 7;
    }

    // offset is in 0..=13 here.
    let days = u64::try_from(offset).map_err(|_| out_of_range(offset))?;
    let date = now
        .date()
        .checked_add_days(Days::new(days))
        .ok_or_else(|| out_of_range(now))?;
    at(date, hour, 0)
}

fn next_monthly(
    now: NaiveDateTime,
    week: u32,
    weekday: Weekday,
    in_same_month: bool,
) -> Result<NaiveDateTime> {
    let mut year = now.year();
    let mut month = now.month();

    let (start_weekday, last_day) = month_layout(year, month)?;
    let mut day = candidate_day(week, weekday, start_weekday);

    if day >= i64::from(last_day) || !in_same_month || day <= i64::from(now.day()) {
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }

        let (start_weekday, _) = month_layout(year, month)?;
        day = candidate_day(week, weekday, start_weekday);
    }

    // Candidates never exceed 28, so they fit every month.
    let day = u32::try_from(day).map_err(|_| out_of_range(day))?;
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| out_of_range(format_args!("{year}-{month:02}-{day:02}")))?;
    at(date, 0, 0)
}

/// Day of month of `weekday` in week `week`, given the weekday of the 1st.
fn candidate_day(week: u32, weekday: Weekday, start_weekday: Weekday) -> i64 {
    let mut day = i64::from(week) * 7
        + (i64::from(weekday.num_days_from_monday())
            - i64::from(start_weekday.num_days_from_monday()))
        + 1;
    if day <= 0 {
        day += 7;
    }
    day
}

/// Weekday of the 1st and number of days of the given month.
fn month_layout(year: i32, month: u32) -> Result<(Weekday, u32)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| out_of_range(format_args!("{year}-{month:02}")))?;
    let next_first = first
        .checked_add_months(chrono::Months::new(1))
        .ok_or_else(|| out_of_range(first))?;
    let last = next_first.pred_opt().ok_or_else(|| out_of_range(next_first))?;
    Ok((first.weekday(), last.day()))
}
