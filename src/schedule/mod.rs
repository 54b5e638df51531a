// src/schedule/mod.rs

//! Periodic execution of a task.
//!
//! A [`Schedule`] is a [`Period`] plus two switches. The drivers in
//! [`driver`] sleep until the next trigger time, run the task once, and
//! repeat until the stop token is cancelled.

pub mod driver;
pub mod period;

use chrono::NaiveDateTime;

use crate::errors::Result;

pub use driver::{daily, hourly, monthly, run_schedule, weekly};
pub use period::Period;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub period: Period,
    /// Run the task once immediately, before the first computed trigger.
    pub run_at_start: bool,
    /// Allow the first trigger inside the current period when its anchor is
    /// still ahead. When false the first trigger is in the next period.
    pub in_same_period: bool,
}

impl Schedule {
    pub fn new(period: Period) -> Self {
        Self {
            period,
            run_at_start: false,
            in_same_period: true,
        }
    }

    pub fn hourly(minute: u32) -> Self {
        Self::new(Period::Hourly { minute })
    }

    pub fn daily(hour: u32) -> Self {
        Self::new(Period::Daily { hour })
    }

    pub fn weekly(weekday: chrono::Weekday, hour: u32) -> Self {
        Self::new(Period::Weekly { weekday, hour })
    }

    pub fn monthly(week: u32, weekday: chrono::Weekday) -> Self {
        Self::new(Period::Monthly { week, weekday })
    }

    pub fn run_at_start(mut self, run_at_start: bool) -> Self {
        self.run_at_start = run_at_start;
        self
    }

    pub fn in_same_period(mut self, in_same_period: bool) -> Self {
        self.in_same_period = in_same_period;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.period.validate()
    }

    /// Next trigger time strictly after `now`.
    pub fn next_after(&self, now: NaiveDateTime) -> Result<NaiveDateTime> {
        self.period.next_after(now, self.in_same_period)
    }
}
