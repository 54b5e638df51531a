//! Hooks that record how they were called.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use kindle::task::Task;
use kindle::task::hooks::{HookFuture, TaskHook};

/// Counts its calls. Clones share the counter.
#[derive(Debug, Clone, Default)]
pub struct CountingHook {
    calls: Arc<AtomicUsize>,
}

impl CountingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TaskHook for CountingHook {
    fn call<'a>(&'a self, _task: &'a Task) -> HookFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        })
    }
}

/// Shared, ordered log of hook events.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Appends `"<label>:<task name>"` to a shared log.
#[derive(Debug, Clone)]
pub struct RecordingHook {
    label: String,
    log: EventLog,
}

impl RecordingHook {
    pub fn new(label: &str, log: &EventLog) -> Self {
        Self {
            label: label.to_string(),
            log: Arc::clone(log),
        }
    }
}

impl TaskHook for RecordingHook {
    fn call<'a>(&'a self, task: &'a Task) -> HookFuture<'a> {
        Box::pin(async move {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, task.name()));
            anyhow::Ok(())
        })
    }
}

/// Always fails with `message`.
#[derive(Debug, Clone)]
pub struct FailingHook {
    message: String,
}

impl FailingHook {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl TaskHook for FailingHook {
    fn call<'a>(&'a self, _task: &'a Task) -> HookFuture<'a> {
        Box::pin(async move { Err::<(), _>(anyhow!("{}", self.message)) })
    }
}

/// Sleeps, then succeeds.
#[derive(Debug, Clone, Copy)]
pub struct SleepingHook(pub Duration);

impl TaskHook for SleepingHook {
    fn call<'a>(&'a self, _task: &'a Task) -> HookFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.0).await;
            anyhow::Ok(())
        })
    }
}

/// Sleeps, then panics with `message`.
#[derive(Debug, Clone)]
pub struct PanickingHook {
    delay: Duration,
    message: String,
}

impl PanickingHook {
    pub fn new(delay: Duration, message: &str) -> Self {
        Self {
            delay,
            message: message.to_string(),
        }
    }
}

impl TaskHook for PanickingHook {
    fn call<'a>(&'a self, _task: &'a Task) -> HookFuture<'a> {
        Box::pin(sleep_then_panic(self.delay, &self.message))
    }
}

async fn sleep_then_panic(delay: Duration, message: &str) -> anyhow::Result<()> {
    tokio::time::sleep(delay).await;
    panic!("{message}")
}
