// src/task/hooks.rs

//! Pluggable asynchronous callbacks run at fixed points of a task's run
//! cycle.
//!
//! A hook receives the owning [`Task`] and returns a boxed future. Time
//! bounds are enforced by the task, not by the hook.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::task::Task;

pub type HookFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// A callback slot of a task (`pre`, `post`, `kill` or `ready`).
pub trait TaskHook: Send + Sync {
    fn call<'a>(&'a self, task: &'a Task) -> HookFuture<'a>;
}

pub type SharedHook = Arc<dyn TaskHook>;

/// Does nothing. Default for the pre, post and kill hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl TaskHook for NoopHook {
    fn call<'a>(&'a self, _task: &'a Task) -> HookFuture<'a> {
        Box::pin(async { anyhow::Ok(()) })
    }
}

/// Marks the task ready as soon as it is started. Default ready hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadyImmediately;

impl TaskHook for ReadyImmediately {
    fn call<'a>(&'a self, task: &'a Task) -> HookFuture<'a> {
        Box::pin(async move {
            task.set_ready();
            anyhow::Ok(())
        })
    }
}

/// Hook backed by a closure.
pub struct FnHook<F>(F);

impl<F> TaskHook for FnHook<F>
where
    F: for<'a> Fn(&'a Task) -> HookFuture<'a> + Send + Sync,
{
    fn call<'a>(&'a self, task: &'a Task) -> HookFuture<'a> {
        (self.0)(task)
    }
}

/// Build a hook from a closure returning a boxed future:
///
/// ```no_run
/// use kindle::task::hooks::hook_fn;
///
/// let hook = hook_fn(|task| {
///     Box::pin(async move {
///         tracing::info!(task = %task.name(), "about to start");
///         anyhow::Ok(())
///     })
/// });
/// ```
pub fn hook_fn<F>(f: F) -> FnHook<F>
where
    F: for<'a> Fn(&'a Task) -> HookFuture<'a> + Send + Sync,
{
    FnHook(f)
}
