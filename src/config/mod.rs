// src/config/mod.rs

//! Programmatic configuration.
//!
//! There is no configuration file: embedding applications build tasks in
//! code. This module holds the knobs that have sensible defaults, plus
//! [`validate`] which checks a set of tasks before a group starts them.

pub mod validate;

use std::time::Duration;

pub use validate::{start_order, validate_task_graph};

/// Time bounds the supervisor enforces around hooks and shutdown.
///
/// Defaults:
/// - `pre_hook`: 60s
/// - `post_hook`: 10s
/// - `stop_grace`: 10s between the interrupt and the kill signal
/// - `kill_hook`: 5s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub pre_hook: Duration,
    pub post_hook: Duration,
    pub stop_grace: Duration,
    pub kill_hook: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            pre_hook: Duration::from_secs(60),
            post_hook: Duration::from_secs(10),
            stop_grace: Duration::from_secs(10),
            kill_hook: Duration::from_secs(5),
        }
    }
}

impl Timeouts {
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_pre_hook(mut self, timeout: Duration) -> Self {
        self.pre_hook = timeout;
        self
    }

    pub fn with_post_hook(mut self, timeout: Duration) -> Self {
        self.post_hook = timeout;
        self
    }

    pub fn with_kill_hook(mut self, timeout: Duration) -> Self {
        self.kill_hook = timeout;
        self
    }
}
