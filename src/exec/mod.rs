// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`process`] spawns commands with `tokio::process::Command`, delivers
//!   interrupt/kill signals and streams output lines.
//! - [`broadcast`] fans each output line out to every current subscriber.

pub mod broadcast;
pub mod process;

pub use broadcast::{OutputBroadcaster, SubscriberId, Subscription};
