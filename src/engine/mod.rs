// src/engine/mod.rs

//! Supervision of several tasks as one unit.
//!
//! A [`TaskGroup`] runs one-shot tasks and scheduled tasks side by side
//! under a shared stop token. The group owns the validation of the task
//! graph as a whole (unique names, closed and acyclic dependencies) and
//! tears every member down when one of them errors.

pub mod group;

pub use group::{GroupReport, TaskGroup};
