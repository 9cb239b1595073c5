//! Worker runner -- drives a [`TaskPool`](crate::scheduler::pool::TaskPool)
//! with a fixed set of worker threads.
//!
//! Split into focused submodules:
//! - `core`: Runner struct, constructor, root creation and accessor methods
//! - `execution`: worker loops, single-task stepping and immediate execution

mod core;
mod execution;
#[cfg(test)]
mod tests;

pub use self::core::{Runner, RunnerError};
