//! The task pool -- shared scheduler state between submitters and workers.
//!
//! Split into focused submodules:
//! - `core`: TaskPool struct, submission, panic state and accessors
//! - `dispatch`: blocking takes of single tasks and sibling cohorts
//! - `completion`: returning processed tasks, failure cascade, results

mod completion;
mod core;
mod dispatch;

pub use self::core::{PoolError, PoolSnapshot, TaskPool};
