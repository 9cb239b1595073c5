//! Hierarchical task scheduler.
//!
//! Roots are submitted to a [`TaskPool`]; workers take ready tasks, advance
//! them one instruction at a time and hand them back. A task that spawns
//! children waits in the pool until every child has finished, then is
//! promoted and served before any new root.
//!
//! Failures travel by class: pool-fatal errors halt the pool, defects tear
//! down the failing lineage, and ordinary failures reach the parent as data.

pub mod family;
pub mod id;
pub mod metrics;
pub mod pool;
pub mod runner;
pub mod stats;
pub mod task;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use family::TaskFamily;
pub use id::{id_source_for, IdSource, RandomIdSource, SequentialIdSource, TaskIdentifier};
pub use metrics::RunnerMetrics;
pub use pool::{PoolError, PoolSnapshot, TaskPool};
pub use runner::{Runner, RunnerError};
pub use stats::{StatsHandle, TaskStats};
pub use task::{instruction_fn, Environment, FnInstruction, Instruction, Task};
pub use types::{timeout_from_millis, RunnerConfig, TaskPriority, TaskState};
