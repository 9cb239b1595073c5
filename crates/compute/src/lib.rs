pub mod scheduler;

pub use scheduler::{
    Environment, Instruction, PoolError, Runner, RunnerConfig, RunnerError, RunnerMetrics, Task,
    TaskFamily, TaskIdentifier, TaskPool, TaskPriority, TaskState,
};
pub use skel_core::{ErrorClass, TaskError};
