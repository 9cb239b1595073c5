//! Small instruction set used by unit tests to drive tasks through a pool.

use std::sync::{Arc, OnceLock};

use skel_core::TaskError;

use super::id::{IdSource, SequentialIdSource};
use super::pool::TaskPool;
use super::task::{instruction_fn, Environment, Instruction, Task};

pub(crate) type Program = Vec<Arc<dyn Instruction<i64>>>;

/// Process-wide counter so ids stay unique across parallel tests and grow
/// in creation order within one test.
pub(crate) fn ids() -> Arc<dyn IdSource> {
    static IDS: OnceLock<Arc<SequentialIdSource>> = OnceLock::new();
    let ids: Arc<SequentialIdSource> = IDS.get_or_init(|| Arc::new(SequentialIdSource::new())).clone();
    ids
}

/// Root task running `program` (last instruction first).
pub(crate) fn root(payload: i64, program: Program) -> Task<i64> {
    let mut task = Task::with_id_source(payload, ids());
    for instruction in program {
        task.push_instruction(instruction);
    }
    task
}

pub(crate) fn env() -> Environment {
    Environment::new("test-worker")
}

pub(crate) fn noop() -> Arc<dyn Instruction<i64>> {
    instruction_fn("noop", |_env: &Environment, _task: &mut Task<i64>| Ok(()))
}

pub(crate) fn add(k: i64) -> Arc<dyn Instruction<i64>> {
    instruction_fn("add", move |_env: &Environment, task: &mut Task<i64>| {
        *task = task.reborn(task.payload() + k);
        Ok(())
    })
}

pub(crate) fn fail(error: TaskError) -> Arc<dyn Instruction<i64>> {
    instruction_fn("fail", move |_env: &Environment, _task: &mut Task<i64>| Err(error.clone()))
}

/// Fails with `error` when the payload equals `when`, otherwise does nothing.
pub(crate) fn fail_if(when: i64, error: TaskError) -> Arc<dyn Instruction<i64>> {
    instruction_fn("fail-if", move |_env: &Environment, task: &mut Task<i64>| {
        if *task.payload() == when {
            Err(error.clone())
        } else {
            Ok(())
        }
    })
}

/// Spawn `n` children with payloads 1..=n, each running `child_program`.
pub(crate) fn split(n: i64, child_program: Program) -> Arc<dyn Instruction<i64>> {
    instruction_fn("split", move |_env: &Environment, task: &mut Task<i64>| {
        for i in 1..=n {
            task.add_child(i, child_program.clone());
        }
        Ok(())
    })
}

/// Spawn one child carrying the parent's payload.
pub(crate) fn delegate(child_program: Program) -> Arc<dyn Instruction<i64>> {
    instruction_fn("delegate", move |_env: &Environment, task: &mut Task<i64>| {
        let payload = *task.payload();
        task.add_child(payload, child_program.clone());
        Ok(())
    })
}

/// Replace the payload with the sum of the children's payloads.
pub(crate) fn merge_sum() -> Arc<dyn Instruction<i64>> {
    instruction_fn("merge-sum", |_env: &Environment, task: &mut Task<i64>| {
        let values = task.family_mut().get_child_params()?;
        task.set_payload(values.iter().sum());
        Ok(())
    })
}

/// Run one instruction of `task` and hand it back to `pool`.
pub(crate) fn step(pool: &TaskPool<i64>, task: Task<i64>) {
    let task = task.compute(&env()).expect("identity preserved");
    pool.put_processed_task(task);
}
