use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use skel_core::TaskError;
use tracing::{debug, error, info};

use crate::scheduler::pool::{PoolError, TaskPool};
use crate::scheduler::task::{Environment, Task};

use super::{Runner, RunnerError};

/// Take budget used when the configured one is unbounded, so idle workers
/// still notice shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

impl<T: Send> Runner<T> {
    /// Run the worker loops. Blocks until shutdown is signaled or the pool
    /// panics.
    ///
    /// Uses a thread pool via `rayon`, one long-lived loop per thread.
    pub fn run(&self) -> Result<(), RunnerError> {
        info!(
            workers = self.workers,
            batch_siblings = self.config.batch_siblings,
            "Runner starting"
        );

        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("skel-worker-{i}"))
            .build()?;

        threads.scope(|s| {
            for i in 0..self.workers {
                s.spawn(move |_| {
                    let env = Environment::new(format!("worker-{i}"));
                    if let Err(e) = self.worker_loop(&env) {
                        debug!(worker = env.worker(), error = %e, "worker stopped");
                    }
                });
            }
        });

        match self.pool.panic_error() {
            Some(e) => {
                error!(error = %e, "Runner stopped on pool panic");
                Err(PoolError::Panicked(e).into())
            }
            None => {
                info!("Runner stopped");
                Ok(())
            }
        }
    }

    fn worker_loop(&self, env: &Environment) -> Result<(), PoolError> {
        let timeout = Some(self.config.take_timeout().unwrap_or(SHUTDOWN_POLL));
        while !self.shutdown.load(Ordering::Relaxed) {
            let batch = if self.config.batch_siblings {
                self.pool.take_batch(timeout)?
            } else {
                self.pool.take(timeout)?.into_iter().collect()
            };
            if batch.is_empty() {
                continue;
            }

            self.active_workers.fetch_add(1, Ordering::Relaxed);
            for task in batch {
                self.step_and_complete(&self.pool, task, env);
            }
            self.active_workers.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Advance `task` and return it to `pool`, panicking the pool when the
    /// task's identity was broken.
    fn step_and_complete(&self, pool: &TaskPool<T>, task: Task<T>, env: &Environment) {
        match self.advance(task, env) {
            Ok(task) => {
                if task.is_root() && task.is_finished() {
                    self.record(|m| m.roots_finished += 1);
                }
                pool.put_processed_task(task);
            }
            Err(e) => {
                error!(worker = env.worker(), error = %e, "task lost its identity");
                pool.raise_panic(e);
            }
        }
    }

    /// Execute instructions until the task finishes, fails, or has spawned
    /// children the pool must schedule.
    pub(super) fn advance(&self, mut task: Task<T>, env: &Environment) -> Result<Task<T>, TaskError> {
        while task.has_instruction()
            && !task.has_exception()
            && !task.family().has_ready_child_task()
        {
            let name = task
                .instruction_names()
                .last()
                .map(|n| n.to_string())
                .unwrap_or_default();
            let started = Instant::now();
            task = task.compute(env)?;
            let elapsed = started.elapsed();

            self.record(|m| {
                m.record_step(&name, elapsed);
                if let Some(e) = task.exception() {
                    m.record_failure(e.class());
                }
            });
        }
        Ok(task)
    }

    /// Drive one root to completion on the current thread.
    ///
    /// The root runs in a private pool, so failures are classified exactly
    /// as in [`run`](Self::run). A pool panic is returned as an error.
    pub fn execute_immediate(&self, root: Task<T>) -> Result<Task<T>, RunnerError> {
        debug!(task = %root.id(), "Executing task immediately");
        let label = root.id().to_string();
        let pool = TaskPool::new();
        if !pool.add_ready_root_task(root) {
            return Err(RunnerError::Rejected(label));
        }

        let env = Environment::new("immediate");
        loop {
            if let Some(done) = pool.get_result_timeout(Duration::ZERO)? {
                return Ok(done);
            }
            let Some(task) = pool.get_ready_task(Some(Duration::ZERO))? else {
                return Err(RunnerError::Stalled { pending: pool.size() });
            };
            self.step_and_complete(&pool, task, &env);
        }
    }
}
