use std::time::{Duration, Instant};

use skel_core::{ErrorClass, TaskError};
use tracing::{debug, error, warn};

use crate::scheduler::task::Task;
use crate::scheduler::types::TaskState;

use super::core::{PoolError, PoolState};
use super::TaskPool;

impl<T> TaskPool<T> {
    /// Hand a processed task back to the pool.
    ///
    /// Depending on its state the task is finalized into results, routed to
    /// its parent, parked while its new children run, or, when it failed,
    /// used to tear down its lineage or panic the pool.
    pub fn put_processed_task(&self, mut task: Task<T>) {
        let mut state = self.lock();
        let own_id = task.id().own_id;

        let Some(entry) = state.processing.remove(&own_id) else {
            warn!(task = %task.id(), "processed task was not being tracked, dropping");
            return;
        };
        if entry.tainted {
            debug!(task = %entry.id, "dropping result from a torn-down lineage");
            return;
        }
        if state.panic.is_some() {
            debug!(task = %task.id(), "pool panicked, dropping processed task");
            return;
        }

        if let Some(err) = task.exception().cloned() {
            task.discard_pending();
            if err.class() == ErrorClass::PoolFatal {
                error!(task = %task.id(), error = %err, "task raised pool-fatal error");
                state.panic = Some(err);
                self.ready_cond.notify_all();
                self.result_cond.notify_all();
                return;
            }
            if err.is_lineage_fatal(task.is_root()) {
                self.tear_down_lineage(&mut state, task, err);
                return;
            }
            // Ordinary failure below the root: the parent receives it as data.
        }

        if task.is_finished() {
            if task.is_root() {
                debug!(task = %task.id(), "root finished");
                task.stats().mark(TaskState::Results);
                state.results.push_back(task);
                self.result_cond.notify_one();
            } else {
                self.finish_child(&mut state, task);
            }
            return;
        }

        if task.family().has_ready_child_task() {
            let mut spawned = 0usize;
            while let Some(child) = task.family_mut().get_ready_child() {
                child.stats().mark(TaskState::Ready);
                state.promoted.push(child);
                spawned += 1;
            }
            debug!(task = %task.id(), spawned, "task waiting on children");
            task.stats().mark(TaskState::Waiting);
            state.waiting.insert(own_id, task);
            self.ready_cond.notify_all();
        } else {
            warn!(
                task = %task.id(),
                pending = task.instruction_count(),
                "task returned without progress, re-queueing"
            );
            task.stats().mark(TaskState::Ready);
            state.promoted.push(task);
            self.ready_cond.notify_one();
        }
    }

    /// Deliver a finished child to its parked parent and promote the parent
    /// once it has nothing left in flight.
    fn finish_child(&self, state: &mut PoolState<T>, child: Task<T>) {
        let Some(parent_id) = child.id().parent_id else {
            return;
        };
        let Some(parent) = state.waiting.get_mut(&parent_id) else {
            warn!(child = %child.id(), "parent of finished child is not waiting, dropping");
            return;
        };
        if !parent.family_mut().set_finished_child(child) {
            return;
        }
        if parent.is_ready() {
            if let Some(parent) = state.waiting.remove(&parent_id) {
                debug!(task = %parent.id(), "parent promoted");
                parent.stats().mark(TaskState::Ready);
                state.promoted.push(parent);
                self.ready_cond.notify_one();
            }
        }
    }

    /// Remove every queued or parked task of `failed`'s family, taint its
    /// tasks still out with workers, and surface the family root in results
    /// carrying `err`.
    fn tear_down_lineage(&self, state: &mut PoolState<T>, failed: Task<T>, err: TaskError) {
        let family = failed.id().family_id;
        let parked_root = state.waiting.remove(&family);

        let before = state.new_roots.len() + state.promoted.len() + state.waiting.len();
        state.new_roots.retain(|t| t.id().family_id != family);
        state.promoted.retain(|t| t.id().family_id != family);
        state.waiting.retain(|_, t| t.id().family_id != family);
        let discarded = before - (state.new_roots.len() + state.promoted.len() + state.waiting.len());

        let mut tainted = 0usize;
        for entry in state.processing.values_mut() {
            if entry.id.family_id == family {
                entry.tainted = true;
                tainted += 1;
            }
        }

        let root = if failed.is_root() {
            Some(failed)
        } else {
            parked_root.map(|mut root| {
                root.set_exception(err.clone());
                root
            })
        };
        let root = root.map(|mut root| {
            root.discard_pending();
            root
        });

        warn!(
            family,
            error = %err,
            discarded,
            tainted,
            "lineage torn down"
        );

        match root {
            Some(root) => {
                root.stats().mark(TaskState::Results);
                state.results.push_back(root);
                self.result_cond.notify_one();
            }
            None => {
                error!(family, "root of failed lineage was not parked, nothing to report");
            }
        }
    }

    /// Block until a finished root is available or the pool panics.
    pub fn get_result(&self) -> Result<Task<T>, PoolError> {
        let mut state = self.lock();
        loop {
            state.panic_error()?;
            if let Some(task) = state.results.pop_front() {
                return Ok(task);
            }
            state = self.result_cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`get_result`](Self::get_result) with a total time budget.
    ///
    /// A budget too large to turn into a deadline waits until notified.
    pub fn get_result_timeout(&self, timeout: Duration) -> Result<Option<Task<T>>, PoolError> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.get_result().map(Some);
        };
        let mut state = self.lock();
        loop {
            state.panic_error()?;
            if let Some(task) = state.results.pop_front() {
                return Ok(Some(task));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .result_cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }
}
