use std::sync::MutexGuard;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::scheduler::task::Task;
use crate::scheduler::types::TaskState;

use super::core::{PoolError, PoolState, ProcessingEntry};
use super::TaskPool;

/// Remove the task that should be served first from `list`.
fn pop_best<T>(list: &mut Vec<Task<T>>) -> Option<Task<T>> {
    let best = list
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.schedule_cmp(b))
        .map(|(i, _)| i)?;
    Some(list.swap_remove(best))
}

impl<T> PoolState<T> {
    /// Promoted tasks always go before new roots.
    fn pop_ready(&mut self) -> Option<Task<T>> {
        pop_best(&mut self.promoted).or_else(|| pop_best(&mut self.new_roots))
    }

    fn start_processing(&mut self, task: &Task<T>) {
        task.stats().mark(TaskState::Processing);
        self.processing.insert(
            task.id().own_id,
            ProcessingEntry {
                id: *task.id(),
                tainted: false,
            },
        );
    }
}

impl<T> TaskPool<T> {
    /// Block until a task is ready, the pool panics, or `timeout` runs out.
    ///
    /// `None` waits until notified, as does a budget too large to turn into
    /// a deadline. A timeout is a total budget across wakeups. On success
    /// the lock is still held.
    fn wait_for_ready(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<MutexGuard<'_, PoolState<T>>>, PoolError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.lock();
        loop {
            state.panic_error()?;
            if state.has_ready() {
                return Ok(Some(state));
            }
            match deadline {
                None => {
                    state = self.ready_cond.wait(state).unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    let (guard, _) = self
                        .ready_cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    state = guard;
                }
            }
        }
    }

    /// Take the next ready task and mark it as processing.
    ///
    /// Returns `Ok(None)` when the budget runs out with nothing ready.
    pub fn get_ready_task(&self, timeout: Option<Duration>) -> Result<Option<Task<T>>, PoolError> {
        let Some(mut state) = self.wait_for_ready(timeout)? else {
            return Ok(None);
        };
        let Some(task) = state.pop_ready() else {
            return Ok(None);
        };
        state.start_processing(&task);
        debug!(task = %task.id(), "task dispatched");
        Ok(Some(task))
    }

    /// Take the next ready task together with every ready sibling: same
    /// family and same priority. The whole cohort moves to processing at
    /// once. Empty when the budget runs out.
    pub fn get_ready_tasks(&self, timeout: Option<Duration>) -> Result<Vec<Task<T>>, PoolError> {
        let Some(mut state) = self.wait_for_ready(timeout)? else {
            return Ok(Vec::new());
        };
        let Some(first) = state.pop_ready() else {
            return Ok(Vec::new());
        };
        let family = first.id().family_id;
        let priority = first.priority();
        let is_sibling = |t: &Task<T>| t.id().family_id == family && t.priority() == priority;

        let st = &mut *state;
        let mut siblings = Vec::new();
        for list in [&mut st.promoted, &mut st.new_roots] {
            let (matched, kept): (Vec<_>, Vec<_>) =
                std::mem::take(list).into_iter().partition(|t| is_sibling(t));
            *list = kept;
            siblings.extend(matched);
        }
        siblings.sort_by(|a, b| a.schedule_cmp(b));

        let mut cohort = Vec::with_capacity(siblings.len() + 1);
        cohort.push(first);
        cohort.extend(siblings);
        for task in &cohort {
            state.start_processing(task);
        }
        debug!(family, size = cohort.len(), "cohort dispatched");
        Ok(cohort)
    }
}
