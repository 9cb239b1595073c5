use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};

use serde::Serialize;
use skel_core::TaskError;
use tracing::{debug, error, warn};

use crate::scheduler::id::TaskIdentifier;
use crate::scheduler::task::Task;
use crate::scheduler::types::TaskState;

/// Error returned by blocking pool calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("task pool panicked: {0}")]
    Panicked(TaskError),
}

/// A dispatched task as the pool remembers it while a worker holds it.
#[derive(Debug, Clone, Copy)]
pub(super) struct ProcessingEntry {
    pub(super) id: TaskIdentifier,
    /// Set when the lineage was torn down while this task was out.
    pub(super) tainted: bool,
}

pub(super) struct PoolState<T> {
    /// Roots submitted from outside, never dispatched.
    pub(super) new_roots: Vec<Task<T>>,
    /// Children and parents whose children all finished.
    pub(super) promoted: Vec<Task<T>>,
    /// Parents parked until their children finish, by own id.
    pub(super) waiting: HashMap<u64, Task<T>>,
    pub(super) processing: HashMap<u64, ProcessingEntry>,
    pub(super) results: VecDeque<Task<T>>,
    pub(super) panic: Option<TaskError>,
}

impl<T> PoolState<T> {
    fn new() -> Self {
        Self {
            new_roots: Vec::new(),
            promoted: Vec::new(),
            waiting: HashMap::new(),
            processing: HashMap::new(),
            results: VecDeque::new(),
            panic: None,
        }
    }

    pub(super) fn has_ready(&self) -> bool {
        !self.new_roots.is_empty() || !self.promoted.is_empty()
    }

    fn is_ready(&self, own_id: u64) -> bool {
        self.new_roots
            .iter()
            .chain(self.promoted.iter())
            .any(|t| t.id().own_id == own_id)
    }

    pub(super) fn is_tracked(&self, own_id: u64) -> bool {
        self.processing.contains_key(&own_id)
            || self.waiting.contains_key(&own_id)
            || self.is_ready(own_id)
    }

    pub(super) fn panic_error(&self) -> Result<(), PoolError> {
        match &self.panic {
            Some(e) => Err(PoolError::Panicked(e.clone())),
            None => Ok(()),
        }
    }
}

/// Counts per pool group at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolSnapshot {
    pub new_roots: usize,
    pub promoted: usize,
    pub waiting: usize,
    pub processing: usize,
    pub tainted: usize,
    pub results: usize,
    pub panicked: bool,
}

/// Concurrent scheduler shared by submitters and workers.
///
/// One mutex guards all state; `ready_cond` wakes takers and `result_cond`
/// wakes result collectors. Every public call runs as one critical section.
pub struct TaskPool<T> {
    pub(super) state: Mutex<PoolState<T>>,
    pub(super) ready_cond: Condvar,
    pub(super) result_cond: Condvar,
}

impl<T> Default for TaskPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskPool<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState::new()),
            ready_cond: Condvar::new(),
            result_cond: Condvar::new(),
        }
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a root task for dispatch.
    ///
    /// Non-root tasks, ids the pool already tracks, and submissions after a
    /// panic are logged and dropped; the return value says whether the task
    /// was accepted.
    pub fn add_ready_root_task(&self, task: Task<T>) -> bool {
        if !task.is_root() {
            warn!(task = %task.id(), "rejecting submission of non-root task");
            return false;
        }
        let mut state = self.lock();
        if let Some(e) = &state.panic {
            warn!(task = %task.id(), panic = %e, "pool panicked, dropping submission");
            return false;
        }
        if state.is_tracked(task.id().own_id) {
            warn!(task = %task.id(), "rejecting duplicate submission");
            return false;
        }
        debug!(task = %task.id(), priority = task.priority().priority, "root submitted");
        task.stats().mark(TaskState::Ready);
        state.new_roots.push(task);
        self.ready_cond.notify_one();
        true
    }

    /// Put the pool into its permanent panic state and wake every waiter.
    ///
    /// The first panic is kept; later ones are logged.
    pub fn raise_panic(&self, error: TaskError) {
        let mut state = self.lock();
        match &state.panic {
            Some(existing) => {
                warn!(existing = %existing, ignored = %error, "pool already panicked");
            }
            None => {
                error!(error = %error, "task pool panic");
                state.panic = Some(error);
            }
        }
        self.ready_cond.notify_all();
        self.result_cond.notify_all();
    }

    pub fn is_panicked(&self) -> bool {
        self.lock().panic.is_some()
    }

    pub fn panic_error(&self) -> Option<TaskError> {
        self.lock().panic.clone()
    }

    /// Tasks the pool is tracking in any group.
    pub fn size(&self) -> usize {
        let state = self.lock();
        state.new_roots.len()
            + state.promoted.len()
            + state.waiting.len()
            + state.processing.len()
            + state.results.len()
    }

    pub fn ready_len(&self) -> usize {
        let state = self.lock();
        state.new_roots.len() + state.promoted.len()
    }

    pub fn new_root_len(&self) -> usize {
        self.lock().new_roots.len()
    }

    pub fn promoted_len(&self) -> usize {
        self.lock().promoted.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.lock().waiting.len()
    }

    pub fn processing_len(&self) -> usize {
        self.lock().processing.len()
    }

    pub fn results_len(&self) -> usize {
        self.lock().results.len()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.lock();
        PoolSnapshot {
            new_roots: state.new_roots.len(),
            promoted: state.promoted.len(),
            waiting: state.waiting.len(),
            processing: state.processing.len(),
            tainted: state.processing.values().filter(|e| e.tainted).count(),
            results: state.results.len(),
            panicked: state.panic.is_some(),
        }
    }

    /// Every group currently holding `own_id`. Tainted processing entries
    /// are not reported.
    pub fn locate(&self, own_id: u64) -> Vec<TaskState> {
        let state = self.lock();
        let mut groups = Vec::new();
        if state.is_ready(own_id) {
            groups.push(TaskState::Ready);
        }
        if state.waiting.contains_key(&own_id) {
            groups.push(TaskState::Waiting);
        }
        if state.processing.get(&own_id).is_some_and(|e| !e.tainted) {
            groups.push(TaskState::Processing);
        }
        if state.results.iter().any(|t| t.id().own_id == own_id) {
            groups.push(TaskState::Results);
        }
        groups
    }

    // ── Library surface ──────────────────────────────────────

    pub fn submit(&self, root: Task<T>) -> bool {
        self.add_ready_root_task(root)
    }

    pub fn take(&self, timeout: Option<std::time::Duration>) -> Result<Option<Task<T>>, PoolError> {
        self.get_ready_task(timeout)
    }

    pub fn take_batch(&self, timeout: Option<std::time::Duration>) -> Result<Vec<Task<T>>, PoolError> {
        self.get_ready_tasks(timeout)
    }

    pub fn complete(&self, task: Task<T>) {
        self.put_processed_task(task)
    }

    pub fn blocking_result(&self) -> Result<Task<T>, PoolError> {
        self.get_result()
    }
}
