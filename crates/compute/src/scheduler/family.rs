use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use skel_core::TaskError;
use tracing::warn;

use super::id::{IdSource, TaskIdentifier};
use super::stats::StatsHandle;
use super::task::Task;
use super::types::TaskPriority;

/// Children of one task, split by where they are in their life.
///
/// `ready` children were produced but not handed to the pool yet,
/// `waiting` holds ids of children in flight, `finished` holds completed
/// children whose payloads have not been gathered. A child only moves
/// forward through these groups.
pub struct TaskFamily<T> {
    parent: TaskIdentifier,
    parent_priority: TaskPriority,
    parent_stats: StatsHandle,
    ids: Arc<dyn IdSource>,
    ready: Vec<Task<T>>,
    waiting: HashSet<u64>,
    finished: Vec<Task<T>>,
}

impl<T> TaskFamily<T> {
    pub(crate) fn new(
        parent: TaskIdentifier,
        parent_priority: TaskPriority,
        parent_stats: StatsHandle,
        ids: Arc<dyn IdSource>,
    ) -> Self {
        Self {
            parent,
            parent_priority,
            parent_stats,
            ids,
            ready: Vec::new(),
            waiting: HashSet::new(),
            finished: Vec::new(),
        }
    }

    pub(crate) fn set_parent(&mut self, parent: TaskIdentifier, priority: TaskPriority) {
        self.parent = parent;
        self.parent_priority = priority;
    }

    pub(crate) fn set_id_source(&mut self, ids: Arc<dyn IdSource>) {
        self.ids = ids;
    }

    pub(crate) fn id_source(&self) -> Arc<dyn IdSource> {
        Arc::clone(&self.ids)
    }

    /// Adopt `child`: give it a fresh child id and the next-generation
    /// priority, then queue it as ready.
    pub fn add_ready_child(&mut self, mut child: Task<T>) {
        let id = TaskIdentifier::new_child_with(&self.parent, self.ids.as_ref());
        child.assign_identity(id, self.parent_priority.child_priority(), self.id_source());
        self.ready.push(child);
    }

    /// Hand out one ready child and remember it as in flight.
    pub fn get_ready_child(&mut self) -> Option<Task<T>> {
        let child = self.ready.pop()?;
        self.waiting.insert(child.id().own_id);
        Some(child)
    }

    /// Accept a completed child back into the family.
    ///
    /// Returns `false` without touching any state if the child is not
    /// finished, belongs to another parent, or was never handed out.
    pub fn set_finished_child(&mut self, child: Task<T>) -> bool {
        let done = child.is_finished() || (child.has_exception() && child.is_ready());
        if !done {
            warn!(parent = %self.parent, child = %child.id(), "rejecting unfinished child");
            return false;
        }
        if child.id().parent_id != Some(self.parent.own_id) {
            warn!(parent = %self.parent, child = %child.id(), "rejecting child of another parent");
            return false;
        }
        if !self.waiting.remove(&child.id().own_id) {
            warn!(parent = %self.parent, child = %child.id(), "rejecting child that is not in flight");
            return false;
        }
        self.parent_stats.fold_child(child.stats());
        self.finished.push(child);
        true
    }

    pub fn has_ready_child_task(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn has_finished_child(&self) -> bool {
        !self.finished.is_empty()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn finished_len(&self) -> usize {
        self.finished.len()
    }

    /// Drop every child not yet handed out and forget the ones in flight.
    pub(crate) fn discard_unfinished(&mut self) {
        self.ready.clear();
        self.waiting.clear();
    }

    /// Scatter `values` over the ready children, one each, in dispatch order.
    pub fn set_child_params(&mut self, values: Vec<T>) -> Result<(), TaskError> {
        if values.len() != self.ready.len() {
            warn!(
                parent = %self.parent,
                values = values.len(),
                children = self.ready.len(),
                "scatter count mismatch"
            );
            return Err(TaskError::defect(format!(
                "cannot scatter {} values over {} ready children",
                values.len(),
                self.ready.len()
            )));
        }
        self.ready.sort_by(|a, b| a.schedule_cmp(b));
        for (child, value) in self.ready.iter_mut().zip(values) {
            child.set_payload(value);
        }
        Ok(())
    }

    /// Gather the finished children's payloads in dispatch order.
    ///
    /// Consumes the finished group. If any child failed, its error is
    /// returned instead so the parent can propagate it.
    pub fn get_child_params(&mut self) -> Result<Vec<T>, TaskError> {
        let mut finished = std::mem::take(&mut self.finished);
        finished.sort_by(|a, b| a.schedule_cmp(b));
        if let Some(err) = finished.iter().find_map(|c| c.exception().cloned()) {
            return Err(err);
        }
        Ok(finished.into_iter().map(Task::into_payload).collect())
    }

    /// Gather expecting exactly `expected` results.
    pub fn get_child_params_exact(&mut self, expected: usize) -> Result<Vec<T>, TaskError> {
        if self.finished.len() != expected {
            warn!(
                parent = %self.parent,
                expected,
                finished = self.finished.len(),
                "gather count mismatch"
            );
            return Err(TaskError::defect(format!(
                "expected {} finished children, found {}",
                expected,
                self.finished.len()
            )));
        }
        self.get_child_params()
    }
}

impl<T> fmt::Debug for TaskFamily<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFamily")
            .field("parent", &self.parent)
            .field("ready", &self.ready.len())
            .field("waiting", &self.waiting.len())
            .field("finished", &self.finished.len())
            .finish()
    }
}
