use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::TaskState;

/// Passive record of a task's trip through the pool.
///
/// The pool writes transitions here; scheduling decisions never read it.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStats {
    pub created_at: DateTime<Utc>,
    /// State the task is currently in, with the time it entered.
    pub current: Option<(TaskState, DateTime<Utc>)>,
    /// First time the task entered each state.
    pub first_entered: HashMap<TaskState, DateTime<Utc>>,
    /// Total time spent in each state, closed intervals only.
    pub time_in_state: HashMap<TaskState, Duration>,
    /// Time spent executing this task's own instructions.
    pub computation_time: Duration,
    pub instructions_executed: u64,
    /// Tasks in the subtree rooted here, this one included.
    pub subtree_size: u64,
    /// Generations below this task (0 for a leaf).
    pub subtree_depth: u32,
    /// Computation time of every finished descendant.
    pub subtree_computation_time: Duration,
}

impl Default for TaskStats {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            current: None,
            first_entered: HashMap::new(),
            time_in_state: HashMap::new(),
            computation_time: Duration::ZERO,
            instructions_executed: 0,
            subtree_size: 1,
            subtree_depth: 0,
            subtree_computation_time: Duration::ZERO,
        }
    }
}

impl TaskStats {
    /// Close the current state interval and enter `state`.
    pub fn mark(&mut self, state: TaskState) {
        let now = Utc::now();
        if let Some((prev, since)) = self.current.take() {
            let spent = now.signed_duration_since(since).to_std().unwrap_or_default();
            *self.time_in_state.entry(prev).or_default() += spent;
        }
        self.first_entered.entry(state).or_insert(now);
        self.current = Some((state, now));
    }

    pub fn record_computation(&mut self, duration: Duration) {
        self.computation_time += duration;
        self.instructions_executed += 1;
    }

    /// Fold a finished child's numbers into this task's subtree totals.
    pub fn fold_child(&mut self, child: &TaskStats) {
        self.subtree_size += child.subtree_size;
        self.subtree_depth = self.subtree_depth.max(child.subtree_depth + 1);
        self.subtree_computation_time += child.computation_time + child.subtree_computation_time;
    }

    pub fn time_in(&self, state: TaskState) -> Duration {
        self.time_in_state.get(&state).copied().unwrap_or_default()
    }

    pub fn state(&self) -> Option<TaskState> {
        self.current.map(|(s, _)| s)
    }
}

/// Shared handle to a task's stats. Rebirth keeps the same handle.
#[derive(Debug, Clone, Default)]
pub struct StatsHandle(Arc<Mutex<TaskStats>>);

impl StatsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TaskStats> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mark(&self, state: TaskState) {
        self.lock().mark(state);
    }

    pub fn record_computation(&self, duration: Duration) {
        self.lock().record_computation(duration);
    }

    pub fn fold_child(&self, child: &StatsHandle) {
        if Arc::ptr_eq(&self.0, &child.0) {
            return;
        }
        let child = child.snapshot();
        self.lock().fold_child(&child);
    }

    pub fn snapshot(&self) -> TaskStats {
        self.lock().clone()
    }

    pub fn same_as(&self, other: &StatsHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
