use std::time::Duration;

use serde::{Deserialize, Serialize};
use skel_core::{IdSourceKind, WorkerConfig};

/// Scheduling priority of a task.
///
/// `priority` is assigned by the caller and carried unchanged through a
/// lineage. `intra_family` is the generation depth: 0 for a root, +1 per
/// child level. Higher values of either are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TaskPriority {
    pub priority: i32,
    pub intra_family: u32,
}

impl TaskPriority {
    pub fn new(priority: i32) -> Self {
        Self {
            priority,
            intra_family: 0,
        }
    }

    /// Priority handed to a child of a task with this priority.
    pub fn child_priority(&self) -> Self {
        Self {
            priority: self.priority,
            intra_family: self.intra_family.saturating_add(1),
        }
    }
}

/// Pool-side lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Ready,
    Processing,
    Waiting,
    Results,
}

impl TaskState {
    pub const ALL: [TaskState; 4] = [
        TaskState::Ready,
        TaskState::Processing,
        TaskState::Waiting,
        TaskState::Results,
    ];
}

/// Runner configuration, typically built from [`WorkerConfig`] or TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Number of worker threads. 0 = num_cpus.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Budget for a single take. Non-positive = wait until notified.
    #[serde(default = "default_take_timeout_ms")]
    pub take_timeout_ms: i64,
    /// Whether workers take sibling cohorts instead of single tasks.
    #[serde(default)]
    pub batch_siblings: bool,
    #[serde(default)]
    pub id_source: IdSourceKind,
}

fn default_worker_threads() -> usize { 0 }
fn default_take_timeout_ms() -> i64 { 250 }

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            take_timeout_ms: default_take_timeout_ms(),
            batch_siblings: false,
            id_source: IdSourceKind::default(),
        }
    }
}

impl From<&WorkerConfig> for RunnerConfig {
    fn from(w: &WorkerConfig) -> Self {
        Self {
            worker_threads: w.threads,
            take_timeout_ms: w.take_timeout_ms,
            batch_siblings: w.batch_siblings,
            id_source: w.id_source,
        }
    }
}

impl RunnerConfig {
    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    /// Take budget as understood by the pool.
    pub fn take_timeout(&self) -> Option<Duration> {
        timeout_from_millis(self.take_timeout_ms)
    }
}

/// Map a millisecond budget to a pool timeout. Non-positive means no timeout.
pub fn timeout_from_millis(ms: i64) -> Option<Duration> {
    if ms <= 0 {
        None
    } else {
        Some(Duration::from_millis(ms as u64))
    }
}
