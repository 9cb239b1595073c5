use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::info;

use crate::scheduler::id::{id_source_for, IdSource};
use crate::scheduler::metrics::RunnerMetrics;
use crate::scheduler::pool::{PoolError, TaskPool};
use crate::scheduler::task::Task;
use crate::scheduler::types::RunnerConfig;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("failed to build worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("task {0} is not a root and cannot be submitted")]
    Rejected(String),

    #[error("no task ready and no result available ({pending} tasks still tracked)")]
    Stalled { pending: usize },
}

/// Drives a [`TaskPool`] with worker threads that take tasks, advance them
/// and hand them back.
pub struct Runner<T> {
    pub(super) pool: Arc<TaskPool<T>>,
    pub(super) config: RunnerConfig,
    /// Source for ids of roots created through [`Runner::new_root`].
    pub(super) ids: Arc<dyn IdSource>,
    pub(super) workers: usize,
    pub(super) metrics: Arc<RwLock<RunnerMetrics>>,
    /// Shutdown signal.
    pub(super) shutdown: Arc<AtomicBool>,
    /// Workers currently holding tasks (for utilization tracking).
    pub(super) active_workers: Arc<AtomicUsize>,
}

impl<T> Runner<T> {
    /// Create a runner over a fresh pool.
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_pool(Arc::new(TaskPool::new()), config)
    }

    /// Create a runner over an existing, possibly shared, pool.
    pub fn with_pool(pool: Arc<TaskPool<T>>, config: RunnerConfig) -> Self {
        let workers = config.resolved_worker_threads();
        let ids = id_source_for(config.id_source);
        Self {
            pool,
            config,
            ids,
            workers,
            metrics: Arc::new(RwLock::new(RunnerMetrics::default())),
            shutdown: Arc::new(AtomicBool::new(false)),
            active_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// New root task drawing its lineage's ids from the configured source.
    pub fn new_root(&self, payload: T) -> Task<T> {
        Task::with_id_source(payload, Arc::clone(&self.ids))
    }

    /// Submit a root to the underlying pool.
    pub fn submit(&self, root: Task<T>) -> bool {
        self.pool.add_ready_root_task(root)
    }

    pub fn pool(&self) -> Arc<TaskPool<T>> {
        Arc::clone(&self.pool)
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Number of worker loops [`run`](Self::run) starts.
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Get a snapshot of the current runner metrics.
    pub fn metrics(&self) -> RunnerMetrics {
        let mut metrics = match self.metrics.read() {
            Ok(m) => m.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let active = self.active_workers.load(Ordering::Relaxed);
        metrics.worker_utilization = active as f64 / self.workers.max(1) as f64;
        metrics.pool = self.pool.snapshot();
        metrics
    }

    /// Get an Arc to the metrics (for external reads without cloning).
    pub fn metrics_handle(&self) -> Arc<RwLock<RunnerMetrics>> {
        Arc::clone(&self.metrics)
    }

    /// Signal the worker loops to stop after their current take.
    pub fn shutdown(&self) {
        info!("Runner shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Get an Arc to the shutdown flag (for external shutdown signaling).
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub(super) fn record(&self, f: impl FnOnce(&mut RunnerMetrics)) {
        if let Ok(mut m) = self.metrics.write() {
            f(&mut m);
        }
    }
}
