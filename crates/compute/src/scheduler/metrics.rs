use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use skel_core::ErrorClass;

use super::pool::PoolSnapshot;

/// Runner operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunnerMetrics {
    /// Instructions executed, by instruction name.
    pub steps_executed: HashMap<String, u64>,
    /// Tasks that came out of a step carrying a new failure, by class.
    pub failures: HashMap<ErrorClass, u64>,
    /// Finished roots handed to the pool by this runner's workers.
    pub roots_finished: u64,
    /// Worker utilization ratio (0.0 - 1.0).
    pub worker_utilization: f64,
    /// Average step duration by instruction name.
    pub avg_step_duration: HashMap<String, Duration>,
    /// Last step time by instruction name.
    pub last_step: HashMap<String, DateTime<Utc>>,
    /// Pool group sizes at the last refresh.
    pub pool: PoolSnapshot,
}

impl RunnerMetrics {
    /// Record one executed instruction.
    pub fn record_step(&mut self, instruction: &str, duration: Duration) {
        let count = {
            let c = self.steps_executed.entry(instruction.to_string()).or_default();
            *c += 1;
            *c
        };
        self.last_step.insert(instruction.to_string(), Utc::now());

        let prev_avg = self
            .avg_step_duration
            .get(instruction)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_step_duration.insert(instruction.to_string(), new_avg);
    }

    pub fn record_failure(&mut self, class: ErrorClass) {
        *self.failures.entry(class).or_default() += 1;
    }

    pub fn total_steps(&self) -> u64 {
        self.steps_executed.values().sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.failures.values().sum()
    }
}
