//! skel-worker: runs divide-and-conquer range sums through a task pool.
//!
//! Each job sums the integers in `[0, range)`. A task whose span is wider
//! than `--leaf` splits it in half, hands both halves to child tasks and
//! adds their sums once both have finished.

use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use skel_compute::scheduler::{instruction_fn, Instruction};
use skel_compute::{Environment, Runner, RunnerConfig, Task, TaskError};
use skel_core::config::{load_dotenv, Config};

// ── CLI ─────────────────────────────────────────────────────────────

/// Hierarchical task scheduler demo worker.
#[derive(Parser, Debug)]
#[command(name = "skel-worker", version, about)]
struct Cli {
    /// Number of root jobs to submit. Later jobs get higher priority.
    #[arg(long, env = "SKEL_JOBS", default_value_t = 4,
          value_parser = clap::value_parser!(u32).range(1..=MAX_JOBS))]
    jobs: u32,

    /// Each job sums the integers in [0, range).
    #[arg(long, env = "SKEL_RANGE", default_value_t = 1_000_000,
          value_parser = clap::value_parser!(u64).range(1..=MAX_RANGE))]
    range: u64,

    /// Widest span summed directly instead of split.
    #[arg(long, env = "SKEL_LEAF", default_value_t = 10_000)]
    leaf: u64,

    /// Worker threads (overrides WORKER_THREADS).
    #[arg(long)]
    workers: Option<usize>,

    /// Take sibling cohorts instead of single tasks (overrides BATCH_SIBLINGS).
    #[arg(long)]
    batch: bool,

    /// Print the runner metrics as JSON when done.
    #[arg(long)]
    metrics: bool,

    /// Print the effective configuration as JSON before starting.
    #[arg(long)]
    show_config: bool,
}

/// Largest range whose total still fits in a `u64`.
const MAX_RANGE: u64 = 4_000_000_000;
const MAX_JOBS: i64 = 100_000;

/// Sum of the integers in [lo, hi).
fn span_sum(lo: u64, hi: u64) -> u64 {
    let triangle = |n: u64| (n as u128) * (n.saturating_sub(1) as u128) / 2;
    let total = triangle(hi).saturating_sub(triangle(lo));
    u64::try_from(total).unwrap_or(u64::MAX)
}

// ── Instructions ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
struct Span {
    lo: u64,
    hi: u64,
    sum: u64,
}

fn split_span(leaf: u64) -> Arc<dyn Instruction<Span>> {
    instruction_fn("split-span", move |_env: &Environment, task: &mut Task<Span>| {
        let Span { lo, hi, .. } = *task.payload();
        if hi <= lo {
            return Err(TaskError::defect(format!("empty span [{lo}, {hi})")));
        }
        if hi - lo <= leaf.max(1) {
            task.payload_mut().sum = span_sum(lo, hi);
            return Ok(());
        }
        let mid = lo + (hi - lo) / 2;
        task.push_instruction(merge_halves());
        for (a, b) in [(lo, mid), (mid, hi)] {
            task.add_child(Span { lo: a, hi: b, sum: 0 }, vec![split_span(leaf)]);
        }
        Ok(())
    })
}

fn merge_halves() -> Arc<dyn Instruction<Span>> {
    instruction_fn("merge-halves", |_env: &Environment, task: &mut Task<Span>| {
        let halves = task.family_mut().get_child_params_exact(2)?;
        let Span { lo, hi, .. } = *task.payload();
        let sum = halves
            .iter()
            .try_fold(0u64, |acc, h| acc.checked_add(h.sum))
            .ok_or_else(|| TaskError::failed(format!("sum over [{lo}, {hi}) overflows")))?;
        task.payload_mut().sum = sum;
        Ok(())
    })
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    load_dotenv();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter)),
        )
        .init();

    let cli = Cli::parse();
    config.log_summary();
    if cli.show_config {
        println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
    }

    let mut runner_config = RunnerConfig::from(&config.worker);
    if let Some(workers) = cli.workers {
        runner_config.worker_threads = workers;
    }
    runner_config.batch_siblings |= cli.batch;

    let runner = Arc::new(Runner::<Span>::new(runner_config));
    for job in 0..cli.jobs {
        let root = runner
            .new_root(Span { lo: 0, hi: cli.range, sum: 0 })
            .with_priority(i32::try_from(job).unwrap_or(i32::MAX))
            .with_instruction(split_span(cli.leaf));
        if !runner.submit(root) {
            warn!(job, "job rejected by pool");
        }
    }

    info!(jobs = cli.jobs, range = cli.range, leaf = cli.leaf, "skel-worker starting");

    let handle = {
        let runner = Arc::clone(&runner);
        thread::Builder::new()
            .name("skel-runner".into())
            .spawn(move || runner.run())
            .context("failed to spawn runner thread")?
    };

    let pool = runner.pool();
    let expected = span_sum(0, cli.range);
    let mut failed = 0u32;
    for _ in 0..cli.jobs {
        let done = pool.get_result()?;
        match done.exception() {
            Some(e) => {
                failed += 1;
                warn!(task = %done.id(), error = %e, "job failed");
            }
            None => {
                let stats = done.stats().snapshot();
                info!(
                    task = %done.id(),
                    sum = done.payload().sum,
                    correct = done.payload().sum == expected,
                    subtree_size = stats.subtree_size,
                    subtree_depth = stats.subtree_depth,
                    "job finished"
                );
            }
        }
    }

    runner.shutdown();
    handle
        .join()
        .map_err(|_| anyhow!("runner thread panicked"))??;

    if cli.metrics {
        println!("{}", serde_json::to_string_pretty(&runner.metrics())?);
    }

    info!(failed, "skel-worker exited cleanly");
    if failed > 0 {
        return Err(anyhow!("{failed} of {} jobs failed", cli.jobs));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_sum_matches_direct_sum() {
        assert_eq!(span_sum(0, 1), 0);
        assert_eq!(span_sum(0, 101), 5050);
        assert_eq!(span_sum(10, 20), (10..20).sum::<u64>());
    }

    #[test]
    fn largest_range_fits() {
        let total = span_sum(0, MAX_RANGE);
        assert_eq!(total, MAX_RANGE / 2 * (MAX_RANGE - 1));
        assert!(Cli::try_parse_from(["skel-worker", "--range", "4000000001"]).is_err());
        assert!(Cli::try_parse_from(["skel-worker", "--jobs", "0"]).is_err());
    }
}
