use std::sync::Arc;
use std::thread;
use std::time::Duration;

use skel_core::{ErrorClass, IdSourceKind, TaskError};

use crate::scheduler::pool::PoolError;
use crate::scheduler::runner::{Runner, RunnerError};
use crate::scheduler::task::{instruction_fn, Environment, Task};
use crate::scheduler::testing::{fail, fail_if, merge_sum, noop, root, split};
use crate::scheduler::types::RunnerConfig;

fn config(workers: usize) -> RunnerConfig {
    RunnerConfig {
        worker_threads: workers,
        take_timeout_ms: 10,
        ..RunnerConfig::default()
    }
}

fn collect_sums(runner: &Runner<i64>, n: usize) -> Vec<i64> {
    let pool = runner.pool();
    let mut sums: Vec<i64> = (0..n)
        .map(|_| {
            let task = pool
                .get_result_timeout(Duration::from_secs(10))
                .unwrap()
                .expect("root finished in time");
            assert!(!task.has_exception(), "unexpected failure: {:?}", task.exception());
            *task.payload()
        })
        .collect();
    sums.sort_unstable();
    sums
}

#[test]
fn runner_creation() {
    let runner: Runner<i64> = Runner::new(config(3));
    assert_eq!(runner.worker_count(), 3);
    assert!(!runner.is_shutdown());

    let metrics = runner.metrics();
    assert_eq!(metrics.total_steps(), 0);
    assert_eq!(metrics.worker_utilization, 0.0);
    assert_eq!(metrics.pool.new_roots, 0);
}

#[test]
fn new_root_uses_configured_id_source() {
    let runner: Runner<i64> = Runner::new(RunnerConfig {
        id_source: IdSourceKind::Sequential,
        ..config(1)
    });
    let a = runner.new_root(1);
    let b = runner.new_root(2);
    assert!(a.is_root());
    assert!(b.id().own_id > a.id().own_id);

    assert!(runner.submit(a));
    assert_eq!(runner.metrics().pool.new_roots, 1);
}

#[test]
fn execute_immediate_runs_divide_and_conquer() {
    let runner = Runner::new(config(1));
    let done = runner
        .execute_immediate(root(0, vec![merge_sum(), split(4, vec![noop()])]))
        .unwrap();

    assert_eq!(*done.payload(), 10);
    assert!(done.is_finished());
    let metrics = runner.metrics();
    assert_eq!(metrics.steps_executed["split"], 1);
    assert_eq!(metrics.steps_executed["noop"], 4);
    assert_eq!(metrics.steps_executed["merge-sum"], 1);
    assert_eq!(metrics.roots_finished, 1);
    assert_eq!(metrics.total_failures(), 0);
}

#[test]
fn execute_immediate_reports_defect_on_root() {
    let runner = Runner::new(config(1));
    let child = vec![fail_if(2, TaskError::defect("bad child"))];
    let done = runner
        .execute_immediate(root(0, vec![merge_sum(), split(3, child)]))
        .unwrap();

    assert_eq!(done.exception(), Some(&TaskError::defect("bad child")));
    assert_eq!(runner.metrics().failures[&ErrorClass::Defect], 1);
}

#[test]
fn execute_immediate_surfaces_pool_panic() {
    let runner = Runner::new(config(1));
    let err = runner
        .execute_immediate(root(0, vec![fail(TaskError::panic("halt"))]))
        .unwrap_err();
    assert!(matches!(
        err,
        RunnerError::Pool(PoolError::Panicked(TaskError::Panic(_)))
    ));
}

#[test]
fn execute_immediate_rejects_child_task() {
    let runner = Runner::new(config(1));
    let mut parent = root(0, vec![split(1, vec![])])
        .compute(&Environment::new("t"))
        .unwrap();
    let child = parent.family_mut().get_ready_child().unwrap();

    let err = runner.execute_immediate(child).unwrap_err();
    assert!(matches!(err, RunnerError::Rejected(_)));
}

#[test]
fn identity_change_panics_pool() {
    let runner: Runner<i64> = Runner::new(config(1));
    let impostor = instruction_fn("impostor", |_env: &Environment, task: &mut Task<i64>| {
        *task = root(*task.payload(), vec![]);
        Ok(())
    });
    let err = runner
        .execute_immediate(root(1, vec![impostor]))
        .unwrap_err();
    assert!(matches!(err, RunnerError::Pool(PoolError::Panicked(_))));
}

#[test]
fn run_completes_many_roots() {
    let runner = Arc::new(Runner::new(config(3)));
    for i in 0..20 {
        let r = root(0, vec![merge_sum(), split(3, vec![noop()])]).with_priority(i % 4);
        assert!(runner.submit(r));
    }

    let handle = {
        let runner = Arc::clone(&runner);
        thread::spawn(move || runner.run())
    };
    let sums = collect_sums(&runner, 20);
    runner.shutdown();
    handle.join().unwrap().unwrap();

    assert_eq!(sums, vec![6; 20]);
    let metrics = runner.metrics();
    assert_eq!(metrics.roots_finished, 20);
    assert_eq!(metrics.steps_executed["noop"], 60);
    assert_eq!(metrics.pool.processing, 0);
}

#[test]
fn run_with_sibling_batches() {
    let runner = Arc::new(Runner::new(RunnerConfig {
        batch_siblings: true,
        ..config(2)
    }));
    for _ in 0..5 {
        runner.submit(root(0, vec![merge_sum(), split(4, vec![noop()])]));
    }

    let handle = {
        let runner = Arc::clone(&runner);
        thread::spawn(move || runner.run())
    };
    let sums = collect_sums(&runner, 5);
    runner.shutdown();
    handle.join().unwrap().unwrap();

    assert_eq!(sums, vec![10; 5]);
}

#[test]
fn run_stops_on_pool_panic() {
    let runner = Arc::new(Runner::new(config(2)));
    runner.submit(root(0, vec![fail(TaskError::panic("fatal"))]));

    let result = {
        let runner = Arc::clone(&runner);
        thread::spawn(move || runner.run())
    }
    .join()
    .unwrap();

    assert!(matches!(result, Err(RunnerError::Pool(_))));
    assert!(runner.pool().is_panicked());
    assert_eq!(runner.metrics().failures[&ErrorClass::PoolFatal], 1);
}

#[test]
fn shutdown_stops_idle_workers_with_unbounded_take() {
    let runner: Arc<Runner<i64>> = Arc::new(Runner::new(RunnerConfig {
        take_timeout_ms: 0,
        ..config(2)
    }));
    let handle = {
        let runner = Arc::clone(&runner);
        thread::spawn(move || runner.run())
    };
    thread::sleep(Duration::from_millis(50));
    runner.shutdown();
    handle.join().unwrap().unwrap();
}
