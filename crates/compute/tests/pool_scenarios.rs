//! Multi-threaded scenarios against the public pool API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use skel_compute::scheduler::{instruction_fn, IdSource, Instruction, SequentialIdSource};
use skel_compute::{Environment, PoolError, Runner, RunnerConfig, Task, TaskError, TaskPool};

const WAIT: Duration = Duration::from_secs(10);

type Program = Vec<Arc<dyn Instruction<i64>>>;

/// Children with payloads 1..=n, each running `child`, then sum them.
fn fan_out(n: i64, child: Program) -> Program {
    let merge = instruction_fn("sum", |_env: &Environment, task: &mut Task<i64>| {
        let values = task.family_mut().get_child_params()?;
        task.set_payload(values.iter().sum());
        Ok(())
    });
    let split = instruction_fn("fan-out", move |_env: &Environment, task: &mut Task<i64>| {
        for i in 1..=n {
            task.add_child(i, child.clone());
        }
        Ok(())
    });
    vec![merge, split]
}

fn square() -> Program {
    vec![instruction_fn("square", |_env: &Environment, task: &mut Task<i64>| {
        let v = *task.payload();
        task.set_payload(v * v);
        Ok(())
    })]
}

fn defect_on(payload: i64) -> Program {
    vec![instruction_fn("defect-on", move |_env: &Environment, task: &mut Task<i64>| {
        if *task.payload() == payload {
            return Err(TaskError::defect("bad input"));
        }
        thread::sleep(Duration::from_millis(5));
        Ok(())
    })]
}

fn new_root(ids: &Arc<SequentialIdSource>, program: Program) -> Task<i64> {
    let ids: Arc<dyn IdSource> = ids.clone();
    let mut task = Task::with_id_source(0, ids);
    for instruction in program {
        task.push_instruction(instruction);
    }
    task
}

/// One-instruction-per-take worker until `stop` is set or the pool panics.
fn spawn_worker(pool: Arc<TaskPool<i64>>, stop: Arc<AtomicBool>, name: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let env = Environment::new(name);
        while !stop.load(Ordering::Relaxed) {
            match pool.take(Some(Duration::from_millis(20))) {
                Ok(Some(task)) => match task.compute(&env) {
                    Ok(task) => pool.complete(task),
                    Err(e) => pool.raise_panic(e),
                },
                Ok(None) => continue,
                Err(_) => break,
            }
        }
    })
}

#[test]
fn every_submitted_root_reaches_results() {
    let ids = Arc::new(SequentialIdSource::new());
    let pool = Arc::new(TaskPool::new());
    let stop = Arc::new(AtomicBool::new(false));
    let workers: Vec<_> = (0..4)
        .map(|i| spawn_worker(Arc::clone(&pool), Arc::clone(&stop), format!("w{i}")))
        .collect();

    let roots = 50;
    for i in 0..roots {
        let root = new_root(&ids, fan_out(4, square())).with_priority(i % 3);
        assert!(pool.submit(root));
    }

    let mut seen = Vec::new();
    for _ in 0..roots {
        let done = pool.get_result_timeout(WAIT).unwrap().expect("root finished");
        assert!(done.is_root());
        assert!(!done.has_exception());
        assert_eq!(*done.payload(), 1 + 4 + 9 + 16);
        seen.push(done.id().own_id);
    }
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), roots as usize, "each root is delivered exactly once");

    stop.store(true, Ordering::Relaxed);
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(pool.size(), 0);
    assert_eq!(pool.results_len(), 0);
}

#[test]
fn failing_lineage_does_not_disturb_others() {
    let ids = Arc::new(SequentialIdSource::new());
    let pool = Arc::new(TaskPool::new());
    let stop = Arc::new(AtomicBool::new(false));
    let workers: Vec<_> = (0..3)
        .map(|i| spawn_worker(Arc::clone(&pool), Arc::clone(&stop), format!("w{i}")))
        .collect();

    let doomed = new_root(&ids, fan_out(6, defect_on(3)));
    let doomed_id = *doomed.id();
    pool.submit(doomed);
    for _ in 0..5 {
        pool.submit(new_root(&ids, fan_out(3, square())));
    }

    let mut healthy = 0;
    for _ in 0..6 {
        let done = pool.get_result_timeout(WAIT).unwrap().expect("root finished");
        if *done.id() == doomed_id {
            assert_eq!(done.exception(), Some(&TaskError::defect("bad input")));
        } else {
            assert!(!done.has_exception());
            assert_eq!(*done.payload(), 14);
            healthy += 1;
        }
    }
    assert_eq!(healthy, 5);

    // Tainted stragglers are dropped on return, never delivered.
    thread::sleep(Duration::from_millis(50));
    assert!(pool.get_result_timeout(Duration::from_millis(50)).unwrap().is_none());
    assert_eq!(pool.snapshot().tainted, 0);

    stop.store(true, Ordering::Relaxed);
    for w in workers {
        w.join().unwrap();
    }
}

#[test]
fn panic_releases_every_blocked_caller() {
    let pool: Arc<TaskPool<i64>> = Arc::new(TaskPool::new());

    let takers: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.take(None).map(|_| ()))
        })
        .collect();
    let collector = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.get_result().map(|_| ()))
    };

    thread::sleep(Duration::from_millis(50));
    pool.raise_panic(TaskError::panic("operator stop"));

    let expected = Err(PoolError::Panicked(TaskError::panic("operator stop")));
    for t in takers {
        assert_eq!(t.join().unwrap(), expected);
    }
    assert_eq!(collector.join().unwrap(), expected);
    assert!(!pool.submit(Task::new(1)));
}

#[test]
fn runner_drives_nested_families() {
    let runner = Arc::new(Runner::<i64>::new(RunnerConfig {
        worker_threads: 4,
        take_timeout_ms: 10,
        ..RunnerConfig::default()
    }));
    for _ in 0..10 {
        let mut root = runner.new_root(0);
        // Three children, each with two squared grandchildren: 3 * (1 + 4).
        for instruction in fan_out(3, fan_out(2, square())) {
            root.push_instruction(instruction);
        }
        runner.submit(root);
    }

    let handle = {
        let runner = Arc::clone(&runner);
        thread::spawn(move || runner.run())
    };
    let pool = runner.pool();
    for _ in 0..10 {
        let done = pool.get_result_timeout(WAIT).unwrap().expect("root finished");
        assert_eq!(*done.payload(), 15);
        assert_eq!(done.stats().snapshot().subtree_size, 10);
    }
    runner.shutdown();
    handle.join().unwrap().unwrap();
    assert_eq!(runner.metrics().roots_finished, 10);
}
