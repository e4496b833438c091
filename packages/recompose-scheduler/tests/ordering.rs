use recompose_scheduler::{QueuedDispatcher, WorkStealingScheduler};
use std::sync::{Arc, Mutex};

fn log() -> Arc<Mutex<Vec<&'static str>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn push(log: &Arc<Mutex<Vec<&'static str>>>, entry: &'static str) -> Box<dyn FnOnce() + Send> {
    let log = log.clone();
    Box::new(move || log.lock().unwrap().push(entry))
}

#[test]
fn test_execution_order() {
    let scheduler = WorkStealingScheduler::new(QueuedDispatcher::new());
    let log = log();

    scheduler.submit(push(&log, "A"));
    scheduler.submit(push(&log, "B"));
    scheduler.submit(push(&log, "C"));

    // Nothing runs until somebody drains.
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(scheduler.pending(), 3);

    assert_eq!(scheduler.drain_all(), 3);
    assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C"]);
    assert!(scheduler.is_idle());
}

#[test]
fn test_many_tasks_run_once_in_index_order() {
    let scheduler = WorkStealingScheduler::new(QueuedDispatcher::new());
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..100 {
        let order = order.clone();
        scheduler.submit(Box::new(move || order.lock().unwrap().push(i)));
    }
    scheduler.drain_all();

    assert_eq!(*order.lock().unwrap(), (0..100).collect::<Vec<_>>());
    // A second drain finds nothing.
    assert_eq!(scheduler.drain_all(), 0);
}

#[test]
fn test_reentrant_submission_runs_in_same_drain() {
    // Tasks submitted by tasks must run before drain_all returns.
    let scheduler = WorkStealingScheduler::new(QueuedDispatcher::new());
    let log = log();

    {
        let log = log.clone();
        let sch = scheduler.clone();
        scheduler.submit(Box::new(move || {
            log.lock().unwrap().push("task1");
            sch.submit(push(&log, "task2"));
        }));
    }
    scheduler.submit(push(&log, "task3"));

    scheduler.drain_all();

    // task2 was submitted after task3, so it runs after it.
    assert_eq!(*log.lock().unwrap(), vec!["task1", "task3", "task2"]);
}

#[test]
fn test_drain_all_is_reentrant() {
    let scheduler = WorkStealingScheduler::new(QueuedDispatcher::new());
    let log = log();

    {
        let log = log.clone();
        let sch = scheduler.clone();
        scheduler.submit(Box::new(move || {
            log.lock().unwrap().push("outer-start");
            sch.submit(push(&log, "inner"));
            sch.drain_all();
            log.lock().unwrap().push("outer-end");
        }));
    }

    scheduler.drain_all();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["outer-start", "inner", "outer-end"]
    );
}

#[test]
fn test_queued_host_runs_tasks_without_drain() {
    let host = Arc::new(QueuedDispatcher::new());
    let scheduler = WorkStealingScheduler::new(host.clone());
    let log = log();

    scheduler.submit(push(&log, "A"));
    scheduler.submit(push(&log, "B"));

    // One bridge for the whole burst.
    assert_eq!(host.pending(), 1);

    host.run_until_idle();
    assert_eq!(*log.lock().unwrap(), vec!["A", "B"]);

    // The bridge released the drain flag, so the next burst schedules a new one.
    scheduler.submit(push(&log, "C"));
    assert_eq!(host.pending(), 1);
    host.run_until_idle();
    assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C"]);
}

#[test]
fn test_nested_submission_runs_in_order_on_queued_host() {
    let host = Arc::new(QueuedDispatcher::new());
    let scheduler = WorkStealingScheduler::new(host.clone());
    let log = log();

    {
        let log = log.clone();
        let sch = scheduler.clone();
        scheduler.submit(Box::new(move || {
            log.lock().unwrap().push("outer");
            sch.submit(push(&log, "first"));
            sch.submit(push(&log, "second"));
        }));
    }

    host.run_until_idle();
    assert_eq!(*log.lock().unwrap(), vec!["outer", "first", "second"]);
}

#[test]
fn test_stolen_work_leaves_bridge_as_noop() {
    let host = Arc::new(QueuedDispatcher::new());
    let scheduler = WorkStealingScheduler::new(host.clone());
    let log = log();

    scheduler.submit(push(&log, "A"));
    scheduler.drain_all();
    assert_eq!(*log.lock().unwrap(), vec!["A"]);

    // Submitting while the bridge is still sitting in the host doesn't schedule another.
    scheduler.submit(push(&log, "B"));
    assert_eq!(host.pending(), 1);

    // The late bridge picks up B.
    host.run_until_idle();
    assert_eq!(*log.lock().unwrap(), vec!["A", "B"]);
    assert_eq!(host.pending(), 0);
}
