use recompose_scheduler::{Dispatcher, QueuedDispatcher, Unconfined, WorkStealingScheduler};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Asserts that checkpoints are reached in order.
#[derive(Clone, Default)]
struct Expect {
    next: Arc<AtomicUsize>,
}

impl Expect {
    fn at(&self, step: usize) {
        let actual = self.next.fetch_add(1, Ordering::SeqCst);
        assert_eq!(actual, step, "reached step {step} out of order");
    }
}

#[test]
fn test_dispatch_runs_immediately_when_host_is_unconfined() {
    let scheduler = WorkStealingScheduler::new(Unconfined);
    let expect = Expect::default();

    expect.at(0);
    {
        let expect = expect.clone();
        scheduler.submit(Box::new(move || expect.at(1)));
    }
    expect.at(2);
}

#[test]
fn test_nested_dispatch_enqueues_when_host_is_unconfined() {
    let scheduler = WorkStealingScheduler::new(Unconfined);
    let expect = Expect::default();

    expect.at(0);
    {
        let expect = expect.clone();
        let sch = scheduler.clone();
        scheduler.submit(Box::new(move || {
            expect.at(1);
            let inner = expect.clone();
            sch.submit(Box::new(move || inner.at(3)));
            expect.at(2);
        }));
    }
    expect.at(4);
}

#[test]
fn test_unconfined_flattens_recursive_dispatch() {
    let expect = Expect::default();
    let inner = expect.clone();

    Unconfined.dispatch(Box::new(move || {
        inner.at(0);
        let nested = inner.clone();
        Unconfined.dispatch(Box::new(move || nested.at(2)));
        inner.at(1);
    }));
    expect.at(3);
}

#[test]
fn test_outer_drain_advances_inner_scheduler() {
    let base = Arc::new(QueuedDispatcher::new());
    let outer = WorkStealingScheduler::new(base.clone());
    let inner = WorkStealingScheduler::new(outer.clone());
    let expect = Expect::default();

    expect.at(0);
    {
        let expect = expect.clone();
        outer.submit(Box::new(move || expect.at(2)));
    }
    {
        let expect = expect.clone();
        inner.submit(Box::new(move || expect.at(3)));
    }
    expect.at(1);

    outer.drain_all();
    expect.at(4);
}

#[test]
fn test_inner_drain_does_not_advance_outer_scheduler() {
    let base = Arc::new(QueuedDispatcher::new());
    let outer = WorkStealingScheduler::new(base.clone());
    let inner = WorkStealingScheduler::new(outer.clone());
    let expect = Expect::default();

    expect.at(0);
    {
        let expect = expect.clone();
        outer.submit(Box::new(move || expect.at(4)));
    }
    {
        let expect = expect.clone();
        inner.submit(Box::new(move || expect.at(2)));
    }
    expect.at(1);

    inner.drain_all();
    expect.at(3);

    outer.drain_all();
    expect.at(5);
}

#[test]
fn test_panicking_task_requeues_rest_of_batch() {
    let scheduler = WorkStealingScheduler::new(QueuedDispatcher::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    scheduler.submit(Box::new(|| panic!("boom")));
    {
        let log = log.clone();
        scheduler.submit(Box::new(move || log.lock().unwrap().push("after")));
    }

    let result = catch_unwind(AssertUnwindSafe(|| scheduler.drain_all()));
    assert!(result.is_err());
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(scheduler.pending(), 1);

    assert_eq!(scheduler.drain_all(), 1);
    assert_eq!(*log.lock().unwrap(), vec!["after"]);
}

static DROPPED: AtomicUsize = AtomicUsize::new(0);

struct DropTracker;

impl Drop for DropTracker {
    fn drop(&mut self) {
        DROPPED.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_dropping_scheduler_drops_queued_tasks() {
    let host = Arc::new(QueuedDispatcher::new());
    let ran = Arc::new(AtomicUsize::new(0));

    {
        let scheduler = WorkStealingScheduler::new(host.clone());
        let tracker = DropTracker;
        let ran = ran.clone();
        scheduler.submit(Box::new(move || {
            let _tracker = tracker;
            ran.fetch_add(1, Ordering::SeqCst);
        }));
    }

    assert_eq!(DROPPED.load(Ordering::SeqCst), 1);

    // The bridge is still in the host but has nothing to drain.
    assert_eq!(host.run_until_idle(), 1);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}
