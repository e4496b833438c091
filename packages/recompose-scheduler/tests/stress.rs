use recompose_scheduler::{PoolDispatcher, QueuedDispatcher, WorkStealingScheduler};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_concurrent_submissions_are_not_lost() {
    const THREADS: usize = 32;

    let scheduler = WorkStealingScheduler::new(QueuedDispatcher::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let scheduler = scheduler.clone();
            let seen = seen.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                scheduler.submit(Box::new(move || seen.lock().unwrap().push(i)));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(scheduler.drain_all(), THREADS);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), THREADS);
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(unique.len(), THREADS, "a task ran twice");
}

#[test]
fn test_producers_racing_a_draining_consumer() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 500;

    let host = PoolDispatcher::new(4, "stress-host-").unwrap();
    let scheduler = WorkStealingScheduler::new(host);
    let executed = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let scheduler = scheduler.clone();
            let executed = executed.clone();
            thread::spawn(move || {
                for _ in 0..PER_PRODUCER {
                    let executed = executed.clone();
                    scheduler.submit(Box::new(move || {
                        executed.fetch_add(1, Ordering::SeqCst);
                    }));
                }
            })
        })
        .collect();

    // Steal concurrently with the host's own delivery.
    let consumer = {
        let scheduler = scheduler.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                scheduler.drain_all();
                thread::yield_now();
            }
        })
    };

    for producer in producers {
        producer.join().unwrap();
    }
    consumer.join().unwrap();
    scheduler.drain_all();

    // Batches already taken by pool threads may still be running.
    let deadline = Instant::now() + Duration::from_secs(10);
    while executed.load(Ordering::SeqCst) < PRODUCERS * PER_PRODUCER && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(executed.load(Ordering::SeqCst), PRODUCERS * PER_PRODUCER);
}

#[test]
fn test_host_still_delivers_after_bridge_and_drain_overlap() {
    let host = Arc::new(QueuedDispatcher::new());
    let scheduler = WorkStealingScheduler::new(host.clone());

    let (first_started, wait_first_started) = mpsc::channel();
    let (release_first, first_released) = mpsc::channel::<()>();
    let (second_started, wait_second_started) = mpsc::channel();
    let (release_second, second_released) = mpsc::channel::<()>();

    {
        let sch = scheduler.clone();
        scheduler.submit(Box::new(move || {
            sch.submit(Box::new(move || {
                second_started.send(()).unwrap();
                second_released.recv().unwrap();
            }));
            first_started.send(()).unwrap();
            first_released.recv().unwrap();
        }));
    }

    // The host runs the bridge, which blocks inside the first task.
    let bridge = {
        let host = host.clone();
        thread::spawn(move || host.run_until_idle())
    };
    wait_first_started.recv().unwrap();

    // A stealer takes the second task and blocks inside it.
    let stealer = {
        let scheduler = scheduler.clone();
        thread::spawn(move || scheduler.drain_all())
    };
    wait_second_started.recv().unwrap();

    // The bridge finishes first, then the stealer.
    release_first.send(()).unwrap();
    assert_eq!(bridge.join().unwrap(), 1);
    release_second.send(()).unwrap();
    assert_eq!(stealer.join().unwrap(), 1);

    let ran = Arc::new(AtomicBool::new(false));
    {
        let ran = ran.clone();
        scheduler.submit(Box::new(move || ran.store(true, Ordering::SeqCst)));
    }
    assert_eq!(host.pending(), 1, "submission after the drains should schedule a bridge");
    host.run_until_idle();
    assert!(ran.load(Ordering::SeqCst));
}
