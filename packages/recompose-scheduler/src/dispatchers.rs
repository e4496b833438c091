//! Host dispatchers a [`crate::WorkStealingScheduler`] can delegate to.

use crate::lock::Lock;
use crate::{Dispatcher, Task};
use futures::executor::ThreadPool;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

thread_local! {
    static UNCONFINED_RUNNING: Cell<bool> = const { Cell::new(false) };
    static UNCONFINED_QUEUE: RefCell<VecDeque<Task>> = const { RefCell::new(VecDeque::new()) };
}

/// Runs tasks immediately on the dispatching thread.
///
/// A task dispatched while another `Unconfined` task is running on the same thread is
/// not run recursively. It goes to a thread-local event loop and runs as soon as the
/// outermost task returns, which keeps the stack flat when tasks keep dispatching.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfined;

impl Dispatcher for Unconfined {
    fn dispatch(&self, task: Task) {
        if UNCONFINED_RUNNING.with(Cell::get) {
            UNCONFINED_QUEUE.with(|queue| queue.borrow_mut().push_back(task));
            return;
        }

        let _event_loop = EventLoopGuard::enter();
        task();
        while let Some(next) = UNCONFINED_QUEUE.with(|queue| queue.borrow_mut().pop_front()) {
            next();
        }
    }

    fn is_dispatch_needed(&self) -> bool {
        false
    }
}

struct EventLoopGuard;

impl EventLoopGuard {
    fn enter() -> Self {
        UNCONFINED_RUNNING.with(|running| running.set(true));
        EventLoopGuard
    }
}

impl Drop for EventLoopGuard {
    fn drop(&mut self) {
        UNCONFINED_RUNNING.with(|running| running.set(false));
        // Only non-empty if a task panicked. Nothing else would ever run these.
        let stranded = UNCONFINED_QUEUE.with(|queue| std::mem::take(&mut *queue.borrow_mut()));
        if !stranded.is_empty() {
            tracing::warn!(
                dropped = stranded.len(),
                "unconfined event loop unwound with queued tasks"
            );
        }
    }
}

/// A deferred host: tasks wait in FIFO order until the owner pumps them, the way a UI
/// thread's message loop would.
#[derive(Default)]
pub struct QueuedDispatcher {
    queue: Lock<VecDeque<Task>>,
}

impl QueuedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the oldest queued task. Returns false if there was nothing to run.
    pub fn run_next(&self) -> bool {
        match self.queue.with_lock(|queue| queue.pop_front()) {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks, including ones queued while running, until none are left.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    pub fn pending(&self) -> usize {
        self.queue.with_lock(|queue| queue.len())
    }
}

impl Dispatcher for QueuedDispatcher {
    fn dispatch(&self, task: Task) {
        self.queue.with_lock(|queue| queue.push_back(task));
    }
}

impl std::fmt::Debug for QueuedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedDispatcher")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Runs tasks on a `futures` thread pool.
#[derive(Clone)]
pub struct PoolDispatcher {
    pool: ThreadPool,
}

impl PoolDispatcher {
    pub fn new(threads: usize, name_prefix: &str) -> std::io::Result<Self> {
        let pool = ThreadPool::builder()
            .pool_size(threads.max(1))
            .name_prefix(name_prefix)
            .create()?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: ThreadPool) -> Self {
        Self { pool }
    }
}

impl Dispatcher for PoolDispatcher {
    fn dispatch(&self, task: Task) {
        self.pool.spawn_ok(async move { task() });
    }
}

impl std::fmt::Debug for PoolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolDispatcher").finish_non_exhaustive()
    }
}
