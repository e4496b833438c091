use crate::lock::Lock;
use crate::queue::{TaskQueue, consume_queue_locked};
use crate::{Dispatcher, Task};
use std::sync::{Arc, Weak};

/// A scheduler that delegates delivery to a host [`Dispatcher`] but lets its owner
/// "steal" every queued task and run it synchronously with [`drain_all`].
///
/// ```ignore
/// let scheduler = WorkStealingScheduler::new(QueuedDispatcher::new());
/// scheduler.submit(Box::new(|| do_work()));
/// // The host has not run anything yet, but we need the result now.
/// scheduler.drain_all();
/// ```
///
/// The host can be inline ([`crate::Unconfined`]), deferred ([`crate::QueuedDispatcher`])
/// or run tasks on other threads ([`crate::PoolDispatcher`]). Its behaviour is preserved
/// transparently: a task that nobody steals runs whenever the host would have run it.
///
/// Dropping the last handle to a scheduler drops any tasks still queued on it without
/// running them.
///
/// [`drain_all`]: WorkStealingScheduler::drain_all
#[derive(Clone)]
pub struct WorkStealingScheduler {
    shared: Arc<Shared>,
}

struct Shared {
    host: Arc<dyn Dispatcher>,
    state: Lock<DispatchState>,
}

// Everything in here must only be touched with `Shared::state` held.
#[derive(Default)]
struct DispatchState {
    /// Unconsumed tasks. Only one buffer exists while there is no contention; a drained
    /// buffer is put back here for the next burst.
    queue: Option<TaskQueue>,
    /// The bridge has been handed to the host and hasn't finished its drain yet.
    bridge_scheduled: bool,
    /// `drain_all` calls currently running. Each one re-checks the queue under the lock
    /// before it returns, so while any is active a submission is already covered.
    stealers: usize,
    /// Created on the first submission that needs it and reused afterwards.
    bridge: Option<Arc<DispatchBridge>>,
}

impl WorkStealingScheduler {
    pub fn new<D: Dispatcher + 'static>(host: D) -> Self {
        Self::with_host(Arc::new(host))
    }

    pub fn with_host(host: Arc<dyn Dispatcher>) -> Self {
        Self {
            shared: Arc::new(Shared {
                host,
                state: Lock::new(DispatchState::default()),
            }),
        }
    }

    /// Queue `task`. If nobody is responsible for draining the queue yet, the bridge is
    /// handed to the host, which will run it (and therefore `task`) by its own rules.
    pub fn submit(&self, task: Task) {
        let bridge = self.shared.state.with_lock(|state| {
            state.queue.get_or_insert_with(TaskQueue::new).push(task);

            if state.bridge_scheduled || state.stealers > 0 {
                return None;
            }
            state.bridge_scheduled = true;
            let bridge = state.bridge.get_or_insert_with(|| {
                Arc::new(DispatchBridge {
                    scheduler: Arc::downgrade(&self.shared),
                })
            });
            Some(Arc::clone(bridge))
        });

        // Outside the lock: an inline host runs the bridge right here, and the tasks it
        // runs may submit again.
        if let Some(bridge) = bridge {
            tracing::trace!("scheduling drain on host dispatcher");
            bridge.trigger(&*self.shared.host);
        }
    }

    /// Run queued tasks on the calling thread until the queue is observed empty.
    ///
    /// Tasks submitted by the tasks being run are picked up by the same call. Safe to
    /// call re-entrantly from inside a task, and concurrently with other `drain_all`
    /// calls or with the host running the bridge; one caller may then return before
    /// another has finished its batch.
    ///
    /// A panicking task propagates out of this call. The rest of its batch is put back
    /// at the front of the queue and runs on the next drain or submission.
    ///
    /// Returns the number of tasks this call ran.
    pub fn drain_all(&self) -> usize {
        let ran = self.shared.advance_until_idle(Drainer::Steal);
        if ran > 0 {
            tracing::trace!(ran, "drained scheduler");
        }
        ran
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.shared
            .state
            .with_lock(|state| state.queue.as_ref().map_or(0, |queue| queue.len()))
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }
}

impl Dispatcher for WorkStealingScheduler {
    fn dispatch(&self, task: Task) {
        self.submit(task);
    }

    /// Always true: work that bypasses the queue would be invisible to `drain_all`.
    fn is_dispatch_needed(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for WorkStealingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkStealingScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Who is draining, which decides what gets released when the drain is done.
enum Drainer {
    /// An explicit `drain_all` call. Counted in `stealers` while it runs; a bridge
    /// already handed to the host stays scheduled.
    Steal,
    /// The bridge, delivered by the host. When it finds nothing left, the next
    /// submission has to schedule a fresh one.
    Bridge,
}

impl Drainer {
    fn on_start_locked(&self, state: &mut DispatchState) {
        if let Drainer::Steal = self {
            state.stealers += 1;
        }
    }

    fn on_finished_locked(&self, state: &mut DispatchState) {
        match self {
            Drainer::Steal => state.stealers -= 1,
            Drainer::Bridge => state.bridge_scheduled = false,
        }
    }
}

impl Shared {
    fn advance_until_idle(&self, drainer: Drainer) -> usize {
        let mut ran = 0;
        let mut first = true;
        let mut recycle: Option<TaskQueue> = None;

        loop {
            let batch = self.state.with_lock(|state| {
                if first {
                    drainer.on_start_locked(state);
                }
                let batch = consume_queue_locked(&mut state.queue, recycle.take());
                if batch.is_none() {
                    drainer.on_finished_locked(state);
                }
                batch
            });
            first = false;

            let Some(mut batch) = batch else {
                return ran;
            };
            // Run outside the lock so tasks can submit without deadlocking.
            ran += self.run_batch(&mut batch, &drainer);
            recycle = Some(batch);
        }
    }

    fn run_batch(&self, batch: &mut TaskQueue, drainer: &Drainer) -> usize {
        let mut guard = BatchGuard {
            shared: self,
            drainer,
            remaining: batch.drain(..),
        };
        let mut ran = 0;
        while let Some(task) = guard.remaining.next() {
            task();
            ran += 1;
        }
        ran
    }
}

/// Puts the unrun tail of a batch back when a task panics, and releases whatever the
/// drainer holds so the next submission schedules a bridge for it.
struct BatchGuard<'a> {
    shared: &'a Shared,
    drainer: &'a Drainer,
    remaining: smallvec::Drain<'a, [Task; 3]>,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let leftover: TaskQueue = self.remaining.by_ref().collect();
        tracing::debug!(
            requeued = leftover.len(),
            "task panicked during drain, requeueing the rest of its batch"
        );
        self.shared.state.with_lock(|state| {
            state
                .queue
                .get_or_insert_with(TaskQueue::new)
                .insert_many(0, leftover);
            self.drainer.on_finished_locked(state);
        });
    }
}

/// The trampoline into the host dispatcher.
///
/// Handing it to the host asks "run me according to your own rules": inline for an
/// inline host, later for a deferred one. Once it actually runs it performs one
/// drain-and-release cycle. There is one per scheduler and the scheduler never has it
/// in flight twice, since `bridge_scheduled` stays set until the bridge's drain finishes.
struct DispatchBridge {
    scheduler: Weak<Shared>,
}

impl DispatchBridge {
    fn trigger(self: &Arc<Self>, host: &dyn Dispatcher) {
        let bridge = Arc::clone(self);
        host.dispatch(Box::new(move || bridge.resume()));
    }

    fn resume(&self) {
        match self.scheduler.upgrade() {
            Some(shared) => {
                shared.advance_until_idle(Drainer::Bridge);
            }
            None => tracing::trace!("bridge delivered after its scheduler was dropped"),
        }
    }
}
