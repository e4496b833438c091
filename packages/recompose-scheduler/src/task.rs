use crate::WorkStealingScheduler;
use crate::lock::Lock;
use futures::task::{ArcWake, waker_ref};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A future hosted on a [`WorkStealingScheduler`].
///
/// Waking the task submits a poll to the scheduler, so the future only ever makes
/// progress when the scheduler's host runs it or when someone drains the scheduler.
/// The future is never polled on two threads at once. A wake that lands while a poll is
/// in progress makes the current poller go around once more instead of blocking.
pub struct LaunchedTask {
    future: Lock<Option<BoxFuture>>,
    scheduler: WorkStealingScheduler,
    /// Set by wakes, cleared right before each poll.
    notified: AtomicBool,
    /// A poll task is sitting in the scheduler's queue.
    queued: AtomicBool,
}

/// Start `future` on the calling thread, polling it once before returning, and let the
/// scheduler drive it from then on.
pub fn launch_undispatched<F>(scheduler: &WorkStealingScheduler, future: F) -> Arc<LaunchedTask>
where
    F: Future<Output = ()> + Send + 'static,
{
    let task = Arc::new(LaunchedTask {
        future: Lock::new(Some(Box::pin(future))),
        scheduler: scheduler.clone(),
        notified: AtomicBool::new(true),
        queued: AtomicBool::new(false),
    });
    task.poll_future();
    task
}

impl LaunchedTask {
    pub fn is_complete(&self) -> bool {
        // A poll in progress means the future is still alive.
        self.future
            .try_with_lock(|future| future.is_none())
            .unwrap_or(false)
    }

    /// Drop the future without polling it again. Blocks while a poll is in progress on
    /// another thread; must not be called from inside the future itself.
    pub fn cancel(&self) {
        let future = self.future.with_lock(Option::take);
        drop(future);
    }

    fn poll_future(self: &Arc<Self>) {
        loop {
            let polled = self.future.try_with_lock(|slot| {
                while self.notified.swap(false, Ordering::AcqRel) {
                    let Some(future) = slot.as_mut() else {
                        return;
                    };
                    let waker = waker_ref(self);
                    let mut cx = Context::from_waker(&waker);
                    if let Poll::Ready(()) = future.as_mut().poll(&mut cx) {
                        *slot = None;
                        return;
                    }
                }
            });

            // Somebody else is polling; they will see our notification.
            if polled.is_none() {
                return;
            }
            // A wake may have slipped in between our last check and releasing the lock,
            // and the poll it submitted may already have given up on the lock.
            if !self.notified.load(Ordering::Acquire) {
                return;
            }
        }
    }
}

impl ArcWake for LaunchedTask {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.notified.store(true, Ordering::Release);
        if arc_self.queued.swap(true, Ordering::AcqRel) {
            return;
        }
        let task = Arc::clone(arc_self);
        arc_self.scheduler.submit(Box::new(move || {
            task.queued.store(false, Ordering::Release);
            task.poll_future();
        }));
    }
}

impl std::fmt::Debug for LaunchedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedTask")
            .field("notified", &self.notified.load(Ordering::Relaxed))
            .field("queued", &self.queued.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
