use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::frame::{FrameClock, FrameRequest};
use crate::global_snapshot::GlobalSnapshotManager;
use futures::task::AtomicWaker;
use recompose_scheduler::{Dispatcher, LaunchedTask, Lock, WorkStealingScheduler, launch_undispatched};
use recompose_state::{
    MutableState, ObserverHandle, StateId, observe_reads, register_apply_observer,
    send_apply_notifications,
};
use rustc_hash::FxHashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Poll;

/// Content evaluated by a [`SyncEngine`].
///
/// Two `Content`s are equal only if they are clones of the same closure, so handing the
/// engine the same content again is not a change and does not force a recompute.
pub struct Content<R> {
    f: Arc<dyn Fn() -> R + Send + Sync>,
}

impl<R> Content<R> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    pub fn evaluate(&self) -> R {
        (self.f)()
    }
}

impl<R> Clone for Content<R> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

impl<R> PartialEq for Content<R> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.f), Arc::as_ptr(&other.f))
    }
}

impl<R> std::fmt::Debug for Content<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Content")
            .field("ptr", &Arc::as_ptr(&self.f).cast::<()>())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Running,
    Closed,
}

enum Lifecycle {
    NotStarted,
    Starting,
    Running(Arc<LaunchedTask>),
    Closed,
}

/// Hosts a long-lived recompute loop and lets a driver pull results out of it
/// synchronously.
///
/// The loop waits until state read by the current content changes, then asks the
/// engine's [`FrameClock`] for a frame and suspends. [`SyncEngine::recompute_with`]
/// resolves that frame on the calling thread, which evaluates the content, and returns
/// the result. The loop runs on a [`WorkStealingScheduler`] wrapping the host, so the
/// driver can force it forward without waiting for the host to get around to it.
///
/// ```ignore
/// let counter = mutable_state_of(1);
/// let engine = SyncEngine::launch(QueuedDispatcher::new(), || schedule_render());
/// let content = Content::new({
///     let counter = counter.clone();
///     move || counter.get() * 10
/// });
/// assert_eq!(engine.recompute_with(&content)?, 10);
/// counter.set(2);
/// assert!(engine.needs_recompute());
/// assert_eq!(engine.recompute_with(&content)?, 20);
/// ```
pub struct SyncEngine<R> {
    config: EngineConfig,
    scheduler: WorkStealingScheduler,
    clock: FrameClock,
    composition: Arc<Composition<R>>,
    /// Set while the driver forces the loop forward, so the frame request that produces
    /// doesn't also report "needs recompute".
    recomposing: Arc<AtomicBool>,
    lifecycle: Lock<Lifecycle>,
    apply_observer: Lock<Option<ObserverHandle>>,
}

impl<R: Clone + Send + 'static> SyncEngine<R> {
    /// Launch with [`EngineConfig::default`].
    ///
    /// `on_needs_recompute` is called when state read by the content changes and the
    /// loop has a frame waiting. It should arrange for `recompute_with` to be called
    /// eventually; it is not called again until that happens.
    ///
    /// It runs on whatever thread resumed the loop, which for an inline host can be the
    /// thread inside `recompute_with`. In particular, when the content panics on an
    /// inline host, the loop asks for its retry frame before `recompute_with` has
    /// returned the error, so the callback fires during that call.
    pub fn launch<D, F>(host: D, on_needs_recompute: F) -> Self
    where
        D: Dispatcher + 'static,
        F: Fn() + Send + Sync + 'static,
    {
        Self::launch_with(EngineConfig::default(), host, on_needs_recompute)
    }

    pub fn launch_with<D, F>(config: EngineConfig, host: D, on_needs_recompute: F) -> Self
    where
        D: Dispatcher + 'static,
        F: Fn() + Send + Sync + 'static,
    {
        GlobalSnapshotManager::ensure_started(config.flush_mode);

        let recomposing = Arc::new(AtomicBool::new(false));
        let clock = FrameClock::new({
            let recomposing = Arc::clone(&recomposing);
            move || {
                if !recomposing.load(Ordering::Acquire) {
                    on_needs_recompute();
                }
            }
        });

        let composition = Arc::new(Composition::new());
        let apply_observer = register_apply_observer({
            let composition = Arc::downgrade(&composition);
            move |changed: &[StateId]| {
                if let Some(composition) = composition.upgrade() {
                    composition.on_applied(changed);
                }
            }
        });

        tracing::debug!(flush_mode = ?config.flush_mode, "sync engine created");
        Self {
            config,
            scheduler: WorkStealingScheduler::new(host),
            clock,
            composition,
            recomposing,
            lifecycle: Lock::new(Lifecycle::NotStarted),
            apply_observer: Lock::new(Some(apply_observer)),
        }
    }

    /// Recompose with `content` if anything it depends on changed (or it is new), and
    /// return the latest result.
    ///
    /// The first call always evaluates `content` before returning. A panic inside the
    /// content is returned as [`EngineError::Content`] and leaves the engine needing a
    /// recompute.
    pub fn recompute_with(&self, content: &Content<R>) -> Result<R, EngineError> {
        if self.state() == EngineState::Closed {
            return Err(EngineError::Closed);
        }

        self.composition.content.set(Some(content.clone()));
        // Make the write visible to the loop now rather than whenever the global
        // observer gets around to it.
        send_apply_notifications();

        self.ensure_launched();

        if let Some(request) = self.try_take_frame_request() {
            if let Err(error) = request.execute(self.config.frame_time_nanos) {
                // The last result may be stale or missing; don't let it hide the error.
                self.composition.mark_invalid();
                return Err(error.into());
            }
            // Let the loop settle after its frame.
            self.scheduler.drain_all();
        }

        match self.composition.last_result() {
            Some(result) => Ok(result),
            None => panic!("expected initial composition to synchronously request its first frame"),
        }
    }

    /// Whether state read by the last content changed since it was last evaluated.
    ///
    /// If the loop has been told about a change but hasn't asked for a frame yet, it is
    /// advanced (best-effort) so it can.
    pub fn needs_recompute(&self) -> bool {
        if self.state() != EngineState::Running {
            return false;
        }
        if !self.clock.has_request() && self.composition.has_pending_work() {
            self.scheduler.drain_all();
        }
        self.clock.has_request()
    }

    fn ensure_launched(&self) {
        let launch = self.lifecycle.with_lock(|lifecycle| match lifecycle {
            Lifecycle::NotStarted => {
                *lifecycle = Lifecycle::Starting;
                true
            }
            Lifecycle::Starting => {
                panic!("recompute_with called re-entrantly while the engine was starting")
            }
            Lifecycle::Running(_) | Lifecycle::Closed => false,
        });
        if !launch {
            return;
        }

        // Started on this thread so the first frame request exists before we return.
        let task = {
            let _recomposing = Recomposing::enter(&self.recomposing);
            launch_undispatched(
                &self.scheduler,
                recompose_loop(Arc::clone(&self.composition), self.clock.clone()),
            )
        };
        tracing::debug!("recompute loop launched");

        self.lifecycle.with_lock(|lifecycle| {
            if let Lifecycle::Starting = lifecycle {
                *lifecycle = Lifecycle::Running(task);
            }
        });
    }

    fn try_take_frame_request(&self) -> Option<FrameRequest> {
        // Fast path: the loop already asked.
        if let Some(request) = self.clock.take_request() {
            return Some(request);
        }
        // Nothing changed, so advancing wouldn't produce a request either.
        if !self.composition.has_pending_work() {
            return None;
        }
        // Slow path: the loop knows about a change but the host hasn't resumed it yet.
        {
            let _recomposing = Recomposing::enter(&self.recomposing);
            self.scheduler.drain_all();
        }
        self.clock.take_request()
    }
}

impl<R> SyncEngine<R> {
    /// Stop the loop and stop observing state. Idempotent; also done on drop.
    ///
    /// Work still queued on the engine's scheduler runs before this returns. Afterwards
    /// `recompute_with` fails with [`EngineError::Closed`] and `needs_recompute` is false.
    pub fn close(&self) {
        let lifecycle = self
            .lifecycle
            .with_lock(|lifecycle| std::mem::replace(lifecycle, Lifecycle::Closed));
        if let Lifecycle::Closed = lifecycle {
            return;
        }

        drop(self.apply_observer.with_lock(Option::take));
        self.composition.close();
        // Nobody will resolve an outstanding frame now; dropping it resumes the loop.
        drop(self.clock.take_request());
        self.scheduler.drain_all();

        if let Lifecycle::Running(task) = lifecycle {
            // A host running on other threads may not have let the loop finish yet.
            if !task.is_complete() {
                task.cancel();
            }
        }
        tracing::debug!("sync engine closed");
    }

    pub fn state(&self) -> EngineState {
        self.lifecycle.with_lock(|lifecycle| match lifecycle {
            Lifecycle::NotStarted => EngineState::NotStarted,
            Lifecycle::Starting | Lifecycle::Running(_) => EngineState::Running,
            Lifecycle::Closed => EngineState::Closed,
        })
    }
}

impl<R> Drop for SyncEngine<R> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<R> std::fmt::Debug for SyncEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

struct Recomposing<'a>(&'a AtomicBool);

impl<'a> Recomposing<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Recomposing(flag)
    }
}

impl Drop for Recomposing<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The state the recompute loop works on.
struct Composition<R> {
    /// Written by the driver, read by every composition.
    content: MutableState<Option<Content<R>>>,
    last_result: Lock<Option<R>>,
    /// States read by the most recent composition.
    reads: Lock<FxHashSet<StateId>>,
    /// Something the composition read changed since it last ran.
    invalidated: AtomicBool,
    closed: AtomicBool,
    /// Wakes the loop when `invalidated` or `closed` is set.
    work: AtomicWaker,
}

impl<R: Send + 'static> Composition<R> {
    fn new() -> Self {
        Self {
            content: MutableState::new(None),
            last_result: Lock::new(None),
            reads: Lock::new(FxHashSet::default()),
            // The first composition needs no trigger.
            invalidated: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            work: AtomicWaker::new(),
        }
    }

    fn on_applied(&self, changed: &[StateId]) {
        let affected = self
            .reads
            .with_lock(|reads| changed.iter().any(|id| reads.contains(id)));
        if affected {
            tracing::trace!("composition invalidated");
            self.invalidated.store(true, Ordering::Release);
            self.work.wake();
        }
    }

    fn mark_invalid(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    fn has_pending_work(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.invalidated.load(Ordering::Acquire)
    }

    fn last_result(&self) -> Option<R>
    where
        R: Clone,
    {
        self.last_result.with_lock(|result| result.clone())
    }

    /// Resolves to true once there is something to recompose, false once closed.
    fn work_available(&self) -> impl Future<Output = bool> + '_ {
        futures::future::poll_fn(move |cx| {
            if self.closed.load(Ordering::Acquire) {
                return Poll::Ready(false);
            }
            if self.invalidated.load(Ordering::Acquire) {
                return Poll::Ready(true);
            }
            self.work.register(cx.waker());
            // Re-check after registering so a wake in between isn't lost.
            if self.closed.load(Ordering::Acquire) {
                Poll::Ready(false)
            } else if self.invalidated.load(Ordering::Acquire) {
                Poll::Ready(true)
            } else {
                Poll::Pending
            }
        })
    }

    /// Evaluate the current content, recording what it reads.
    fn compose(self: &Arc<Self>) {
        // Cleared first: a change to something read below must invalidate again.
        self.invalidated.store(false, Ordering::Release);
        self.reads.with_lock(|reads| reads.clear());

        let recorder = Arc::downgrade(self);
        let result = observe_reads(
            move |id| {
                if let Some(composition) = recorder.upgrade() {
                    composition.reads.with_lock(|reads| {
                        reads.insert(id);
                    });
                }
            },
            || self.content.get().map(|content| content.evaluate()),
        );

        if let Some(result) = result {
            self.last_result.with_lock(|last| *last = Some(result));
        }
        tracing::trace!(
            reads = self.reads.with_lock(|reads| reads.len()),
            "composition evaluated"
        );
    }

    fn dispose(&self) {
        self.reads.with_lock(|reads| reads.clear());
    }
}

impl<R> Composition<R> {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.work.wake();
    }
}

async fn recompose_loop<R: Send + 'static>(composition: Arc<Composition<R>>, clock: FrameClock) {
    while composition.work_available().await {
        let frame = {
            let composition = Arc::clone(&composition);
            move |_frame_time| composition.compose()
        };
        if let Err(error) = clock.with_frame(frame).await {
            tracing::debug!(%error, "frame failed, composition stays invalid");
            composition.mark_invalid();
        }
    }
    composition.dispose();
    tracing::debug!("recompute loop finished");
}
