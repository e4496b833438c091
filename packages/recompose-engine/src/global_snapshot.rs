use crate::config::FlushMode;
use futures::executor::ThreadPool;
use once_cell::sync::Lazy;
use recompose_scheduler::Lock;
use recompose_state::{
    ObserverHandle, has_pending_changes, register_write_observer, send_apply_notifications,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide bridge from state writes to apply notifications.
///
/// Once started, every state write schedules a flush ([`send_apply_notifications`]),
/// debounced so that a burst of writes collapses into one flush and at most one flush
/// is in flight at a time. Engines call [`GlobalSnapshotManager::ensure_started`]
/// themselves; the first start decides the [`FlushMode`] for the whole process.
pub struct GlobalSnapshotManager;

struct Running {
    mode: FlushMode,
    _registration: ObserverHandle,
}

static MANAGER: Lazy<Lock<Option<Running>>> = Lazy::new(|| Lock::new(None));

impl GlobalSnapshotManager {
    /// Register the write observer unless it already is. Returns the mode actually in
    /// effect, which is the one from the first call.
    pub fn ensure_started(mode: FlushMode) -> FlushMode {
        MANAGER.with_lock(|running| {
            if let Some(running) = running {
                return running.mode;
            }

            let flusher = Arc::new(Flusher::new(mode));
            let mode = flusher.mode();
            let registration = register_write_observer({
                let flusher = Arc::clone(&flusher);
                move |_| flusher.schedule()
            });
            tracing::debug!(?mode, "global snapshot manager started");
            *running = Some(Running {
                mode,
                _registration: registration,
            });
            mode
        })
    }

    pub fn is_started() -> bool {
        MANAGER.with_lock(|running| running.is_some())
    }

    /// Unregister the write observer. A flush already handed to the background thread
    /// still runs. Meant for test harness teardown.
    pub fn stop() {
        let stopped = MANAGER.with_lock(Option::take);
        if stopped.is_some() {
            tracing::debug!("global snapshot manager stopped");
        }
    }
}

struct Flusher {
    scheduled: AtomicBool,
    executor: FlushExecutor,
}

enum FlushExecutor {
    Inline,
    Background(ThreadPool),
}

impl Flusher {
    fn new(mode: FlushMode) -> Self {
        let executor = match mode {
            FlushMode::Inline => FlushExecutor::Inline,
            FlushMode::Background => match ThreadPool::builder()
                .pool_size(1)
                .name_prefix("recompose-snapshot-")
                .create()
            {
                Ok(pool) => FlushExecutor::Background(pool),
                Err(error) => {
                    tracing::warn!(%error, "could not start snapshot flush thread, flushing inline");
                    FlushExecutor::Inline
                }
            },
        };
        Self {
            scheduled: AtomicBool::new(false),
            executor,
        }
    }

    fn mode(&self) -> FlushMode {
        match self.executor {
            FlushExecutor::Inline => FlushMode::Inline,
            FlushExecutor::Background(_) => FlushMode::Background,
        }
    }

    fn schedule(self: &Arc<Self>) {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.executor {
            FlushExecutor::Inline => self.flush(),
            FlushExecutor::Background(pool) => {
                let flusher = Arc::clone(self);
                pool.spawn_ok(async move { flusher.flush() });
            }
        }
    }

    fn flush(&self) {
        loop {
            send_apply_notifications();
            self.scheduled.store(false, Ordering::Release);
            // Writes that landed during the notifications saw the flag set and were not
            // scheduled; pick them up here unless a new flush claimed them already.
            if !has_pending_changes() || self.scheduled.swap(true, Ordering::AcqRel) {
                return;
            }
        }
    }
}
