pub mod dispatchers;
pub mod lock;
pub mod queue;
pub mod scheduler;
pub mod task;

/// An opaque unit of work. Executed exactly once by whoever ends up owning it.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The host execution context a scheduler delegates delivery timing to.
///
/// Implementations may run the task immediately on the calling thread, queue it for
/// later, or hand it to another thread. Whatever they do, every dispatched task must
/// eventually run exactly once; schedulers built on top of a host rely on that for
/// liveness.
pub trait Dispatcher: Send + Sync {
    /// Schedule `task` according to this host's own rules.
    fn dispatch(&self, task: Task);

    /// Whether callers must go through [`Dispatcher::dispatch`] instead of running work
    /// in place.
    fn is_dispatch_needed(&self) -> bool {
        true
    }
}

impl<D: Dispatcher + ?Sized> Dispatcher for std::sync::Arc<D> {
    fn dispatch(&self, task: Task) {
        (**self).dispatch(task)
    }

    fn is_dispatch_needed(&self) -> bool {
        (**self).is_dispatch_needed()
    }
}

pub use dispatchers::{PoolDispatcher, QueuedDispatcher, Unconfined};
pub use lock::Lock;
pub use scheduler::WorkStealingScheduler;
pub use task::{LaunchedTask, launch_undispatched};
