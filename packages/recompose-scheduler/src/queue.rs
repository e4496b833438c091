use crate::Task;
use smallvec::SmallVec;

/// Pending tasks for one scheduler. Most bursts are a handful of tasks that get drained
/// almost immediately, so a small inline buffer avoids allocating in the common case.
pub type TaskQueue = SmallVec<[Task; 3]>;

/// Takes the queued work out of `slot`, if there is any.
///
/// `recycle` is a previously drained buffer. It is cleared and parked in `slot` when the
/// next submission would otherwise need a fresh one. A buffer is never recycled into the
/// slot it was just taken from, and a task is never dropped or duplicated here: anything
/// already in `slot` is either returned or left in place.
///
/// Must only be called while the owning scheduler's lock is held.
pub(crate) fn consume_queue_locked(
    slot: &mut Option<TaskQueue>,
    recycle: Option<TaskQueue>,
) -> Option<TaskQueue> {
    match slot.take() {
        None => {
            // The next submission would allocate, hand it the old buffer instead.
            *slot = recycle.map(cleared);
            None
        }
        Some(queue) if queue.is_empty() => {
            // Already have an empty buffer; let the recycled one go.
            *slot = Some(queue);
            None
        }
        Some(queue) => {
            *slot = recycle.map(cleared);
            Some(queue)
        }
    }
}

fn cleared(mut queue: TaskQueue) -> TaskQueue {
    queue.clear();
    queue
}
