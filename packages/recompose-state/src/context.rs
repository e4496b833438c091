use crate::StateId;
use std::cell::RefCell;
use std::rc::Rc;

type ReadObserver = Rc<dyn Fn(StateId)>;

thread_local! {
    static READ_OBSERVERS: RefCell<Vec<ReadObserver>> = const { RefCell::new(Vec::new()) };
}

/// Report a read of `id` to the innermost read observer on this thread, if any.
pub fn record_read(id: StateId) {
    let observer = READ_OBSERVERS.with(|o| o.borrow().last().cloned());
    if let Some(observer) = observer {
        observer(id);
    }
}

/// Run `f` with `observer` receiving every state read `f` performs on this thread.
///
/// Observers nest; only the innermost one sees a read.
pub fn observe_reads<O, F, R>(observer: O, f: F) -> R
where
    O: Fn(StateId) + 'static,
    F: FnOnce() -> R,
{
    READ_OBSERVERS.with(|o| o.borrow_mut().push(Rc::new(observer)));
    let _pop = PopObserver;
    f()
}

struct PopObserver;

impl Drop for PopObserver {
    fn drop(&mut self) {
        READ_OBSERVERS.with(|o| o.borrow_mut().pop());
    }
}
