// Kept in its own test binary: a write observer that flushes affects every write in
// the process, which would break the collapsing assertions in state_test.rs.

use recompose_state::{
    StateId, mutable_state_of, register_apply_observer, register_write_observer,
    send_apply_notifications,
};
use std::sync::{Arc, Mutex};

#[test]
fn test_write_observer_may_flush_reentrantly() {
    let state = mutable_state_of(0);
    let applied = Arc::new(Mutex::new(Vec::new()));
    let _apply = register_apply_observer({
        let applied = applied.clone();
        move |ids: &[StateId]| applied.lock().unwrap().extend_from_slice(ids)
    });
    let _write = register_write_observer(|_| {
        send_apply_notifications();
    });

    state.set(5);
    // Delivered before `set` returned.
    assert_eq!(*applied.lock().unwrap(), vec![state.id()]);

    state.set(6);
    assert_eq!(*applied.lock().unwrap(), vec![state.id(), state.id()]);
}
