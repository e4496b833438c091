use crate::StateId;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;
use std::sync::Arc;

new_key_type! {
    struct ObserverKey;
}

type WriteObserver = Arc<dyn Fn(StateId) + Send + Sync>;
type ApplyObserver = Arc<dyn Fn(&[StateId]) + Send + Sync>;

#[derive(Default)]
struct SnapshotRegistry {
    /// States written since the last apply.
    pending: FxHashSet<StateId>,
    write_observers: SlotMap<ObserverKey, WriteObserver>,
    apply_observers: SlotMap<ObserverKey, ApplyObserver>,
}

static REGISTRY: Lazy<Mutex<SnapshotRegistry>> = Lazy::new(Default::default);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObserverKind {
    Write,
    Apply,
}

/// Registration returned by [`register_write_observer`] and [`register_apply_observer`].
/// The observer is removed when the handle is disposed or dropped.
#[must_use = "dropping the handle unregisters the observer"]
#[derive(Debug)]
pub struct ObserverHandle {
    kind: ObserverKind,
    key: Option<ObserverKey>,
}

impl ObserverHandle {
    pub fn dispose(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut registry = REGISTRY.lock();
        match self.kind {
            ObserverKind::Write => {
                registry.write_observers.remove(key);
            }
            ObserverKind::Apply => {
                registry.apply_observers.remove(key);
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.key.is_none()
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Register `observer` to be called synchronously, on the writing thread, for every
/// write to any state.
pub fn register_write_observer<F>(observer: F) -> ObserverHandle
where
    F: Fn(StateId) + Send + Sync + 'static,
{
    let key = REGISTRY.lock().write_observers.insert(Arc::new(observer));
    ObserverHandle {
        kind: ObserverKind::Write,
        key: Some(key),
    }
}

/// Register `observer` to receive the set of states changed since the previous
/// [`send_apply_notifications`] call.
pub fn register_apply_observer<F>(observer: F) -> ObserverHandle
where
    F: Fn(&[StateId]) + Send + Sync + 'static,
{
    let key = REGISTRY.lock().apply_observers.insert(Arc::new(observer));
    ObserverHandle {
        kind: ObserverKind::Apply,
        key: Some(key),
    }
}

/// Record a write to `id` and notify the write observers.
///
/// Observers run after the registry lock is released, so they may write state or flush
/// notifications themselves.
pub fn record_write(id: StateId) {
    let observers: SmallVec<[WriteObserver; 4]> = {
        let mut registry = REGISTRY.lock();
        registry.pending.insert(id);
        registry.write_observers.values().cloned().collect()
    };
    for observer in observers {
        observer(id);
    }
}

/// Deliver every pending write to the apply observers now. Returns how many distinct
/// states were delivered; 0 means nothing was pending.
pub fn send_apply_notifications() -> usize {
    let (changed, observers) = {
        let mut registry = REGISTRY.lock();
        if registry.pending.is_empty() {
            return 0;
        }
        let mut changed: Vec<StateId> = registry.pending.drain().collect();
        changed.sort_unstable();
        let observers: SmallVec<[ApplyObserver; 4]> =
            registry.apply_observers.values().cloned().collect();
        (changed, observers)
    };

    tracing::trace!(
        changed = changed.len(),
        observers = observers.len(),
        "sending apply notifications"
    );
    for observer in observers {
        observer(&changed);
    }
    changed.len()
}

pub fn has_pending_changes() -> bool {
    !REGISTRY.lock().pending.is_empty()
}
