use crate::context::record_read;
use crate::snapshot::record_write;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of a state cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(u64);

impl StateId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        StateId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// A shared, observable value. Clones refer to the same cell.
pub struct MutableState<T> {
    inner: Arc<StateCell<T>>,
}

struct StateCell<T> {
    id: StateId,
    value: RwLock<T>,
}

impl<T> MutableState<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(StateCell {
                id: StateId::next(),
                value: RwLock::new(value),
            }),
        }
    }

    pub fn id(&self) -> StateId {
        self.inner.id
    }

    /// Read through a reference. `f` must not write this same state.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        record_read(self.inner.id);
        f(&self.inner.value.read())
    }

    /// Mutate in place. Always counts as a write, even if nothing changed.
    pub fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let result = f(&mut self.inner.value.write());
        record_write(self.inner.id);
        result
    }
}

impl<T: Clone> MutableState<T> {
    pub fn get(&self) -> T {
        record_read(self.inner.id);
        self.inner.value.read().clone()
    }

    /// Read without reporting to any read observer.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }
}

impl<T: PartialEq> MutableState<T> {
    /// Store `value`. Storing a value equal to the current one is not a write and
    /// notifies nobody. Returns whether a write happened.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.write();
            if *current == value {
                return false;
            }
            *current = value;
        }
        record_write(self.inner.id);
        true
    }
}

impl<T> Clone for MutableState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for MutableState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableState")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

pub fn mutable_state_of<T>(value: T) -> MutableState<T> {
    MutableState::new(value)
}
