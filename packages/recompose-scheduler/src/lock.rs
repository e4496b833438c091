use parking_lot::Mutex;

/// Minimal non-reentrant guard around a small block of shared state.
///
/// Only metadata is ever mutated under a `Lock`; callers must never run tasks or user
/// code from inside [`Lock::with_lock`], since that code may need the same lock again.
#[derive(Default)]
pub struct Lock<T> {
    inner: Mutex<T>,
}

impl<T> Lock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn with_lock<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Like [`Lock::with_lock`] but returns `None` instead of blocking when the lock is held.
    pub fn try_with_lock<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.inner.try_lock()?;
        Some(f(&mut guard))
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Lock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_lock() {
            Some(value) => f.debug_tuple("Lock").field(&*value).finish(),
            None => f.write_str("Lock(<locked>)"),
        }
    }
}
