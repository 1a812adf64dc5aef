// Resettable shared-pointer cell
//
// The parent/child transport pair is intentionally a reference cycle: each
// endpoint holds the other through one of these cells. The disconnection
// protocol breaks the cycle by resetting both cells. A reader that obtained a
// strong reference from the cell keeps it on its own stack, so a concurrent
// reset never invalidates a call already in flight.
//
// Read path takes a read lock, reset takes a write lock; neither is ever held
// across a suspension point.

use parking_lot::RwLock;
use std::sync::Arc;

/// A thread-safe, resettable `Arc` holder
pub struct PtrCell<T: ?Sized> {
    inner: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> PtrCell<T> {
    /// Create an empty cell
    pub fn empty() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Create a cell holding the given pointer
    pub fn new(value: Arc<T>) -> Self {
        Self {
            inner: RwLock::new(Some(value)),
        }
    }

    /// Obtain a stack-local strong reference, if the cell is populated
    ///
    /// The returned `Arc` stays valid regardless of later `reset` calls.
    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.read().clone()
    }

    /// Store a pointer, returning the previous occupant
    pub fn set(&self, value: Arc<T>) -> Option<Arc<T>> {
        self.inner.write().replace(value)
    }

    /// Clear the cell, returning the previous occupant
    pub fn reset(&self) -> Option<Arc<T>> {
        self.inner.write().take()
    }

    /// Whether the cell currently holds a pointer
    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }
}

impl<T: ?Sized> Default for PtrCell<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> std::fmt::Debug for PtrCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtrCell").field("set", &self.is_set()).finish()
    }
}
