// Strong, weak and optimistic handles
//
// `Strong<T>` keeps the value alive. `WeakRef<T>` can be upgraded while the
// value still exists and fails cleanly afterwards. `Optimistic<T>` never
// keeps the value alive but keeps the control block (and, at the transport
// layer, the routing path) alive; a dangling upgrade is an expected outcome
// for independently-managed objects, not a bug.

use super::control::{ControlBlock, DestroyHook};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

/// Owning handle; contributes one unit to the shared count
pub struct Strong<T> {
    block: NonNull<ControlBlock<T>>,
    _marker: PhantomData<ControlBlock<T>>,
}

/// Non-owning handle; upgradable while the value lives
pub struct WeakRef<T> {
    block: NonNull<ControlBlock<T>>,
    _marker: PhantomData<ControlBlock<T>>,
}

/// Non-owning handle that pins routing state but not the value
pub struct Optimistic<T> {
    block: NonNull<ControlBlock<T>>,
    _marker: PhantomData<ControlBlock<T>>,
}

unsafe impl<T: Send + Sync> Send for Strong<T> {}
unsafe impl<T: Send + Sync> Sync for Strong<T> {}
unsafe impl<T: Send + Sync> Send for WeakRef<T> {}
unsafe impl<T: Send + Sync> Sync for WeakRef<T> {}
unsafe impl<T: Send + Sync> Send for Optimistic<T> {}
unsafe impl<T: Send + Sync> Sync for Optimistic<T> {}

impl<T> Strong<T> {
    /// Allocate a new value with shared = 1, weak = 1, optimistic = 0
    pub fn new(value: T) -> Self {
        Self {
            block: ControlBlock::allocate(value),
            _marker: PhantomData,
        }
    }

    fn block(&self) -> &ControlBlock<T> {
        unsafe { self.block.as_ref() }
    }

    /// Create a weak handle to the same value
    pub fn downgrade(&self) -> WeakRef<T> {
        self.block().retain_weak();
        WeakRef {
            block: self.block,
            _marker: PhantomData,
        }
    }

    /// Create an optimistic handle; only a strong holder may do this
    pub fn make_optimistic(&self) -> Optimistic<T> {
        self.block().retain_optimistic();
        Optimistic {
            block: self.block,
            _marker: PhantomData,
        }
    }

    /// Install a hook run once, after the value has been destroyed
    pub fn set_destroy_hook(&self, hook: impl FnOnce() + Send + 'static) {
        self.block().set_destroy_hook(Box::new(hook) as DestroyHook);
    }

    /// Snapshot of (shared, weak, optimistic) counts
    pub fn counts(&self) -> (u32, u32, u32) {
        self.block().counts()
    }

    /// Stable identity of the underlying allocation
    ///
    /// Used by the service registry to make object registration idempotent:
    /// two handles to the same value report the same identity.
    pub fn identity(&self) -> usize {
        self.block.as_ptr() as usize
    }

    /// Whether two handles refer to the same allocation
    pub fn ptr_eq(&self, other: &Strong<T>) -> bool {
        self.block == other.block
    }
}

impl<T> Clone for Strong<T> {
    fn clone(&self) -> Self {
        // A live Strong guarantees shared > 0, so plain increment suffices.
        let retained = self.block().try_retain_shared();
        debug_assert!(retained.is_some());
        Self {
            block: self.block,
            _marker: PhantomData,
        }
    }
}

impl<T> Deref for Strong<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Holding a shared unit keeps the value alive.
        unsafe { self.block().value() }
    }
}

impl<T> Drop for Strong<T> {
    fn drop(&mut self) {
        unsafe { ControlBlock::release_shared(self.block) }
    }
}

impl<T: fmt::Debug> fmt::Debug for Strong<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Strong").field(&**self).finish()
    }
}

impl<T> WeakRef<T> {
    fn block(&self) -> &ControlBlock<T> {
        unsafe { self.block.as_ref() }
    }

    /// Upgrade to a strong handle; fails once the value has been destroyed
    pub fn upgrade(&self) -> Option<Strong<T>> {
        self.block().try_retain_shared().map(|_| Strong {
            block: self.block,
            _marker: PhantomData,
        })
    }

    /// Whether the value has already been destroyed
    pub fn is_destroyed(&self) -> bool {
        self.block().is_destroyed()
    }

    /// Snapshot of (shared, weak, optimistic) counts
    pub fn counts(&self) -> (u32, u32, u32) {
        self.block().counts()
    }

    /// Stable identity of the underlying allocation
    pub(crate) fn identity(&self) -> usize {
        self.block.as_ptr() as usize
    }

    /// Adopt one shared unit on behalf of a remote holder
    ///
    /// Increments the shared count without materializing a handle; the unit
    /// is owned by the caller's accounting until `release_unit`. Fails once
    /// the value has been destroyed. Returns the new shared count.
    pub(crate) fn adopt_unit(&self) -> Option<u32> {
        self.block().try_retain_shared()
    }

    /// Release one previously adopted shared unit
    ///
    /// Runs the destructor if this was the last unit.
    pub(crate) fn release_unit(&self) {
        unsafe { ControlBlock::release_shared(self.block) }
    }

    /// Adopt one optimistic unit on behalf of a remote holder
    pub(crate) fn adopt_optimistic_unit(&self) -> u32 {
        self.block().retain_optimistic()
    }

    /// Release one previously adopted optimistic unit
    pub(crate) fn release_optimistic_unit(&self) -> u32 {
        unsafe { ControlBlock::release_optimistic(self.block) }
    }
}

impl<T> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        self.block().retain_weak();
        Self {
            block: self.block,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for WeakRef<T> {
    fn drop(&mut self) {
        unsafe { ControlBlock::release_weak(self.block) }
    }
}

impl<T> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl<T> Optimistic<T> {
    fn block(&self) -> &ControlBlock<T> {
        unsafe { self.block.as_ref() }
    }

    /// Try to reach the value; `None` once it has been destroyed
    ///
    /// A failed upgrade is the local equivalent of the `object-gone` outcome
    /// a remote optimistic call observes.
    pub fn upgrade(&self) -> Option<Strong<T>> {
        self.block().try_retain_shared().map(|_| Strong {
            block: self.block,
            _marker: PhantomData,
        })
    }

    /// Whether the value has already been destroyed
    pub fn is_destroyed(&self) -> bool {
        self.block().is_destroyed()
    }

    /// Snapshot of (shared, weak, optimistic) counts
    pub fn counts(&self) -> (u32, u32, u32) {
        self.block().counts()
    }
}

impl<T> Clone for Optimistic<T> {
    fn clone(&self) -> Self {
        self.block().retain_optimistic();
        Self {
            block: self.block,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Optimistic<T> {
    fn drop(&mut self) {
        unsafe {
            ControlBlock::release_optimistic(self.block);
        }
    }
}

impl<T> fmt::Debug for Optimistic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optimistic")
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
