// Control block internals
//
// One heap allocation per object: the three counts, the destroyed flag, an
// optional destruction hook, and the value itself. Count transitions follow
// the same acquire/release discipline as the standard library's Arc: relaxed
// increments, release decrements, and an acquire fence before any
// destruction or deallocation decided by a decrement.
//
// Lifetime rules:
// - the value is dropped by the thread that takes `shared` to zero; that
//   thread also sets `destroyed` (exactly once) and runs the hook;
// - the group of shared handles collectively owns one weak unit, released
//   after the value is destroyed;
// - every weak and optimistic handle owns one weak unit of its own, so the
//   block is deallocated when `weak` reaches zero, which can only happen
//   once shared, weak and optimistic holders are all gone.

use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicBool, AtomicU32, Ordering};

/// Destruction hook run after the value has been dropped
pub(crate) type DestroyHook = Box<dyn FnOnce() + Send>;

pub(crate) struct ControlBlock<T> {
    pub(crate) shared: AtomicU32,
    pub(crate) weak: AtomicU32,
    pub(crate) optimistic: AtomicU32,
    destroyed: AtomicBool,
    on_destroyed: Mutex<Option<DestroyHook>>,
    value: UnsafeCell<ManuallyDrop<T>>,
}

unsafe impl<T: Send + Sync> Send for ControlBlock<T> {}
unsafe impl<T: Send + Sync> Sync for ControlBlock<T> {}

impl<T> ControlBlock<T> {
    /// Allocate a block with shared = 1, weak = 1, optimistic = 0
    pub(crate) fn allocate(value: T) -> NonNull<ControlBlock<T>> {
        let block = Box::new(ControlBlock {
            shared: AtomicU32::new(1),
            weak: AtomicU32::new(1),
            optimistic: AtomicU32::new(0),
            destroyed: AtomicBool::new(false),
            on_destroyed: Mutex::new(None),
            value: UnsafeCell::new(ManuallyDrop::new(value)),
        });
        // Box never hands out null.
        unsafe { NonNull::new_unchecked(Box::into_raw(block)) }
    }

    /// Whether the value has already been dropped
    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Install the hook run after the value is destroyed
    ///
    /// At most one hook is held; a later call replaces an earlier one. If the
    /// value is already destroyed the hook is dropped without running.
    pub(crate) fn set_destroy_hook(&self, hook: DestroyHook) {
        if self.is_destroyed() {
            return;
        }
        *self.on_destroyed.lock() = Some(hook);
    }

    /// Access the value; callers must hold a shared unit
    pub(crate) unsafe fn value(&self) -> &T {
        &*self.value.get()
    }

    /// Try to add one shared unit; fails once shared has reached zero
    pub(crate) fn try_retain_shared(&self) -> Option<u32> {
        let mut n = self.shared.load(Ordering::Relaxed);
        loop {
            if n == 0 {
                return None;
            }
            match self.shared.compare_exchange_weak(
                n,
                n + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(n + 1),
                Err(observed) => n = observed,
            }
        }
    }

    /// Drop one shared unit, destroying the value on the last one
    ///
    /// Safety: the caller must own a shared unit.
    pub(crate) unsafe fn release_shared(block: NonNull<ControlBlock<T>>) {
        let this = block.as_ref();
        if this.shared.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            this.destroyed.store(true, Ordering::Release);
            let hook = this.on_destroyed.lock().take();
            ManuallyDrop::drop(&mut *this.value.get());
            if let Some(hook) = hook {
                hook();
            }
            // The shared group's collective weak unit.
            Self::release_weak(block);
        }
    }

    /// Add one weak unit
    pub(crate) fn retain_weak(&self) {
        self.weak.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop one weak unit, deallocating the block on the last one
    ///
    /// Safety: the caller must own a weak unit.
    pub(crate) unsafe fn release_weak(block: NonNull<ControlBlock<T>>) {
        if block.as_ref().weak.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            drop(Box::from_raw(block.as_ptr()));
        }
    }

    /// Add one optimistic unit (plus the weak unit that backs it)
    pub(crate) fn retain_optimistic(&self) -> u32 {
        self.retain_weak();
        self.optimistic.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Drop one optimistic unit (and its backing weak unit)
    ///
    /// Safety: the caller must own an optimistic unit.
    pub(crate) unsafe fn release_optimistic(block: NonNull<ControlBlock<T>>) -> u32 {
        let remaining = block.as_ref().optimistic.fetch_sub(1, Ordering::Release) - 1;
        Self::release_weak(block);
        remaining
    }

    /// Snapshot of (shared, weak, optimistic), for accounting checks
    pub(crate) fn counts(&self) -> (u32, u32, u32) {
        (
            self.shared.load(Ordering::SeqCst),
            self.weak.load(Ordering::SeqCst),
            self.optimistic.load(Ordering::SeqCst),
        )
    }
}
