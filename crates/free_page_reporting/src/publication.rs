use core::ops::Deref;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use alloc::sync::Arc;
use pointers::BorrowedArc;

/// An `AtomicPtr<T>`-backed slot publishing at most one active
/// configuration, with a reader-count grace period so that `unpublish`
/// followed by `quiesce` gives the caller a point at which no reader can
/// still observe the old value. Modeled on this tree's own
/// `RCUPointer`/`ArcSwap`, narrowed to a single instance instead of a
/// process-wide semaphore, since lifecycle here is per-engine, not global.
pub struct Published<T> {
    ptr: AtomicPtr<T>,
    readers: AtomicUsize,
}

pub struct ReadGuard<'a, T> {
    arc: BorrowedArc<'a, T>,
    readers: &'a AtomicUsize,
}

impl<'a, T> Deref for ReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.arc
    }
}

impl<'a, T> Drop for ReadGuard<'a, T> {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::Release);
    }
}

impl<T> Published<T> {
    pub const fn empty() -> Self {
        Self {
            ptr: AtomicPtr::new(core::ptr::null_mut()),
            readers: AtomicUsize::new(0),
        }
    }

    /// Publishes `value`. Caller must ensure the slot is currently empty
    /// (single-writer discipline enforced by `Lifecycle`'s gate).
    pub fn publish(&self, value: Arc<T>) {
        let raw = Arc::into_raw(value) as *mut T;
        let old = self.ptr.swap(raw, Ordering::Release);
        debug_assert!(old.is_null(), "Published::publish: slot was not empty");
    }

    /// Enters a read section. Returns `None` if nothing is published.
    pub fn enter(&self) -> Option<ReadGuard<'_, T>> {
        self.readers.fetch_add(1, Ordering::Acquire);
        let raw = self.ptr.load(Ordering::Acquire);
        match NonNull::new(raw) {
            Some(ptr) => Some(ReadGuard {
                // SAFETY: the Arc behind `ptr` is kept alive until
                // `unpublish` + `quiesce` observes this reader gone.
                arc: unsafe { BorrowedArc::from_raw(ptr) },
                readers: &self.readers,
            }),
            None => {
                self.readers.fetch_sub(1, Ordering::Release);
                None
            }
        }
    }

    /// Unpublishes the slot, returning the previously-published value.
    /// The caller MUST call [`Self::quiesce`] before dropping the
    /// returned `Arc`'s last strong reference if any reader might still
    /// be mid-[`Self::enter`].
    pub fn unpublish(&self) -> Option<Arc<T>> {
        let old = self.ptr.swap(core::ptr::null_mut(), Ordering::AcqRel);
        if old.is_null() {
            None
        } else {
            // SAFETY: `old` was produced by `Arc::into_raw` in `publish`.
            Some(unsafe { Arc::from_raw(old) })
        }
    }

    /// Busy-waits until no `enter` call is in progress. Must be called
    /// after `unpublish` so new readers can no longer appear.
    pub fn quiesce(&self) {
        while self.readers.load(Ordering::Acquire) != 0 {
            core::hint::spin_loop();
        }
    }
}

unsafe impl<T: Send + Sync> Send for Published<T> {}
unsafe impl<T: Send + Sync> Sync for Published<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_sees_nothing_before_publish() {
        let slot: Published<u32> = Published::empty();
        assert!(slot.enter().is_none());
    }

    #[test]
    fn publish_then_enter_then_unpublish_and_quiesce() {
        let slot = Published::empty();
        slot.publish(Arc::new(42u32));
        {
            let guard = slot.enter().expect("published value");
            assert_eq!(*guard, 42);
        }
        let arc = slot.unpublish().expect("value was published");
        slot.quiesce();
        assert_eq!(*arc, 42);
        assert!(slot.enter().is_none());
    }
}
