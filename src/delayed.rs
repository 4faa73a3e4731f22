//! A reclamation scheme that defers all destruction until its handles are
//! dropped.
//!
//! Retired values accumulate in a handle-local list and are destroyed in one
//! batch when the owning handle goes out of scope. This is the simplest
//! deferred baseline: it is correct only when no handle of the manager has
//! outstanding readers at the point it drops, which is the natural shape for
//! epoch-like callers that quiesce between batches of retirements.

use core::cell::RefCell;
use core::marker::PhantomData;
use core::ptr::NonNull;

use typenum::{Unsigned, U2};

use crate::destructor::{DefaultDestructor, Destructor};
use crate::ord;
use crate::pointer::{AtomicMarkedPtr, MarkedPtr};
use crate::record::Record;
use crate::traits::{Protect, Reclaim};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Delayed
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The delayed (batch-deferred) reclamation scheme.
#[derive(Debug, Default)]
pub struct Delayed;

unsafe impl Reclaim for Delayed {
    type Header = ();
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// DelayedManager
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The manager of the [`Delayed`] scheme.
#[derive(Debug)]
pub struct DelayedManager<T, D = DefaultDestructor, N = U2> {
    destructor: D,
    _marker: PhantomData<(*mut T, N)>,
}

impl<T, D, N: Unsigned> DelayedManager<T, D, N>
where
    D: Destructor<T, Delayed>,
{
    /// Creates a new manager with the given destructor policy.
    #[inline]
    pub fn with_destructor(destructor: D) -> Self {
        Self { destructor, _marker: PhantomData }
    }

    /// Acquires a handle for the current thread.
    #[inline]
    pub fn get_handle(&self) -> DelayedHandle<'_, T, D, N> {
        DelayedHandle { parent: self, retired: RefCell::new(Vec::new()) }
    }
}

impl<T, D, N: Unsigned> DelayedManager<T, D, N>
where
    D: Destructor<T, Delayed> + Default,
{
    /// Creates a new manager with the default destructor policy.
    #[inline]
    pub fn new() -> Self {
        Self::with_destructor(D::default())
    }
}

impl<T, D, N: Unsigned> Default for DelayedManager<T, D, N>
where
    D: Destructor<T, Delayed> + Default,
{
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// DelayedHandle
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The thread-local handle of the [`Delayed`] scheme.
///
/// Owns the list of values retired through it; the list is drained through
/// the destructor policy when the handle is dropped.
#[derive(Debug)]
pub struct DelayedHandle<'m, T, D, N: Unsigned>
where
    D: Destructor<T, Delayed>,
{
    parent: &'m DelayedManager<T, D, N>,
    retired: RefCell<Vec<MarkedPtr<T, N>>>,
}

impl<'m, T, D, N: Unsigned> DelayedHandle<'m, T, D, N>
where
    D: Destructor<T, Delayed>,
{
    /// Returns the number of values retired through this handle that await
    /// destruction.
    #[inline]
    pub fn retired_count(&self) -> usize {
        self.retired.borrow().len()
    }
}

unsafe impl<'m, T, D, N: Unsigned> Protect for DelayedHandle<'m, T, D, N>
where
    D: Destructor<T, Delayed>,
{
    type Item = T;
    type MarkBits = N;
    type Reclaimer = Delayed;

    #[inline]
    fn create(&self, elem: T) -> MarkedPtr<T, N> {
        MarkedPtr::from(Record::<T, Delayed>::alloc(elem))
    }

    #[inline]
    fn protect(&self, cell: &AtomicMarkedPtr<T, N>) -> MarkedPtr<T, N> {
        cell.load(ord::ACQUIRE)
    }

    #[inline]
    fn protect_raw(&self, _: MarkedPtr<T, N>) {}

    #[inline]
    fn unprotect(&self, _: MarkedPtr<T, N>) {}

    #[inline]
    unsafe fn retire(&self, ptr: MarkedPtr<T, N>) {
        debug_assert!(!ptr.is_null(), "retired a null pointer");
        self.retired.borrow_mut().push(ptr.clear_tag());
    }

    #[inline]
    unsafe fn reclaim_raw(&self, ptr: MarkedPtr<T, N>) {
        debug_assert!(!ptr.is_null(), "reclaimed a null pointer");
        Record::<T, Delayed>::dealloc(NonNull::new_unchecked(ptr.decompose_ptr()));
    }

    #[inline]
    fn is_safe(&self, _: MarkedPtr<T, N>) -> bool {
        false
    }
}

impl<'m, T, D, N: Unsigned> Drop for DelayedHandle<'m, T, D, N>
where
    D: Destructor<T, Delayed>,
{
    fn drop(&mut self) {
        for ptr in self.retired.take() {
            // retire only admits non-null pointers
            let elem = unsafe { NonNull::new_unchecked(ptr.decompose_ptr()) };
            unsafe { self.parent.destructor.destroy(elem) };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use typenum::U2;

    use crate::destructor::DefaultDestructor;
    use crate::traits::Protect;

    use super::DelayedManager;

    struct DropCount(Arc<AtomicUsize>);

    impl Drop for DropCount {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn destruction_waits_for_handle_drop() {
        let drops = Arc::new(AtomicUsize::new(0));
        let manager = DelayedManager::<DropCount, DefaultDestructor, U2>::new();

        let handle = manager.get_handle();
        for _ in 0..10 {
            let ptr = handle.create(DropCount(Arc::clone(&drops)));
            unsafe { handle.retire(ptr) };
        }

        assert_eq!(handle.retired_count(), 10);
        assert_eq!(drops.load(Ordering::Relaxed), 0);

        drop(handle);
        assert_eq!(drops.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn retire_clears_tags() {
        let drops = Arc::new(AtomicUsize::new(0));
        let manager = DelayedManager::<DropCount, DefaultDestructor, U2>::new();
        let handle = manager.get_handle();

        let ptr = handle.create(DropCount(Arc::clone(&drops)));
        unsafe { handle.retire(ptr.with_tag(0b11)) };
        drop(handle);

        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }
}
