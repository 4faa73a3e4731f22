//! A reclamation scheme for single-threaded use, in which retiring destroys
//! immediately.
//!
//! Mainly useful as a baseline and as a reference oracle in tests of code
//! that is generic over the [`Protect`] contract.

use core::marker::PhantomData;
use core::ptr::NonNull;

use typenum::{Unsigned, U2};

use crate::destructor::{DefaultDestructor, Destructor};
use crate::ord;
use crate::pointer::{AtomicMarkedPtr, MarkedPtr};
use crate::record::Record;
use crate::traits::{Protect, Reclaim};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Sequential
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The sequential (single-threaded) reclamation scheme.
#[derive(Debug, Default)]
pub struct Sequential;

unsafe impl Reclaim for Sequential {
    type Header = ();
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// SequentialManager
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The manager of the [`Sequential`] scheme.
///
/// Holds no shared state besides the injected destructor policy.
#[derive(Debug)]
pub struct SequentialManager<T, D = DefaultDestructor, N = U2> {
    destructor: D,
    _marker: PhantomData<(*mut T, N)>,
}

impl<T, D, N: Unsigned> SequentialManager<T, D, N>
where
    D: Destructor<T, Sequential>,
{
    /// Creates a new manager with the given destructor policy.
    #[inline]
    pub fn with_destructor(destructor: D) -> Self {
        Self { destructor, _marker: PhantomData }
    }

    /// Acquires the handle for the (only) participating thread.
    #[inline]
    pub fn get_handle(&self) -> SequentialHandle<'_, T, D, N> {
        SequentialHandle { parent: self, _not_sync: PhantomData }
    }
}

impl<T, D, N: Unsigned> SequentialManager<T, D, N>
where
    D: Destructor<T, Sequential> + Default,
{
    /// Creates a new manager with the default destructor policy.
    #[inline]
    pub fn new() -> Self {
        Self::with_destructor(D::default())
    }
}

impl<T, D, N: Unsigned> Default for SequentialManager<T, D, N>
where
    D: Destructor<T, Sequential> + Default,
{
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// SequentialHandle
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The thread-local handle of the [`Sequential`] scheme.
#[derive(Debug)]
pub struct SequentialHandle<'m, T, D, N: Unsigned>
where
    D: Destructor<T, Sequential>,
{
    parent: &'m SequentialManager<T, D, N>,
    _not_sync: PhantomData<*mut ()>,
}

unsafe impl<'m, T, D, N: Unsigned> Protect for SequentialHandle<'m, T, D, N>
where
    D: Destructor<T, Sequential>,
{
    type Item = T;
    type MarkBits = N;
    type Reclaimer = Sequential;

    #[inline]
    fn create(&self, elem: T) -> MarkedPtr<T, N> {
        MarkedPtr::from(Record::<T, Sequential>::alloc(elem))
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
        let elem = NonNull::new_unchecked(ptr.decompose_ptr());
        self.parent.destructor.destroy(elem);
    }

    #[inline]
    unsafe fn reclaim_raw(&self, ptr: MarkedPtr<T, N>) {
        debug_assert!(!ptr.is_null(), "reclaimed a null pointer");
        Record::<T, Sequential>::dealloc(NonNull::new_unchecked(ptr.decompose_ptr()));
    }

    #[inline]
    fn is_safe(&self, _: MarkedPtr<T, N>) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use typenum::U1;

    use crate::destructor::DefaultDestructor;
    use crate::pointer::{AtomicMarkedPtr, MarkedPtr};
    use crate::traits::Protect;

    use super::SequentialManager;

    struct DropCount(Arc<AtomicUsize>);

    impl Drop for DropCount {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn retire_destroys_immediately() {
        let drops = Arc::new(AtomicUsize::new(0));
        let manager = SequentialManager::<DropCount, DefaultDestructor, U1>::new();
        let handle = manager.get_handle();

        let cell = AtomicMarkedPtr::null();
        let ptr = handle.create(DropCount(Arc::clone(&drops)));
        cell.store(ptr, Ordering::Relaxed);

        let loaded = handle.protect(&cell);
        assert_eq!(loaded, ptr);
        assert!(!handle.is_safe(loaded));
        handle.unprotect(loaded);

        cell.store(MarkedPtr::null(), Ordering::Relaxed);
        unsafe { handle.retire(ptr) };
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn tag_preserved_through_protect() {
        let drops = Arc::new(AtomicUsize::new(0));
        let manager = SequentialManager::<DropCount, DefaultDestructor, U1>::new();
        let handle = manager.get_handle();

        let ptr = handle.create(DropCount(Arc::clone(&drops)));
        let cell = AtomicMarkedPtr::new(ptr.with_tag(0b1));

        let loaded = handle.protect(&cell);
        assert_eq!(loaded.decompose_tag(), 0b1);
        assert_eq!(loaded.clear_tag(), ptr);

        unsafe { handle.retire(loaded) };
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }
}
