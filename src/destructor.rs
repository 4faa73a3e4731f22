use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::record::Record;
use crate::traits::Reclaim;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Destructor (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A policy deciding what *destroying* a retired value means.
///
/// Reclamation schemes never destroy values directly but always route
/// destruction through their injected policy, so callers can observe or
/// redirect reclamation (e.g. tracing destructions in tests, poisoning
/// memory in debug builds or returning storage to an arena).
pub trait Destructor<T, R: Reclaim> {
    /// Destroys the retired value whose element pointer is `elem`.
    ///
    /// # Safety
    ///
    /// `elem` must point to a live element that was allocated as part of a
    /// [`Record`] of the scheme `R`, no thread may hold any reference to it
    /// anymore and it must be destroyed at most once.
    unsafe fn destroy(&self, elem: NonNull<T>);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// DefaultDestructor
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The default destructor policy: runs the element's destructor and returns
/// the record's memory to the allocator.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultDestructor;

impl<T, R: Reclaim> Destructor<T, R> for DefaultDestructor {
    #[inline]
    unsafe fn destroy(&self, elem: NonNull<T>) {
        Record::<T, R>::dealloc(elem);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// TracingDestructor
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A destructor policy wrapper that counts every destruction it performs
/// before delegating to the wrapped policy.
///
/// The count lives in an external counter so it remains observable after the
/// manager owning the policy is gone. Useful for asserting exactly-once
/// destruction in tests and for leak diagnostics at shutdown.
#[derive(Debug)]
pub struct TracingDestructor<D = DefaultDestructor> {
    destroyed: &'static AtomicUsize,
    inner: D,
}

impl<D: Default> TracingDestructor<D> {
    /// Creates a new tracing wrapper around the policy `D`, recording
    /// destructions in `destroyed`.
    #[inline]
    pub fn new(destroyed: &'static AtomicUsize) -> Self {
        Self { destroyed, inner: D::default() }
    }
}

impl<T, R: Reclaim, D: Destructor<T, R>> Destructor<T, R> for TracingDestructor<D> {
    #[inline]
    unsafe fn destroy(&self, elem: NonNull<T>) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        self.inner.destroy(elem);
    }
}
