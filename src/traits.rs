use typenum::Unsigned;

use crate::guard::ReclamationGuard;
use crate::pointer::{AtomicMarkedPtr, MarkedPtr};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Reclaim (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A marker trait for memory reclamation schemes.
///
/// Implementors only declare the per-record [`Header`][Reclaim::Header] that
/// is allocated alongside every managed value as part of a
/// [`Record`][crate::Record]. When no such data is necessary, `()` is the
/// recommended choice.
///
/// # Safety
///
/// The associated header type must match what the scheme's handle operations
/// expect to find in front of every element pointer they are given.
pub unsafe trait Reclaim: Sized {
    /// The scheme-specific data allocated alongside every managed value.
    type Header: Default + Sized;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Protect (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The per-thread handle contract of a memory reclamation scheme.
///
/// A handle is acquired from its scheme's manager (`get_handle`), carries all
/// per-thread state and must only be used from a single thread at a time.
/// All inputs are *tagged* pointers; the tag is user payload and preserved by
/// the operations, while all internal comparisons and dereferences operate on
/// the [`clear_tag`][MarkedPtr::clear_tag]-ed value.
///
/// # Safety
///
/// Implementors must guarantee that a pointer returned by
/// [`protect`][Protect::protect] (or declared through
/// [`protect_raw`][Protect::protect_raw]) remains valid to dereference until
/// the matching [`unprotect`][Protect::unprotect], even if the pointer is
/// concurrently passed to [`retire`][Protect::retire] by any handle of the
/// same manager.
pub unsafe trait Protect: Sized {
    /// The type of the managed values.
    type Item: Sized;
    /// The number of usable mark bits.
    type MarkBits: Unsigned;
    /// The reclamation scheme associated with this handle type.
    type Reclaimer: Reclaim;

    /// Allocates a new managed value, either freshly or recycled from the
    /// scheme's free list, and returns the pointer to it.
    ///
    /// The returned pointer is untagged and not yet protected or published.
    fn create(&self, elem: Self::Item) -> MarkedPtr<Self::Item, Self::MarkBits>;

    /// Atomically takes a snapshot of `cell` and acquires a protection for
    /// the loaded value.
    ///
    /// Until the value is passed to [`unprotect`][Protect::unprotect] (or the
    /// guard holding it is dropped), dereferencing its cleared pointer is
    /// safe. The returned value preserves the tag the cell contained.
    fn protect(
        &self,
        cell: &AtomicMarkedPtr<Self::Item, Self::MarkBits>,
    ) -> MarkedPtr<Self::Item, Self::MarkBits>;

    /// Declares an existing pointer as protected, e.g. a freshly created
    /// value that is about to be published.
    fn protect_raw(&self, ptr: MarkedPtr<Self::Item, Self::MarkBits>);

    /// Releases one protection previously acquired through
    /// [`protect`][Protect::protect] or [`protect_raw`][Protect::protect_raw]
    /// on this handle for the same (cleared) pointer.
    fn unprotect(&self, ptr: MarkedPtr<Self::Item, Self::MarkBits>);

    /// Releases one protection for every pointer in `ptrs`.
    #[inline]
    fn unprotect_all(&self, ptrs: &[MarkedPtr<Self::Item, Self::MarkBits>]) {
        for &ptr in ptrs {
            self.unprotect(ptr);
        }
    }

    /// Retires a value, deferring its destruction until no protection can
    /// observe it anymore.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the value is *actually* unlinked from
    /// its data structure, i.e. there is no way for another thread to acquire
    /// a new reference to it, and that it is retired at most once. Threads
    /// that acquired a protection before the value was unlinked may continue
    /// to read it.
    unsafe fn retire(&self, ptr: MarkedPtr<Self::Item, Self::MarkBits>);

    /// Destroys a value immediately, bypassing any deferral.
    ///
    /// This is intended for diagnostic and shutdown paths.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that no thread holds any reference to the
    /// value, protected or otherwise, and that it is destroyed at most once.
    unsafe fn reclaim_raw(&self, ptr: MarkedPtr<Self::Item, Self::MarkBits>);

    /// Returns `true` if the value is *currently* observed by no protection.
    ///
    /// This is a best-effort snapshot; schemes without protection records
    /// conservatively return `false`.
    fn is_safe(&self, ptr: MarkedPtr<Self::Item, Self::MarkBits>) -> bool;

    /// Takes a protected snapshot of `cell` and wraps it in a guard that
    /// releases the protection when it is dropped.
    #[inline]
    fn guard<'h>(
        &'h self,
        cell: &AtomicMarkedPtr<Self::Item, Self::MarkBits>,
    ) -> ReclamationGuard<'h, Self> {
        ReclamationGuard::new(self, cell)
    }

    /// Declares `ptr` as protected and wraps it in a guard that releases the
    /// protection when it is dropped.
    #[inline]
    fn guard_raw(
        &self,
        ptr: MarkedPtr<Self::Item, Self::MarkBits>,
    ) -> ReclamationGuard<'_, Self> {
        ReclamationGuard::from_raw(self, ptr)
    }
}
