use core::fmt;
use core::ops::Deref;

use crate::pointer::{AtomicMarkedPtr, MarkedNonNull, MarkedPtr};
use crate::traits::Protect;

////////////////////////////////////////////////////////////////////////////////////////////////////
// ReclamationGuard
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An RAII guard extending a protection for the duration of a lexical scope.
///
/// A guard is created from a handle and either an atomic cell (in which case
/// it takes a protected snapshot through [`protect`][Protect::protect]) or an
/// existing pointer (declared through [`protect_raw`][Protect::protect_raw]).
/// When the guard is dropped, the protection is released on every exit path,
/// including panics.
///
/// Guards cannot be cloned, since a protection must be released exactly as
/// often as it was acquired.
pub struct ReclamationGuard<'h, H: Protect> {
    handle: &'h H,
    ptr: MarkedPtr<H::Item, H::MarkBits>,
}

impl<'h, H: Protect> ReclamationGuard<'h, H> {
    /// Creates a guard holding a protected snapshot of `cell`.
    ///
    /// If the cell contains a null pointer, the guard is empty and releases
    /// nothing on drop.
    #[inline]
    pub fn new(handle: &'h H, cell: &AtomicMarkedPtr<H::Item, H::MarkBits>) -> Self {
        Self { handle, ptr: handle.protect(cell) }
    }

    /// Creates a guard for an existing pointer, declaring it as protected.
    #[inline]
    pub fn from_raw(handle: &'h H, ptr: MarkedPtr<H::Item, H::MarkBits>) -> Self {
        if !ptr.is_null() {
            handle.protect_raw(ptr);
        }
        Self { handle, ptr }
    }

    /// Returns the protected marked pointer, tag included.
    #[inline]
    pub fn as_marked(&self) -> MarkedPtr<H::Item, H::MarkBits> {
        self.ptr
    }

    /// Returns the protected pointer as a [`MarkedNonNull`], or [`None`] if
    /// the guard is empty.
    #[inline]
    pub fn as_non_null(&self) -> Option<MarkedNonNull<H::Item, H::MarkBits>> {
        MarkedNonNull::new(self.ptr)
    }

    /// Returns the tag of the protected pointer.
    #[inline]
    pub fn tag(&self) -> usize {
        self.ptr.decompose_tag()
    }

    /// Returns `true` if the guard holds no pointer.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Returns a reference to the protected value, or [`None`] if the guard
    /// is empty.
    #[inline]
    pub fn as_ref(&self) -> Option<&H::Item> {
        // the value is protected for as long as the guard lives
        unsafe { self.ptr.as_ref() }
    }

    /// Releases the protection early and returns the previously protected
    /// pointer.
    #[inline]
    pub fn release(self) -> MarkedPtr<H::Item, H::MarkBits> {
        self.ptr
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Deref
////////////////////////////////////////////////////////////////////////////////////////////////////

impl<'h, H: Protect> Deref for ReclamationGuard<'h, H> {
    type Target = H::Item;

    /// Dereferences the protected value.
    ///
    /// # Panics
    ///
    /// Panics if the guard is empty.
    #[inline]
    fn deref(&self) -> &H::Item {
        match self.as_ref() {
            Some(reference) => reference,
            None => panic!("dereferenced an empty reclamation guard"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Drop
////////////////////////////////////////////////////////////////////////////////////////////////////

impl<'h, H: Protect> Drop for ReclamationGuard<'h, H> {
    #[inline]
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            self.handle.unprotect(self.ptr);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Debug & Pointer (fmt)
////////////////////////////////////////////////////////////////////////////////////////////////////

impl<'h, H: Protect> fmt::Debug for ReclamationGuard<'h, H> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (ptr, tag) = self.ptr.decompose();
        f.debug_struct("ReclamationGuard").field("ptr", &ptr).field("tag", &tag).finish()
    }
}

impl<'h, H: Protect> fmt::Pointer for ReclamationGuard<'h, H> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Pointer::fmt(&self.ptr.decompose_ptr(), f)
    }
}
