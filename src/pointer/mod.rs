//! Pointer types which can use some of their unused lower bits for storing
//! additional information (their *tag*).
//!
//! All reclamation protocols in this crate operate internally on pointers
//! stripped of their tag ([`clear_tag`][MarkedPtr::clear_tag]), while the tag
//! itself is treated as user payload that is preserved across protection and
//! retirement.

use core::marker::PhantomData;
use core::mem;
use core::ptr::NonNull;
use core::sync::atomic::AtomicPtr;

use typenum::Unsigned;

mod atomic;
mod non_null;
mod raw;

////////////////////////////////////////////////////////////////////////////////////////////////////
// MarkedPtr
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A raw, nullable pointer type like `*mut T`, in which up to `N` of the
/// pointer's lower bits can be used to store additional information (the
/// *tag*).
///
/// The upper bound for `N` is dictated by the alignment of `T`: a type with
/// an alignment of `8` can have up to `3` mark bits. Using a type with
/// insufficient alignment results in a compile-time error as soon as any of
/// the tag operations are instantiated.
pub struct MarkedPtr<T, N> {
    inner: *mut T,
    _marker: PhantomData<N>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// MarkedNonNull
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A non-nullable version of [`MarkedPtr`], like
/// [`NonNull`][core::ptr::NonNull] is for `*mut T`.
///
/// Note that this type also excludes *marked* null pointers, i.e. pointer
/// values whose numerical representation is entirely made up of tag bits.
pub struct MarkedNonNull<T, N> {
    inner: NonNull<T>,
    _marker: PhantomData<N>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// AtomicMarkedPtr
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A marked raw pointer type which can be safely shared between threads.
///
/// This type has the same in-memory representation as a `*mut T` and is
/// mostly identical to [`AtomicPtr`][core::sync::atomic::AtomicPtr], except
/// that all of its methods take and return [`MarkedPtr`] instead of `*mut T`.
pub struct AtomicMarkedPtr<T, N> {
    inner: AtomicPtr<T>,
    _marker: PhantomData<N>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// helper functions
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Decomposes the integer representation of a marked pointer into the raw
/// pointer and the tag.
#[inline]
const fn decompose<T>(marked: usize, mark_bits: usize) -> (*mut T, usize) {
    (decompose_ptr::<T>(marked, mark_bits), decompose_tag::<T>(marked, mark_bits))
}

/// Decomposes the integer representation of a marked pointer into the raw
/// pointer stripped of its tag.
#[inline]
const fn decompose_ptr<T>(marked: usize, mark_bits: usize) -> *mut T {
    (marked & !mark_mask::<T>(mark_bits)) as *mut _
}

/// Decomposes the integer representation of a marked pointer into *only* the
/// tag.
#[inline]
const fn decompose_tag<T>(marked: usize, mark_bits: usize) -> usize {
    marked & mark_mask::<T>(mark_bits)
}

/// Gets the number of unused (markable) lower bits in a pointer for type `T`.
#[inline]
const fn lower_bits<T>() -> usize {
    mem::align_of::<T>().trailing_zeros() as usize
}

/// Gets the bitmask of markable lower bits of a pointer for type `T`.
///
/// Fails to const-evaluate if `T`'s alignment provides fewer than `mark_bits`
/// markable bits.
#[inline]
const fn mark_mask<T>(mark_bits: usize) -> usize {
    let _assert_sufficient_alignment = lower_bits::<T>() - mark_bits;
    (1 << mark_bits) - 1
}

/// Composes a marked pointer from a raw (unmarked) pointer and a tag.
///
/// Tag bits exceeding the markable bits of `T` are truncated.
#[inline]
fn compose<T, N: Unsigned>(ptr: *mut T, tag: usize) -> *mut T {
    debug_assert_eq!(ptr as usize & mark_mask::<T>(N::USIZE), 0);
    ((ptr as usize) | (mark_mask::<T>(N::USIZE) & tag)) as *mut _
}

#[cfg(test)]
mod tests {
    use core::ptr;

    use typenum::{Unsigned, U0, U1, U2, U3};

    use crate::align::{Aligned16, Aligned2, Aligned4, Aligned8};

    #[test]
    fn lower_bits() {
        assert_eq!(0, super::lower_bits::<u8>());
        assert_eq!(1, super::lower_bits::<Aligned2<u8>>());
        assert_eq!(2, super::lower_bits::<Aligned4<u8>>());
        assert_eq!(3, super::lower_bits::<Aligned8<u8>>());
        assert_eq!(4, super::lower_bits::<Aligned16<u8>>());
    }

    #[test]
    fn mark_mask() {
        assert_eq!(0b000, super::mark_mask::<Aligned8<u8>>(U0::USIZE));
        assert_eq!(0b001, super::mark_mask::<Aligned8<u8>>(U1::USIZE));
        assert_eq!(0b011, super::mark_mask::<Aligned8<u8>>(U2::USIZE));
        assert_eq!(0b111, super::mark_mask::<Aligned8<u8>>(U3::USIZE));
    }

    #[test]
    fn compose() {
        let raw = &Aligned4::new(0) as *const _ as *mut Aligned4<i32>;

        assert_eq!(super::compose::<Aligned4<i32>, U2>(ptr::null_mut(), 0), ptr::null_mut());
        assert_eq!(super::compose::<_, U2>(raw, 0), raw);
        assert_eq!(super::compose::<_, U2>(raw, 0b11), ((raw as usize) | 0b11) as *mut _);
        assert_eq!(super::compose::<_, U2>(raw, 0b1111), ((raw as usize) | 0b11) as *mut _);
    }

    #[test]
    fn decompose() {
        let mut aligned = Aligned8::new(0);

        for tag in [0b000usize, 0b001, 0b010, 0b100] {
            let composed = super::compose::<_, U3>(&mut aligned, tag);
            assert_eq!(
                super::decompose(composed as usize, U3::USIZE),
                (&mut aligned as *mut _, tag)
            );
        }

        let composed = super::compose::<_, U3>(&mut aligned, 0b1000);
        assert_eq!(super::decompose(composed as usize, U3::USIZE), (&mut aligned as *mut _, 0));
    }

    #[test]
    fn marked_null() {
        let null: *mut Aligned4<i32> = ptr::null_mut();
        let marked = super::compose::<_, U1>(null, 1);
        assert_eq!(super::decompose::<Aligned4<i32>>(marked as usize, 1), (ptr::null_mut(), 1));
    }
}
