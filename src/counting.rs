//! A reference-counted reclamation scheme with in-place storage recycling.
//!
//! Every managed value carries an atomic reference counter in its record
//! header. Readers acquire a tentative count before validating their
//! snapshot, retirers set a logical-delete mark in the counter's high bit and
//! the last departing reference destroys the value. Destroyed storage is not
//! returned to the allocator but pushed onto a shared free list and recycled
//! by subsequent allocations, with a per-slot epoch that lets ABA-sensitive
//! callers detect a slot's prior life.

use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU32, AtomicU64};

use parking_lot::Mutex;
use typenum::{Unsigned, U2};

use crate::buffer::CircularBuffer;
use crate::ord;
use crate::pointer::{AtomicMarkedPtr, MarkedPtr};
use crate::record::Record;
use crate::traits::{Protect, Reclaim};

/// The logical-delete mark in the high bit of the reference counter.
const MARK_BIT: u32 = 1 << 31;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Counting
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The reference-counted reclamation scheme.
#[derive(Debug, Default)]
pub struct Counting;

unsafe impl Reclaim for Counting {
    type Header = CountedHeader;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// CountedHeader
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The per-record header of the [`Counting`] scheme.
///
/// The counter's high bit is the logical-delete mark; the low 31 bits count
/// live references. A record is destructible exactly when the counter equals
/// the bare mark bit (marked, no references). The epoch counts the lives of
/// the record's storage slot and is bumped on every destruction.
#[derive(Debug)]
pub struct CountedHeader {
    counter: AtomicU32,
    epoch: AtomicU64,
}

impl Default for CountedHeader {
    #[inline]
    fn default() -> Self {
        Self { counter: AtomicU32::new(0), epoch: AtomicU64::new(0) }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// CountingManager
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The manager of the [`Counting`] scheme.
///
/// Owns the mutex-guarded free list of recyclable record slots. The elements
/// of the free list are *dead* records: their element storage is
/// uninitialized and their counters are zero.
#[derive(Debug)]
pub struct CountingManager<T, N = U2> {
    freelist: Mutex<CircularBuffer<NonNull<T>>>,
    _marker: PhantomData<(*mut T, N)>,
}

unsafe impl<T: Send, N> Send for CountingManager<T, N> {}
unsafe impl<T: Send + Sync, N> Sync for CountingManager<T, N> {}

impl<T, N: Unsigned> CountingManager<T, N> {
    /// Creates a new manager with an empty free list.
    #[inline]
    pub fn new() -> Self {
        Self { freelist: Mutex::new(CircularBuffer::new()), _marker: PhantomData }
    }

    /// Acquires a handle for the current thread.
    #[inline]
    pub fn get_handle(&self) -> CountingHandle<'_, T, N> {
        CountingHandle { parent: self, _not_sync: PhantomData }
    }

    /// Returns the number of recyclable slots currently in the free list.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.freelist.lock().len()
    }
}

impl<T, N: Unsigned> Default for CountingManager<T, N> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T, N> Drop for CountingManager<T, N> {
    fn drop(&mut self) {
        // the free list holds dead records whose elements were already
        // dropped, only the record storage itself is returned here
        let mut freelist = self.freelist.lock();
        while let Some(elem) = freelist.pop_front() {
            unsafe {
                let record = Record::<T, Counting>::from_elem(elem);
                let layout = std::alloc::Layout::new::<Record<T, Counting>>();
                std::alloc::dealloc(record.as_ptr().cast(), layout);
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// CountingHandle
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The thread-local handle of the [`Counting`] scheme.
#[derive(Debug)]
pub struct CountingHandle<'m, T, N: Unsigned> {
    parent: &'m CountingManager<T, N>,
    _not_sync: PhantomData<*mut ()>,
}

unsafe impl<'m, T: Send, N: Unsigned> Send for CountingHandle<'m, T, N> where
    CountingManager<T, N>: Sync
{
}

impl<'m, T, N: Unsigned> CountingHandle<'m, T, N> {
    /// Returns the storage epoch of the record containing `ptr`.
    ///
    /// The epoch is bumped every time the record's slot is destroyed, so a
    /// changed epoch proves that a pointer observed earlier refers to a
    /// different life of the same storage.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live element managed by this handle's manager.
    #[inline]
    pub unsafe fn epoch_of(&self, ptr: MarkedPtr<T, N>) -> u64 {
        Self::header(elem_of(ptr)).epoch.load(ord::RELAXED)
    }

    #[inline]
    unsafe fn header<'a>(elem: NonNull<T>) -> &'a CountedHeader {
        Record::<T, Counting>::header_from_elem(elem)
    }

    /// Acquires one tentative reference on the record.
    #[inline]
    unsafe fn increment(&self, elem: NonNull<T>) {
        Self::header(elem).counter.fetch_add(1, ord::ACQ_REL);
    }

    /// Releases one reference on the record, destroying it if this was the
    /// last reference of a marked record.
    unsafe fn decrement(&self, elem: NonNull<T>) {
        let header = Self::header(elem);
        let prev = header.counter.fetch_sub(1, ord::ACQ_REL);
        debug_assert_ne!(prev & !MARK_BIT, 0, "reference counter underflow");

        if prev == MARK_BIT + 1 {
            // this was the last reference of a marked record, attempt to
            // claim destruction; a concurrent tentative acquire makes the
            // exchange fail and its back-out re-triggers this path
            if header
                .counter
                .compare_exchange(MARK_BIT, 0, ord::ACQ_REL, ord::RELAXED)
                .is_ok()
            {
                self.destroy(elem);
            }
        }
    }

    /// Destroys a record whose counter was reset by the destroying exchange:
    /// drops the element, bumps the epoch and recycles the slot.
    unsafe fn destroy(&self, elem: NonNull<T>) {
        ptr::drop_in_place(elem.as_ptr());
        Self::header(elem).epoch.fetch_add(1, ord::RELAXED);
        self.parent.freelist.lock().push_back(elem);
    }
}

unsafe impl<'m, T, N: Unsigned> Protect for CountingHandle<'m, T, N> {
    type Item = T;
    type MarkBits = N;
    type Reclaimer = Counting;

    fn create(&self, elem: T) -> MarkedPtr<T, N> {
        let recycled = self.parent.freelist.lock().pop_front();
        match recycled {
            Some(slot) => {
                // the slot is dead storage with a zeroed counter, construct
                // the new element in place
                unsafe { ptr::write(slot.as_ptr(), elem) };
                MarkedPtr::from(slot)
            }
            None => MarkedPtr::from(Record::<T, Counting>::alloc(elem)),
        }
    }

    fn protect(&self, cell: &AtomicMarkedPtr<T, N>) -> MarkedPtr<T, N> {
        let mut current = cell.load(ord::ACQUIRE);
        loop {
            if let Some(elem) = NonNull::new(current.decompose_ptr()) {
                unsafe { self.increment(elem) };
            }
            let reloaded = cell.load(ord::ACQUIRE);
            if reloaded == current {
                return current;
            }
            // the cell changed under the tentative acquire, back out
            if let Some(elem) = NonNull::new(current.decompose_ptr()) {
                unsafe { self.decrement(elem) };
            }
            current = reloaded;
        }
    }

    #[inline]
    fn protect_raw(&self, ptr: MarkedPtr<T, N>) {
        if let Some(elem) = NonNull::new(ptr.decompose_ptr()) {
            unsafe { self.increment(elem) };
        }
    }

    #[inline]
    fn unprotect(&self, ptr: MarkedPtr<T, N>) {
        debug_assert!(!ptr.is_null(), "unprotected a null pointer");
        if let Some(elem) = NonNull::new(ptr.decompose_ptr()) {
            unsafe { self.decrement(elem) };
        }
    }

    unsafe fn retire(&self, ptr: MarkedPtr<T, N>) {
        debug_assert!(!ptr.is_null(), "retired a null pointer");
        let elem = elem_of(ptr);
        let header = Self::header(elem);

        let prev = header.counter.fetch_or(MARK_BIT, ord::ACQ_REL);
        debug_assert_eq!(prev & MARK_BIT, 0, "value retired twice");

        if prev == 0 {
            // no live references and not previously marked, the retirer is
            // responsible for destruction unless a reader raced in between
            if header
                .counter
                .compare_exchange(MARK_BIT, 0, ord::ACQ_REL, ord::RELAXED)
                .is_ok()
            {
                self.destroy(elem);
            }
        }
    }

    #[inline]
    unsafe fn reclaim_raw(&self, ptr: MarkedPtr<T, N>) {
        debug_assert!(!ptr.is_null(), "reclaimed a null pointer");
        Record::<T, Counting>::dealloc(elem_of(ptr));
    }

    #[inline]
    fn is_safe(&self, ptr: MarkedPtr<T, N>) -> bool {
        match NonNull::new(ptr.decompose_ptr()) {
            Some(elem) => {
                let counter = unsafe { Self::header(elem) }.counter.load(ord::ACQUIRE);
                counter & !MARK_BIT == 0
            }
            None => false,
        }
    }
}

#[inline]
unsafe fn elem_of<T, N: Unsigned>(ptr: MarkedPtr<T, N>) -> NonNull<T> {
    NonNull::new_unchecked(ptr.decompose_ptr())
}
