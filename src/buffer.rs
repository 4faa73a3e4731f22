//! Power-of-two ring buffers used as retire queues and free lists.

use core::fmt;
use core::mem::MaybeUninit;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicU64};

use crossbeam_utils::{Backoff, CachePadded};

use crate::ord;

const DEFAULT_CAPACITY: usize = 32;

#[inline]
fn ring_capacity(capacity: usize) -> usize {
    capacity.max(DEFAULT_CAPACITY).next_power_of_two()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// CircularBuffer
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A growable ring buffer with power-of-two capacity, owned by a single
/// thread.
///
/// Front and back positions are kept as monotonic 64-bit counters; the
/// physical slot of a counter value is `counter & (capacity - 1)` and the
/// length is the wrapping difference of the two counters, independent of
/// wraparound. When full, the buffer grows by doubling and relocates its
/// elements.
pub struct CircularBuffer<T> {
    buf: Box<[MaybeUninit<T>]>,
    start: u64,
    end: u64,
}

impl<T> CircularBuffer<T> {
    /// Creates an empty buffer with the default capacity.
    #[inline]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an empty buffer with at least `capacity` slots, rounded up to
    /// the next power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = ring_capacity(capacity);
        let buf = (0..capacity).map(|_| MaybeUninit::uninit()).collect();
        Self { buf, start: 0, end: 0 }
    }

    /// Returns the number of elements in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.end.wrapping_sub(self.start) as usize
    }

    /// Returns `true` if the buffer contains no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns the current capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    fn mask(&self) -> u64 {
        self.buf.len() as u64 - 1
    }

    #[inline]
    fn slot(&self, pos: u64) -> *const MaybeUninit<T> {
        &self.buf[(pos & self.mask()) as usize]
    }

    #[inline]
    fn slot_mut(&mut self, pos: u64) -> *mut MaybeUninit<T> {
        let mask = self.mask();
        &mut self.buf[(pos & mask) as usize]
    }

    /// Appends an element to the back of the buffer.
    pub fn push_back(&mut self, elem: T) {
        if self.len() == self.capacity() {
            self.grow();
        }
        let end = self.end;
        unsafe { (*self.slot_mut(end)).write(elem) };
        self.end = end.wrapping_add(1);
    }

    /// Prepends an element to the front of the buffer.
    pub fn push_front(&mut self, elem: T) {
        if self.len() == self.capacity() {
            self.grow();
        }
        let start = self.start.wrapping_sub(1);
        unsafe { (*self.slot_mut(start)).write(elem) };
        self.start = start;
    }

    /// Removes and returns the element at the back of the buffer, or [`None`]
    /// if it is empty.
    pub fn pop_back(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        self.end = self.end.wrapping_sub(1);
        let end = self.end;
        Some(unsafe { (*self.slot_mut(end)).assume_init_read() })
    }

    /// Removes and returns the element at the front of the buffer, or
    /// [`None`] if it is empty.
    pub fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let start = self.start;
        self.start = start.wrapping_add(1);
        Some(unsafe { (*self.slot_mut(start)).assume_init_read() })
    }

    /// Returns a reference to the element at offset `idx` from the front, or
    /// [`None`] if `idx` is out of bounds.
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&T> {
        if idx < self.len() {
            let pos = self.start.wrapping_add(idx as u64);
            Some(unsafe { (*self.slot(pos)).assume_init_ref() })
        } else {
            None
        }
    }

    /// Returns a random-access iterator over the elements, front to back.
    #[inline]
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { buffer: self, pos: self.start, rem: self.len() }
    }

    /// Doubles the capacity and relocates all elements to the beginning of
    /// the new allocation.
    fn grow(&mut self) {
        let len = self.len();
        let mut buf: Box<[MaybeUninit<T>]> =
            (0..self.capacity() * 2).map(|_| MaybeUninit::uninit()).collect();

        for idx in 0..len {
            let pos = self.start.wrapping_add(idx as u64);
            unsafe {
                let elem = (*self.slot(pos)).assume_init_read();
                buf[idx].write(elem);
            }
        }

        self.buf = buf;
        self.start = 0;
        self.end = len as u64;
    }
}

impl<T> Default for CircularBuffer<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for CircularBuffer<T> {
    fn drop(&mut self) {
        while let Some(elem) = self.pop_front() {
            drop(elem);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for CircularBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a, T> IntoIterator for &'a CircularBuffer<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    #[inline]
    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Iter
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A random-access iterator over the elements of a [`CircularBuffer`].
pub struct Iter<'a, T> {
    buffer: &'a CircularBuffer<T>,
    pos: u64,
    rem: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    #[inline]
    fn next(&mut self) -> Option<&'a T> {
        if self.rem == 0 {
            return None;
        }
        let pos = self.pos;
        self.pos = pos.wrapping_add(1);
        self.rem -= 1;
        Some(unsafe { (*self.buffer.slot(pos)).assume_init_ref() })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.rem, Some(self.rem))
    }
}

impl<'a, T> DoubleEndedIterator for Iter<'a, T> {
    #[inline]
    fn next_back(&mut self) -> Option<&'a T> {
        if self.rem == 0 {
            return None;
        }
        self.rem -= 1;
        let pos = self.pos.wrapping_add(self.rem as u64);
        Some(unsafe { (*self.buffer.slot(pos)).assume_init_ref() })
    }
}

impl<'a, T> ExactSizeIterator for Iter<'a, T> {}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ConcurrentCircularBuffer
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A bounded many-producer/single-consumer ring buffer of non-null pointers.
///
/// Producers and the consumer each claim a position with a `fetch_add` on
/// their cursor; the null pointer serves as the per-slot sentinel for "slot
/// empty". [`push`][ConcurrentCircularBuffer::push] spins while its slot is
/// still occupied, [`pop`][ConcurrentCircularBuffer::pop] spins while its
/// slot is still empty, so both are lock-free except when the buffer is full
/// (respectively empty).
pub struct ConcurrentCircularBuffer<T> {
    slots: Box<[AtomicPtr<T>]>,
    push_id: CachePadded<AtomicU64>,
    pop_id: CachePadded<AtomicU64>,
}

unsafe impl<T: Send> Send for ConcurrentCircularBuffer<T> {}
unsafe impl<T: Send> Sync for ConcurrentCircularBuffer<T> {}

impl<T> ConcurrentCircularBuffer<T> {
    /// Creates an empty buffer with at least `capacity` slots, rounded up to
    /// the next power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = ring_capacity(capacity);
        let slots = (0..capacity).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        Self {
            slots,
            push_id: CachePadded::new(AtomicU64::new(0)),
            pop_id: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Returns the capacity of the buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of elements in the buffer.
    ///
    /// The value is approximate while producers or the consumer are active.
    #[inline]
    pub fn len(&self) -> usize {
        let push = self.push_id.load(ord::RELAXED);
        let pop = self.pop_id.load(ord::RELAXED);
        push.wrapping_sub(pop) as usize
    }

    /// Returns `true` if the buffer contains no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn slot(&self, id: u64) -> &AtomicPtr<T> {
        &self.slots[(id & (self.slots.len() as u64 - 1)) as usize]
    }

    /// Inserts a pointer, spinning while the claimed slot is still occupied
    /// by an element of the previous lap.
    pub fn push(&self, elem: NonNull<T>) {
        let id = self.push_id.fetch_add(1, ord::ACQUIRE);
        let slot = self.slot(id);

        let backoff = Backoff::new();
        loop {
            match slot.compare_exchange_weak(
                ptr::null_mut(),
                elem.as_ptr(),
                ord::RELEASE,
                ord::RELAXED,
            ) {
                Ok(_) => return,
                Err(_) => backoff.snooze(),
            }
        }
    }

    /// Removes and returns the oldest pointer, spinning while the claimed
    /// slot is still empty.
    pub fn pop(&self) -> NonNull<T> {
        let id = self.pop_id.fetch_add(1, ord::ACQUIRE);
        let slot = self.slot(id);

        let backoff = Backoff::new();
        loop {
            if let Some(elem) = NonNull::new(slot.swap(ptr::null_mut(), ord::ACQ_REL)) {
                return elem;
            }
            while slot.load(ord::RELAXED).is_null() {
                backoff.snooze();
            }
        }
    }

    /// Resets the buffer to the empty state by storing the sentinel into
    /// every slot.
    ///
    /// Any pointers still in the buffer are discarded without being
    /// destroyed.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot.get_mut() = ptr::null_mut();
        }
        *self.push_id.get_mut() = 0;
        *self.pop_id.get_mut() = 0;
    }
}

impl<T> fmt::Debug for ConcurrentCircularBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConcurrentCircularBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
