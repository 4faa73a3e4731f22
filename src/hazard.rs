//! A hazard-pointer reclamation scheme with transferable deletion
//! responsibility.
//!
//! Readers publish the pointers they are about to dereference into per-handle
//! arrays of protection slots. A retirer scans all published slots before
//! destroying: if it finds its target, it does not defer to a retire list but
//! instead *transfers the responsibility for destruction* onto the protecting
//! slot by setting the slot's reserved mark bit with a compare-exchange. The
//! protecting handle then performs (or re-transfers) the destruction when it
//! releases the protection.
//!
//! The reserved mark bit (flag 0) on slot and registry entries belongs to the
//! scheme; clients must not rely on bit 0 of their own tags under hazard.

use core::array;
use core::fmt;
use core::hint;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::AtomicUsize;

use crossbeam_utils::CachePadded;
use typenum::{Unsigned, U0, U1, U2};

use crate::destructor::{DefaultDestructor, Destructor};
use crate::ord;
use crate::pointer::{AtomicMarkedPtr, MarkedPtr};
use crate::record::Record;
use crate::traits::{Protect, Reclaim};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Hazard
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The hazard-pointer reclamation scheme.
#[derive(Debug, Default)]
pub struct Hazard;

unsafe impl Reclaim for Hazard {
    type Header = ();
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// RegistryFull
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The error returned by [`HazardManager::get_handle`] when more than
/// `MAX_THREADS` handles are live at the same time.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RegistryFull;

impl fmt::Display for RegistryFull {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "hazard handle registry is at capacity")
    }
}

impl std::error::Error for RegistryFull {}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ProtectionBlock
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The per-handle array of protection slots.
///
/// `counter` is the number of occupied slots; only the owning handle moves
/// it, while retirers of all threads read the slots and may set their
/// reserved mark bit. Slots always hold pointers stripped of any user tag.
struct ProtectionBlock<T, const MAX_PROTECTIONS: usize> {
    counter: CachePadded<AtomicUsize>,
    slots: [AtomicMarkedPtr<T, U1>; MAX_PROTECTIONS],
}

impl<T, const MP: usize> ProtectionBlock<T, MP> {
    fn new() -> Self {
        Self {
            counter: CachePadded::new(AtomicUsize::new(0)),
            slots: array::from_fn(|_| AtomicMarkedPtr::null()),
        }
    }

    /// Returns the number of occupied slots, clamped to the slot count.
    #[inline]
    fn occupied(&self) -> usize {
        self.counter.load(ord::ACQUIRE).min(MP)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// HazardManager
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The manager of the [`Hazard`] scheme.
///
/// Holds the registry of up to `MAX_THREADS` protection blocks. A registry
/// entry is either null (free), a block pointer (in use by a live handle) or
/// a block pointer with the reserved mark bit set (returned by a dropped
/// handle, available for reuse).
///
/// Dropping the manager waits until every outstanding handle has been
/// returned and only then frees the blocks.
pub struct HazardManager<
    T,
    D = DefaultDestructor,
    N = U2,
    const MAX_THREADS: usize = 64,
    const MAX_PROTECTIONS: usize = 64,
> {
    handle_count: CachePadded<AtomicUsize>,
    handles: [AtomicMarkedPtr<ProtectionBlock<T, MAX_PROTECTIONS>, U1>; MAX_THREADS],
    destructor: D,
    _marker: PhantomData<(*mut T, N)>,
}

unsafe impl<T, D, N, const MT: usize, const MP: usize> Send for HazardManager<T, D, N, MT, MP>
where
    T: Send + Sync,
    D: Send,
{
}

unsafe impl<T, D, N, const MT: usize, const MP: usize> Sync for HazardManager<T, D, N, MT, MP>
where
    T: Send + Sync,
    D: Sync,
{
}

impl<T, D, N, const MT: usize, const MP: usize> HazardManager<T, D, N, MT, MP>
where
    D: Destructor<T, Hazard>,
    N: Unsigned,
{
    /// Creates a new manager with the given destructor policy and an empty
    /// registry.
    pub fn with_destructor(destructor: D) -> Self {
        Self {
            handle_count: CachePadded::new(AtomicUsize::new(0)),
            handles: array::from_fn(|_| AtomicMarkedPtr::null()),
            destructor,
            _marker: PhantomData,
        }
    }

    /// Acquires a handle for the current thread.
    ///
    /// A free registry entry is claimed by installing a fresh protection
    /// block; an entry returned by a dropped handle is reused by clearing its
    /// mark. Fails with [`RegistryFull`] when all `MAX_THREADS` entries are
    /// in use by live handles.
    pub fn get_handle(&self) -> Result<HazardHandle<'_, T, D, N, MT, MP>, RegistryFull> {
        let fresh = Box::into_raw(Box::new(ProtectionBlock::new()));

        for id in 0..MT {
            let entry = self.handles[id].load(ord::ACQUIRE);

            if entry.is_null() {
                if self.handles[id]
                    .compare_exchange(entry, MarkedPtr::new(fresh), ord::ACQ_REL, ord::RELAXED)
                    .is_ok()
                {
                    self.advance_handle_count(id + 1);
                    let block = unsafe { &*fresh };
                    return Ok(HazardHandle { parent: self, block, id, _not_sync: PhantomData });
                }
            } else if entry.is_marked::<U0>() {
                // reuse the returned block
                if self.handles[id]
                    .compare_exchange(entry, entry.clear_tag(), ord::ACQ_REL, ord::RELAXED)
                    .is_ok()
                {
                    drop(unsafe { Box::from_raw(fresh) });
                    let block = unsafe { &*entry.decompose_ptr() };
                    return Ok(HazardHandle { parent: self, block, id, _not_sync: PhantomData });
                }
            }
        }

        drop(unsafe { Box::from_raw(fresh) });
        Err(RegistryFull)
    }

    /// Raises the occupied-entry hint to at least `count`.
    ///
    /// The hint may overshoot the true number of live handles, which is
    /// harmless, but must never under-report a live entry.
    fn advance_handle_count(&self, count: usize) {
        let mut current = self.handle_count.load(ord::RELAXED);
        while current < count {
            match self.handle_count.compare_exchange_weak(
                current,
                count,
                ord::ACQ_REL,
                ord::RELAXED,
            ) {
                Ok(_) => return,
                Err(changed) => current = changed,
            }
        }
    }
}

impl<T, D, N, const MT: usize, const MP: usize> HazardManager<T, D, N, MT, MP>
where
    D: Destructor<T, Hazard> + Default,
    N: Unsigned,
{
    /// Creates a new manager with the default destructor policy.
    #[inline]
    pub fn new() -> Self {
        Self::with_destructor(D::default())
    }
}

impl<T, D, N, const MT: usize, const MP: usize> Default for HazardManager<T, D, N, MT, MP>
where
    D: Destructor<T, Hazard> + Default,
    N: Unsigned,
{
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T, D, N, const MT: usize, const MP: usize> Drop for HazardManager<T, D, N, MT, MP> {
    fn drop(&mut self) {
        let count = self.handle_count.load(ord::ACQUIRE).min(MT);
        for id in 0..count {
            if self.handles[id].load(ord::ACQUIRE).is_null() {
                continue;
            }
            // sanity barrier: every claimed entry must be returned before
            // its block can be freed
            while !self.handles[id].load(ord::ACQUIRE).is_marked::<U0>() {
                hint::spin_loop();
            }
        }

        for id in 0..count {
            let entry = self.handles[id].load(ord::RELAXED);
            if let Some(block) = NonNull::new(entry.decompose_ptr()) {
                drop(unsafe { Box::from_raw(block.as_ptr()) });
            }
        }
    }
}

impl<T, D, N, const MT: usize, const MP: usize> fmt::Debug for HazardManager<T, D, N, MT, MP> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HazardManager")
            .field("handle_count", &self.handle_count.load(ord::RELAXED))
            .field("max_threads", &MT)
            .field("max_protections", &MP)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// HazardHandle
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The thread-local handle of the [`Hazard`] scheme.
///
/// Owns one protection block of the manager's registry. Dropping the handle
/// releases all of its protections (performing any inherited destructions)
/// and returns the block to the registry for reuse.
pub struct HazardHandle<'m, T, D, N, const MAX_THREADS: usize, const MAX_PROTECTIONS: usize>
where
    D: Destructor<T, Hazard>,
    N: Unsigned,
{
    parent: &'m HazardManager<T, D, N, MAX_THREADS, MAX_PROTECTIONS>,
    block: &'m ProtectionBlock<T, MAX_PROTECTIONS>,
    id: usize,
    _not_sync: PhantomData<*mut ()>,
}

unsafe impl<'m, T, D, N, const MT: usize, const MP: usize> Send for HazardHandle<'m, T, D, N, MT, MP>
where
    T: Send + Sync,
    D: Destructor<T, Hazard> + Sync,
    N: Unsigned,
{
}

impl<'m, T, D, N, const MT: usize, const MP: usize> HazardHandle<'m, T, D, N, MT, MP>
where
    D: Destructor<T, Hazard>,
    N: Unsigned,
{
    /// Returns the handle's registry index.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the number of protections this handle currently holds.
    #[inline]
    pub fn protection_count(&self) -> usize {
        self.block.occupied()
    }

    /// Strips the user tag off `ptr` and converts it to the slot
    /// representation.
    #[inline]
    fn slot_value(ptr: MarkedPtr<T, N>) -> MarkedPtr<T, U1> {
        MarkedPtr::new(ptr.decompose_ptr())
    }

    /// Destroys `ptr` after re-scanning for remaining protections, first the
    /// own slots below `pos`, then all blocks with a registry index below the
    /// own id.
    ///
    /// Called whenever a slot with the reserved mark is vacated, i.e. when
    /// this handle inherited the responsibility for a destruction.
    fn continue_deletion(&self, ptr: MarkedPtr<T, U1>, pos: usize) {
        for i in (0..pos.min(MP)).rev() {
            if self.block.slots[i].load(ord::SEQ_CST) == ptr {
                // transfer locally; only this thread vacates its own slots,
                // a plain store cannot lose a concurrent transfer
                self.block.slots[i].store(ptr.set_mark::<U0>(), ord::RELEASE);
                return;
            }
        }

        for id in (0..self.id.min(MT)).rev() {
            let entry = self.parent.handles[id].load(ord::ACQUIRE);
            if entry.is_null() || entry.is_marked::<U0>() {
                continue;
            }
            let block = unsafe { &*entry.decompose_ptr() };
            for i in (0..block.occupied()).rev() {
                let slot = block.slots[i].load(ord::SEQ_CST);
                if slot == ptr {
                    if block.slots[i]
                        .compare_exchange(slot, slot.set_mark::<U0>(), ord::ACQ_REL, ord::RELAXED)
                        .is_ok()
                    {
                        // transfer successful
                        return;
                    }
                    // concurrent unprotect, this handle remains responsible
                }
            }
        }

        // no live protection observes the pointer
        unsafe {
            self.parent.destructor.destroy(NonNull::new_unchecked(ptr.into_ptr()));
        }
    }
}

unsafe impl<'m, T, D, N, const MT: usize, const MP: usize> Protect
    for HazardHandle<'m, T, D, N, MT, MP>
where
    D: Destructor<T, Hazard>,
    N: Unsigned,
{
    type Item = T;
    type MarkBits = N;
    type Reclaimer = Hazard;

    #[inline]
    fn create(&self, elem: T) -> MarkedPtr<T, N> {
        MarkedPtr::from(Record::<T, Hazard>::alloc(elem))
    }

    fn protect(&self, cell: &AtomicMarkedPtr<T, N>) -> MarkedPtr<T, N> {
        let pos = self.block.counter.fetch_add(1, ord::ACQ_REL);
        debug_assert!(pos < MP, "protection slots exhausted");

        let mut current = cell.load(ord::SEQ_CST);
        self.block.slots[pos].store(Self::slot_value(current), ord::SEQ_CST);
        loop {
            let reloaded = cell.load(ord::SEQ_CST);
            if reloaded == current {
                if current.is_null() {
                    // a null snapshot needs no protection, release the slot;
                    // null slots are never targeted by a transfer
                    self.block.slots[pos].store(MarkedPtr::null(), ord::RELEASE);
                    self.block.counter.store(pos, ord::RELEASE);
                }
                return current;
            }
            // re-publish with a swap so a concurrent responsibility transfer
            // onto this slot is never lost
            let previous = self.block.slots[pos].swap(Self::slot_value(reloaded), ord::SEQ_CST);
            if previous.is_marked::<U0>() {
                self.continue_deletion(previous.clear_tag(), pos);
            }
            current = reloaded;
        }
    }

    #[inline]
    fn protect_raw(&self, ptr: MarkedPtr<T, N>) {
        if ptr.is_null() {
            return;
        }
        let pos = self.block.counter.fetch_add(1, ord::ACQ_REL);
        debug_assert!(pos < MP, "protection slots exhausted");
        self.block.slots[pos].store(Self::slot_value(ptr), ord::SEQ_CST);
    }

    fn unprotect(&self, ptr: MarkedPtr<T, N>) {
        debug_assert!(!ptr.is_null(), "unprotected a null pointer");
        if ptr.is_null() {
            return;
        }
        let cleared = Self::slot_value(ptr);
        let occupied = self.block.occupied();
        debug_assert!(occupied > 0, "unprotect without a matching protect");

        let last = occupied - 1;
        // protections are usually released in reverse acquisition order
        if self.block.slots[last].load(ord::SEQ_CST).clear_tag() == cleared {
            let previous = self.block.slots[last].swap(MarkedPtr::null(), ord::ACQ_REL);
            self.block.counter.store(last, ord::RELEASE);
            if previous.is_marked::<U0>() {
                self.continue_deletion(cleared, last);
            }
            return;
        }

        let last_value = self.block.slots[last].load(ord::SEQ_CST);
        for i in (0..last).rev() {
            if self.block.slots[i].load(ord::SEQ_CST).clear_tag() == cleared {
                // duplicate the last entry into the vacated slot before
                // removing its original, the still-protected pointer must
                // never be absent from the slot array
                let previous = self.block.slots[i].swap(last_value.clear_tag(), ord::ACQ_REL);
                if previous.is_marked::<U0>() {
                    self.continue_deletion(cleared, i);
                }

                let original = self.block.slots[last].swap(MarkedPtr::null(), ord::ACQ_REL);
                self.block.counter.store(last, ord::RELEASE);
                if original.is_marked::<U0>() {
                    // a retirer marked the original while both copies were
                    // present, move the mark onto the relocated copy
                    self.block.slots[i].store(original, ord::RELEASE);
                }
                return;
            }
        }

        debug_assert!(false, "unprotect without a matching protect");
    }

    unsafe fn retire(&self, ptr: MarkedPtr<T, N>) {
        debug_assert!(!ptr.is_null(), "retired a null pointer");
        let cleared = Self::slot_value(ptr);

        let count = self.parent.handle_count.load(ord::ACQUIRE).min(MT);
        for id in (0..count).rev() {
            let entry = self.parent.handles[id].load(ord::ACQUIRE);
            if entry.is_null() || entry.is_marked::<U0>() {
                continue;
            }
            let block = &*entry.decompose_ptr();
            for i in (0..block.occupied()).rev() {
                let slot = block.slots[i].load(ord::SEQ_CST);
                if slot == cleared {
                    if block.slots[i]
                        .compare_exchange(slot, slot.set_mark::<U0>(), ord::ACQ_REL, ord::RELAXED)
                        .is_ok()
                    {
                        // responsibility for the destruction now lies with
                        // the protecting handle
                        return;
                    }
                    // concurrent unprotect, the retirer remains responsible
                }
            }
        }

        self.parent.destructor.destroy(NonNull::new_unchecked(cleared.into_ptr()));
    }

    #[inline]
    unsafe fn reclaim_raw(&self, ptr: MarkedPtr<T, N>) {
        debug_assert!(!ptr.is_null(), "reclaimed a null pointer");
        Record::<T, Hazard>::dealloc(NonNull::new_unchecked(ptr.decompose_ptr()));
    }

    fn is_safe(&self, ptr: MarkedPtr<T, N>) -> bool {
        let cleared = Self::slot_value(ptr);

        let count = self.parent.handle_count.load(ord::ACQUIRE).min(MT);
        for id in (0..count).rev() {
            let entry = self.parent.handles[id].load(ord::ACQUIRE);
            if entry.is_null() || entry.is_marked::<U0>() {
                continue;
            }
            let block = unsafe { &*entry.decompose_ptr() };
            for i in (0..block.occupied()).rev() {
                if block.slots[i].load(ord::SEQ_CST).clear_tag() == cleared {
                    return false;
                }
            }
        }
        true
    }
}

impl<'m, T, D, N, const MT: usize, const MP: usize> Drop for HazardHandle<'m, T, D, N, MT, MP>
where
    D: Destructor<T, Hazard>,
    N: Unsigned,
{
    fn drop(&mut self) {
        for i in (0..self.block.occupied()).rev() {
            let previous = self.block.slots[i].swap(MarkedPtr::null(), ord::ACQ_REL);
            if previous.is_marked::<U0>() {
                self.continue_deletion(previous.clear_tag(), i);
            }
        }
        self.block.counter.store(0, ord::RELEASE);

        // republish the registry entry as reusable
        let entry = self.parent.handles[self.id].load(ord::RELAXED);
        self.parent.handles[self.id].store(entry.set_mark::<U0>(), ord::RELEASE);
    }
}

impl<'m, T, D, N, const MT: usize, const MP: usize> fmt::Debug
    for HazardHandle<'m, T, D, N, MT, MP>
where
    D: Destructor<T, Hazard>,
    N: Unsigned,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HazardHandle")
            .field("id", &self.id)
            .field("protections", &self.protection_count())
            .finish()
    }
}
