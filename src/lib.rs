//! Safe memory reclamation for lock-free data structures.
//!
//! Lock-free data structures publish heap-allocated values through shared
//! atomic pointers. When a value is unlinked, racing readers may still hold
//! references to it, so its memory must not be freed until no such reader
//! can possibly observe it anymore. This crate provides that guarantee
//! behind a single contract — the [`Protect`] trait — implemented by four
//! reclamation schemes with different progress and performance trade-offs:
//!
//! - [`SequentialManager`]: single-threaded, destroys on retire; the
//!   baseline and test oracle.
//! - [`DelayedManager`]: batches all retirements in the handle and destroys
//!   them when the handle drops; for epoch-like callers that quiesce.
//! - [`CountingManager`]: per-value reference counters with a
//!   logical-delete mark bit and in-place storage recycling through a shared
//!   free list.
//! - [`HazardManager`]: per-thread protection slots scanned by retirers,
//!   with deletion responsibility transferable onto a protecting slot
//!   through its reserved mark bit.
//!
//! Every scheme follows the same life cycle: a value is created through a
//! per-thread handle, published with an atomic store or compare-exchange,
//! read under a protection (or a scoped [`ReclamationGuard`]) and finally
//! retired, after which the scheme destroys it through the injected
//! [`Destructor`] policy as soon as it can prove that no protection observes
//! it.
//!
//! All pointers crossing the API are [`MarkedPtr`]s, which can carry a small
//! user-controlled tag in their unused low bits. The schemes operate on the
//! cleared pointer value internally and preserve tags across their
//! operations; the hazard scheme reserves mark bit 0 of its internal slot
//! and registry words for encoding transferred deletion responsibility.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::Ordering::Release;
//!
//! use reclamation::typenum::U2;
//! use reclamation::{AtomicMarkedPtr, HazardManager, MarkedPtr, Protect};
//!
//! let manager: HazardManager<i32> = HazardManager::new();
//! let cell: AtomicMarkedPtr<i32, U2> = AtomicMarkedPtr::null();
//!
//! let handle = manager.get_handle().unwrap();
//! let ptr = handle.create(42);
//! cell.store(ptr, Release);
//!
//! {
//!     let guard = handle.guard(&cell);
//!     assert_eq!(*guard, 42);
//! } // the protection is released here
//!
//! cell.store(MarkedPtr::null(), Release);
//! unsafe { handle.retire(ptr) };
//! ```

pub use typenum;
pub use typenum::Unsigned;

pub mod align;
pub mod buffer;

mod counting;
mod delayed;
mod destructor;
mod guard;
mod hazard;
mod ord;
mod pointer;
mod record;
mod sequential;
mod traits;

pub use crate::buffer::{CircularBuffer, ConcurrentCircularBuffer};
pub use crate::counting::{CountedHeader, Counting, CountingHandle, CountingManager};
pub use crate::delayed::{Delayed, DelayedHandle, DelayedManager};
pub use crate::destructor::{DefaultDestructor, Destructor, TracingDestructor};
pub use crate::guard::ReclamationGuard;
pub use crate::hazard::{Hazard, HazardHandle, HazardManager, RegistryFull};
pub use crate::pointer::{AtomicMarkedPtr, MarkedNonNull, MarkedPtr};
pub use crate::record::Record;
pub use crate::sequential::{Sequential, SequentialHandle, SequentialManager};
pub use crate::traits::{Protect, Reclaim};
