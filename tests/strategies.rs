//! Behavior shared by every reclamation scheme, driven through the common
//! handle contract.

mod common;

use std::sync::atomic::Ordering::{Relaxed, Release};
use std::sync::atomic::AtomicUsize;

use reclamation::typenum::U2;
use reclamation::{
    AtomicMarkedPtr, CountingManager, DefaultDestructor, DelayedManager, HazardManager,
    MarkedPtr, Protect, SequentialManager, TracingDestructor,
};

use common::{drop_counter, TrackedNode};

type Cell = AtomicMarkedPtr<TrackedNode, U2>;

/// Publishes a tagged pointer and checks that the tag survives protection
/// and that retiring the tagged pointer destroys the cleared value.
fn check_tag_round_trip<H>(handle: &H)
where
    H: Protect<Item = TrackedNode, MarkBits = U2>,
{
    let drops = drop_counter();
    let ptr = handle.create(TrackedNode::new(7, &drops));

    let cell = Cell::new(ptr.with_tag(0b10));
    let protected = handle.protect(&cell);
    assert_eq!(protected.decompose_tag(), 0b10);
    assert_eq!(protected.clear_tag(), ptr);
    assert_eq!(unsafe { protected.as_ref() }.unwrap().id, 7);

    handle.unprotect(protected);
    cell.store(MarkedPtr::null(), Release);
    unsafe { handle.retire(protected) };
}

/// Checks that dropping a guard is equivalent to an explicit unprotect.
fn check_guard_equivalence<H>(handle: &H)
where
    H: Protect<Item = TrackedNode, MarkBits = U2>,
{
    let drops = drop_counter();
    let ptr = handle.create(TrackedNode::new(1, &drops));
    let cell = Cell::new(ptr);

    {
        let guard = handle.guard(&cell);
        assert!(!guard.is_null());
        assert_eq!(guard.id, 1);
        assert_eq!(guard.tag(), 0);
    }

    // an empty guard releases nothing
    let empty = Cell::null();
    {
        let guard = handle.guard(&empty);
        assert!(guard.is_null());
        assert!(guard.as_ref().is_none());
    }

    let raw_guard = handle.guard_raw(ptr);
    assert_eq!(raw_guard.as_marked(), ptr);
    drop(raw_guard);

    cell.store(MarkedPtr::null(), Release);
    unsafe { handle.retire(ptr) };
}

#[test]
fn sequential_tag_round_trip() {
    let manager = SequentialManager::<TrackedNode, DefaultDestructor, U2>::new();
    check_tag_round_trip(&manager.get_handle());
}

#[test]
fn sequential_guard_equivalence() {
    let manager = SequentialManager::<TrackedNode, DefaultDestructor, U2>::new();
    check_guard_equivalence(&manager.get_handle());
}

#[test]
fn delayed_tag_round_trip() {
    let manager = DelayedManager::<TrackedNode, DefaultDestructor, U2>::new();
    check_tag_round_trip(&manager.get_handle());
}

#[test]
fn delayed_guard_equivalence() {
    let manager = DelayedManager::<TrackedNode, DefaultDestructor, U2>::new();
    check_guard_equivalence(&manager.get_handle());
}

#[test]
fn counting_tag_round_trip() {
    let manager = CountingManager::<TrackedNode, U2>::new();
    check_tag_round_trip(&manager.get_handle());
}

#[test]
fn counting_guard_equivalence() {
    let manager = CountingManager::<TrackedNode, U2>::new();
    check_guard_equivalence(&manager.get_handle());
}

#[test]
fn hazard_tag_round_trip() {
    let manager: HazardManager<TrackedNode> = HazardManager::new();
    check_tag_round_trip(&manager.get_handle().unwrap());
}

#[test]
fn hazard_guard_equivalence() {
    let manager: HazardManager<TrackedNode> = HazardManager::new();
    check_guard_equivalence(&manager.get_handle().unwrap());
}

#[test]
fn every_retired_node_is_destroyed_exactly_once() {
    const NODES: usize = 1_000;

    let drops = drop_counter();
    {
        let sequential = SequentialManager::<TrackedNode, DefaultDestructor, U2>::new();
        let handle = sequential.get_handle();
        for i in 0..NODES {
            let ptr = handle.create(TrackedNode::new(i, &drops));
            unsafe { handle.retire(ptr) };
        }
        assert_eq!(drops.load(Relaxed), NODES);
    }

    let drops = drop_counter();
    {
        let delayed = DelayedManager::<TrackedNode, DefaultDestructor, U2>::new();
        let handle = delayed.get_handle();
        for i in 0..NODES {
            let ptr = handle.create(TrackedNode::new(i, &drops));
            unsafe { handle.retire(ptr) };
        }
        // nothing is destroyed before the handle drops
        assert_eq!(drops.load(Relaxed), 0);
        drop(handle);
        assert_eq!(drops.load(Relaxed), NODES);
    }

    let drops = drop_counter();
    {
        let counting = CountingManager::<TrackedNode, U2>::new();
        let handle = counting.get_handle();
        for i in 0..NODES {
            let ptr = handle.create(TrackedNode::new(i, &drops));
            unsafe { handle.retire(ptr) };
        }
        assert_eq!(drops.load(Relaxed), NODES);
    }

    let drops = drop_counter();
    {
        let hazard: HazardManager<TrackedNode> = HazardManager::new();
        let handle = hazard.get_handle().unwrap();
        for i in 0..NODES {
            let ptr = handle.create(TrackedNode::new(i, &drops));
            unsafe { handle.retire(ptr) };
        }
        assert_eq!(drops.load(Relaxed), NODES);
    }
}

#[test]
fn tracing_destructor_counts_destructions() {
    static DESTROYED: AtomicUsize = AtomicUsize::new(0);

    let drops = drop_counter();
    let manager = SequentialManager::<TrackedNode, TracingDestructor, U2>::with_destructor(
        TracingDestructor::new(&DESTROYED),
    );
    let handle = manager.get_handle();

    for i in 0..10 {
        let ptr = handle.create(TrackedNode::new(i, &drops));
        unsafe { handle.retire(ptr) };
    }

    assert_eq!(DESTROYED.load(Relaxed), 10);
    assert_eq!(drops.load(Relaxed), 10);
}

#[test]
fn unprotect_all_releases_every_protection() {
    let drops = drop_counter();
    let manager: HazardManager<TrackedNode> = HazardManager::new();
    let handle = manager.get_handle().unwrap();

    let ptrs: Vec<_> =
        (0..4).map(|i| handle.create(TrackedNode::new(i, &drops))).collect();
    for &ptr in &ptrs {
        handle.protect_raw(ptr);
    }
    assert_eq!(handle.protection_count(), 4);

    handle.unprotect_all(&ptrs);
    assert_eq!(handle.protection_count(), 0);

    for &ptr in &ptrs {
        unsafe { handle.retire(ptr) };
    }
    assert_eq!(drops.load(Relaxed), 4);
}
