//! Multi-threaded and churn tests of the reference-counted scheme.

mod common;

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::thread;

use reclamation::typenum::U2;
use reclamation::{AtomicMarkedPtr, CountingManager, MarkedPtr, Protect};

use common::{drop_counter, TrackedNode};

type Manager = CountingManager<TrackedNode, U2>;
type Cell = AtomicMarkedPtr<TrackedNode, U2>;

/// A long create/retire churn on a single thread keeps reusing the same
/// storage slot instead of allocating.
#[test]
fn recycler_reuses_storage() {
    const PAIRS: usize = 100_000;

    let drops = drop_counter();
    let manager = Manager::new();
    let handle = manager.get_handle();

    let mut addresses = HashSet::new();
    let mut last_epoch = 0;
    for i in 0..PAIRS {
        let ptr = handle.create(TrackedNode::new(i, &drops));
        addresses.insert(ptr.into_usize());

        let epoch = unsafe { handle.epoch_of(ptr) };
        assert!(epoch >= last_epoch, "epochs never move backwards");
        last_epoch = epoch;

        unsafe { handle.retire(ptr) };
    }

    assert_eq!(drops.load(Relaxed), PAIRS);
    // the net allocation count is far smaller than the number of pairs
    assert_eq!(addresses.len(), 1);
    assert_eq!(manager.free_count(), 1);
    assert_eq!(last_epoch, (PAIRS - 1) as u64);
}

/// Readers protecting the shared cell never observe destroyed memory while
/// a writer continuously replaces and retires nodes.
#[test]
fn protect_races_with_retire() {
    const ITERATIONS: usize = 2_000;
    const READERS: usize = 3;

    let drops = drop_counter();
    let manager = Manager::new();
    let the_one = Cell::null();
    let finished = AtomicBool::new(false);

    thread::scope(|scope| {
        let writer = {
            let (manager, the_one, finished, drops) = (&manager, &the_one, &finished, &drops);
            scope.spawn(move || {
                let handle = manager.get_handle();

                let mut current = handle.create(TrackedNode::new(0, drops));
                the_one.store(current, Release);

                for i in 1..=ITERATIONS {
                    let next = handle.create(TrackedNode::new(i, drops));
                    the_one
                        .compare_exchange(current, next, Release, Relaxed)
                        .expect("only the writer replaces the pointer");
                    unsafe { handle.retire(current) };
                    current = next;
                }

                finished.store(true, Release);
                let last = the_one.swap(MarkedPtr::null(), Release);
                unsafe { handle.retire(last) };
            })
        };

        for _ in 0..READERS {
            let (manager, the_one, finished) = (&manager, &the_one, &finished);
            scope.spawn(move || {
                let handle = manager.get_handle();
                while !finished.load(Acquire) {
                    let guard = handle.guard(the_one);
                    if let Some(node) = guard.as_ref() {
                        assert!(node.id <= ITERATIONS);
                        node.hits.fetch_add(1, Relaxed);
                    }
                }
            });
        }

        writer.join().unwrap();
    });

    assert_eq!(drops.load(Relaxed), ITERATIONS + 1);
}

/// The guard of a protected value keeps it alive across a concurrent retire
/// and releases it on drop.
#[test]
fn guard_outlives_concurrent_retire() {
    let drops = drop_counter();
    let manager = Manager::new();
    let handle = manager.get_handle();

    let prior = handle.create(TrackedNode::new(1, &drops));
    let cell = Cell::new(prior);

    let guard = handle.guard(&cell);
    assert!(!handle.is_safe(prior));

    thread::scope(|scope| {
        let (manager, cell, drops) = (&manager, &cell, &drops);
        scope
            .spawn(move || {
                let writer = manager.get_handle();
                let other = writer.create(TrackedNode::new(2, drops));
                let unlinked = cell.swap(other, Release);
                unsafe { writer.retire(unlinked) };
            })
            .join()
            .unwrap();
    });

    assert_eq!(drops.load(Relaxed), 0);
    assert_eq!(guard.id, 1);

    drop(guard);
    assert_eq!(drops.load(Relaxed), 1);

    let last = cell.swap(MarkedPtr::null(), Release);
    unsafe { handle.retire(last) };
    assert_eq!(drops.load(Relaxed), 2);
}

/// Recycled storage observed under a fresh protection always carries a
/// higher epoch than any previously observed life of the same slot.
#[test]
fn epochs_detect_recycled_slots() {
    let drops = drop_counter();
    let manager = Manager::new();
    let handle = manager.get_handle();

    let first = handle.create(TrackedNode::new(0, &drops));
    let address = first.into_usize();
    let first_epoch = unsafe { handle.epoch_of(first) };
    unsafe { handle.retire(first) };

    let second = handle.create(TrackedNode::new(1, &drops));
    assert_eq!(second.into_usize(), address);
    assert!(unsafe { handle.epoch_of(second) } > first_epoch);

    unsafe { handle.retire(second) };
    assert_eq!(drops.load(Relaxed), 2);
}
