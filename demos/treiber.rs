//! An implementation of Treiber's stack that is fully generic over the used
//! memory reclamation scheme.

use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::Ordering::{Relaxed, Release};

use reclamation::typenum::U0;
use reclamation::{AtomicMarkedPtr, DefaultDestructor, HazardManager, MarkedPtr, Protect};

struct Node<T> {
    elem: ManuallyDrop<T>,
    next: AtomicMarkedPtr<Node<T>, U0>,
}

impl<T> Node<T> {
    fn new(elem: T) -> Self {
        Self { elem: ManuallyDrop::new(elem), next: AtomicMarkedPtr::null() }
    }
}

struct Stack<T> {
    head: AtomicMarkedPtr<Node<T>, U0>,
}

impl<T> Stack<T> {
    fn new() -> Self {
        Self { head: AtomicMarkedPtr::null() }
    }

    fn push<H>(&self, handle: &H, elem: T)
    where
        H: Protect<Item = Node<T>, MarkBits = U0>,
    {
        let node = handle.create(Node::new(elem));
        let node_ref = unsafe { &*node.decompose_ptr() };

        let mut head = self.head.load(Relaxed);
        loop {
            node_ref.next.store(head, Relaxed);
            match self.head.compare_exchange_weak(head, node, Release, Relaxed) {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    fn pop<H>(&self, handle: &H) -> Option<T>
    where
        H: Protect<Item = Node<T>, MarkBits = U0>,
    {
        loop {
            let guard = handle.guard(&self.head);
            let head = match guard.as_ref() {
                Some(head) => head,
                None => return None,
            };

            let next = head.next.load(Relaxed);
            if self.head.compare_exchange_weak(guard.as_marked(), next, Release, Relaxed).is_ok()
            {
                unsafe {
                    // the node is unlinked, the element is moved out before
                    // the node itself is retired
                    let elem = ptr::read(&*head.elem);
                    let unlinked = guard.release();
                    handle.retire(unlinked);
                    return Some(elem);
                }
            }
        }
    }
}

fn main() {
    let manager: HazardManager<Node<u64>, DefaultDestructor, U0> = HazardManager::new();
    let stack = Stack::new();

    std::thread::scope(|scope| {
        for worker in 0..4u64 {
            let (manager, stack) = (&manager, &stack);
            scope.spawn(move || {
                let handle = manager.get_handle().unwrap();
                for i in 0..1_000 {
                    stack.push(&handle, worker * 1_000 + i);
                    if i % 2 == 0 {
                        stack.pop(&handle);
                    }
                }
            });
        }
    });

    let handle = manager.get_handle().unwrap();
    let mut remaining = 0;
    while stack.pop(&handle).is_some() {
        remaining += 1;
    }
    println!("drained {remaining} remaining elements");

    // the stack is empty, all nodes have been retired and destroyed
    assert!(stack.head.load(Relaxed) == MarkedPtr::null());
}
