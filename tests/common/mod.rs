#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A payload type that records its destruction in a shared counter.
pub struct TrackedNode {
    pub id: usize,
    pub hits: AtomicUsize,
    drops: Arc<AtomicUsize>,
}

impl TrackedNode {
    pub fn new(id: usize, drops: &Arc<AtomicUsize>) -> Self {
        Self { id, hits: AtomicUsize::new(0), drops: Arc::clone(drops) }
    }
}

impl Drop for TrackedNode {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn drop_counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}
