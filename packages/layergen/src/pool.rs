//! Object pools for chunk and record recycling.
//!
//! Pools are the only mechanism by which chunk and record memory is recycled;
//! nothing in the crate frees that memory outside the get/recycle protocol.
//! Double-return cannot be expressed: values move into the pool.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};


/// An object that can be recycled through an [`ObjectPool`].
pub trait Poolable {
    /// Called when the object is recycled into the pool.
    fn reset(&mut self);
}

/// Occupancy and traffic counters of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects ever created by the factory.
    pub total: usize,
    /// Objects currently handed out.
    pub active: usize,
    /// Objects currently idle in the pool.
    pub inactive: usize,
    /// Lifetime count of `get` calls.
    pub gets: u64,
    /// Lifetime count of `recycle` calls.
    pub recycles: u64,
}

/// Thread-safe pool of reusable objects created by a factory closure.
pub struct ObjectPool<T> {
    factory: Box<dyn Fn() -> T + Send + Sync>,
    free: Mutex<Vec<T>>,
    total: AtomicUsize,
    gets: AtomicU64,
    recycles: AtomicU64,
}

impl<T: Poolable> ObjectPool<T> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        ObjectPool {
            factory: Box::new(factory),
            free: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
            gets: AtomicU64::new(0),
            recycles: AtomicU64::new(0),
        }
    }

    /// Take an idle object from the pool, or create one if none are idle.
    pub fn get(&self) -> T {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if let Some(item) = self.free.lock().pop() {
            item
        } else {
            self.total.fetch_add(1, Ordering::Relaxed);
            (self.factory)()
        }
    }

    /// Reset an object and return it to the pool.
    pub fn recycle(&self, mut item: T) {
        item.reset();
        self.recycles.fetch_add(1, Ordering::Relaxed);
        self.free.lock().push(item);
    }

    pub fn stats(&self) -> PoolStats {
        let total = self.total.load(Ordering::Relaxed);
        let inactive = self.free.lock().len();
        PoolStats {
            total,
            active: total.saturating_sub(inactive),
            inactive,
            gets: self.gets.load(Ordering::Relaxed),
            recycles: self.recycles.load(Ordering::Relaxed),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        value: u32,
        resets: u32,
    }

    impl Poolable for Counter {
        fn reset(&mut self) {
            self.value = 0;
            self.resets += 1;
        }
    }

    #[test]
    fn get_reuses_recycled_objects() {
        let pool = ObjectPool::new(|| Counter { value: 0, resets: 0 });
        let mut a = pool.get();
        a.value = 7;
        pool.recycle(a);
        let b = pool.get();
        assert_eq!(b.value, 0);
        assert_eq!(b.resets, 1);
        assert_eq!(pool.stats().total, 1);
        assert_eq!(pool.stats().gets, 2);
        assert_eq!(pool.stats().recycles, 1);
    }

    #[test]
    fn stats_track_occupancy() {
        let pool = ObjectPool::new(|| Counter { value: 0, resets: 0 });
        let a = pool.get();
        let b = pool.get();
        assert_eq!(pool.stats().total, 2);
        assert_eq!(pool.stats().active, 2);
        assert_eq!(pool.stats().inactive, 0);
        pool.recycle(a);
        pool.recycle(b);
        assert_eq!(pool.stats().active, 0);
        assert_eq!(pool.stats().inactive, 2);
    }
}
