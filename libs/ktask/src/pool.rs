// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
#[cfg(feature = "counters")]
use core::sync::atomic::{AtomicUsize, Ordering};
use crossbeam_queue::ArrayQueue;

/// A record that can be reset to its pristine state and handed out again.
pub(crate) trait Recycle: Default {
    /// Drop everything the record references.
    fn reset(&mut self);
}

/// A bounded, lock-free free list of boxed records.
///
/// [`Pool::give`] takes the record by value, so the releasing path cannot touch it again. Records
/// released into a full pool are freed.
pub(crate) struct Pool<T> {
    free: ArrayQueue<Box<T>>,
    #[cfg(feature = "counters")]
    hits: AtomicUsize,
    #[cfg(feature = "counters")]
    misses: AtomicUsize,
}

/// Pool statistics, see [`crate::counters`].
#[cfg(feature = "counters")]
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct PoolCounters {
    /// Records served from the free list.
    pub hits: usize,
    /// Records that had to be freshly allocated.
    pub misses: usize,
}

impl<T: Recycle> Pool<T> {
    pub(crate) const DEFAULT_CAPACITY: usize = 1024;

    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity),
            #[cfg(feature = "counters")]
            hits: AtomicUsize::new(0),
            #[cfg(feature = "counters")]
            misses: AtomicUsize::new(0),
        }
    }

    pub(crate) fn take(&self) -> Box<T> {
        match self.free.pop() {
            Some(record) => {
                #[cfg(feature = "counters")]
                self.hits.fetch_add(1, Ordering::Relaxed);
                record
            }
            None => {
                #[cfg(feature = "counters")]
                self.misses.fetch_add(1, Ordering::Relaxed);
                Box::default()
            }
        }
    }

    pub(crate) fn give(&self, mut record: Box<T>) {
        record.reset();
        // a full pool just frees the record
        let _ = self.free.push(record);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.free.len()
    }

    #[cfg(feature = "counters")]
    pub(crate) fn counters(&self) -> PoolCounters {
        PoolCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("free", &self.free.len())
            .field("capacity", &self.free.capacity())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Slot {
        payload: Option<String>,
    }

    impl Recycle for Slot {
        fn reset(&mut self) {
            self.payload = None;
        }
    }

    #[test]
    fn records_are_reset_before_reuse() {
        let pool = Pool::<Slot>::new(2);

        let mut record = pool.take();
        record.payload = Some("stale".to_string());
        let addr: *const Slot = &raw const *record;
        pool.give(record);
        assert_eq!(pool.len(), 1);

        let record = pool.take();
        assert!(core::ptr::eq(addr, &raw const *record));
        assert!(record.payload.is_none());
    }

    #[test]
    fn overflow_is_freed() {
        let pool = Pool::<Slot>::new(1);
        let a = pool.take();
        let b = pool.take();
        pool.give(a);
        pool.give(b);
        assert_eq!(pool.len(), 1);
    }
}
