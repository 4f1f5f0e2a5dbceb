use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Bounded FIFO store that evicts the oldest element on overflow.
///
/// Elements are kept behind `Arc` so that snapshots and sink forwarding share
/// records instead of deep-copying them. All mutation happens under a single
/// mutex; readers hold it only for the duration of the copy.
pub struct RingBuffer<T> {
    capacity: usize,
    items: Mutex<VecDeque<Arc<T>>>,
}

impl<T> RingBuffer<T> {
    /// Creates an empty buffer. A capacity of zero stores nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            // Large capacities grow on demand instead of reserving up front.
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Appends an item, evicting the oldest one when full.
    ///
    /// Returns true if an element was evicted (or the item itself was
    /// discarded because the capacity is zero).
    pub fn push(&self, item: Arc<T>) -> bool {
        if self.capacity == 0 {
            return true;
        }

        let mut items = self.items.lock();
        let mut evicted = false;
        while items.len() >= self.capacity {
            items.pop_front();
            evicted = true;
        }
        items.push_back(item);
        evicted
    }

    /// Returns an independent copy of the current contents, oldest-first.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(buf: &RingBuffer<u32>) -> Vec<u32> {
        buf.snapshot().iter().map(|v| **v).collect()
    }

    #[test]
    fn test_keeps_last_min_n_c_items() {
        for capacity in [1usize, 3, 7, 16] {
            for n in [0u32, 1, 2, 3, 7, 8, 15, 16, 17, 50] {
                let buf = RingBuffer::new(capacity);
                for i in 0..n {
                    buf.push(Arc::new(i));
                }

                let kept = (n as usize).min(capacity) as u32;
                let expected: Vec<u32> = (n - kept..n).collect();
                assert_eq!(values(&buf), expected, "capacity={capacity} n={n}");
                assert!(buf.len() <= capacity);
            }
        }
    }

    #[test]
    fn test_push_reports_eviction() {
        let buf = RingBuffer::new(2);
        assert!(!buf.push(Arc::new(1)));
        assert!(!buf.push(Arc::new(2)));
        assert!(buf.push(Arc::new(3)));
        assert_eq!(values(&buf), vec![2, 3]);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let buf = RingBuffer::new(0);
        assert!(buf.push(Arc::new(1)));
        assert!(buf.is_empty());
        assert!(buf.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_is_independent_of_later_appends() {
        let buf = RingBuffer::new(4);
        buf.push(Arc::new(1));
        buf.push(Arc::new(2));

        let snap = buf.snapshot();
        for i in 3..10 {
            buf.push(Arc::new(i));
        }

        let snap: Vec<u32> = snap.iter().map(|v| **v).collect();
        assert_eq!(snap, vec![1, 2]);
        assert_eq!(values(&buf), vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let buf = RingBuffer::new(10_000);

        std::thread::scope(|s| {
            for t in 0..8u32 {
                let buf = &buf;
                s.spawn(move || {
                    for i in 0..500u32 {
                        buf.push(Arc::new(t * 1_000 + i));
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..100 {
                    assert!(buf.snapshot().len() <= 4_000);
                }
            });
        });

        let mut all = values(&buf);
        assert_eq!(all.len(), 4_000);
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4_000);
    }

    #[test]
    fn test_concurrent_appends_respect_capacity() {
        let buf = RingBuffer::new(100);

        std::thread::scope(|s| {
            for t in 0..4u32 {
                let buf = &buf;
                s.spawn(move || {
                    for i in 0..1_000u32 {
                        buf.push(Arc::new(t * 10_000 + i));
                        assert!(buf.len() <= 100);
                    }
                });
            }
        });

        assert_eq!(buf.len(), 100);
    }
}
