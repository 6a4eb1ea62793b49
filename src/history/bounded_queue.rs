//! Newest-first record queue with a fixed capacity

use serde::Serialize;
use std::collections::VecDeque;

/// Bounded queue that keeps the most recent records, newest at the front
///
/// Records are never mutated once queued; when capacity is exceeded the oldest
/// record is dropped from the back.
#[derive(Debug, Clone, Serialize)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` records
    ///
    /// # Examples
    ///
    /// ```
    /// use zview::history::BoundedQueue;
    ///
    /// let mut queue = BoundedQueue::new(2);
    /// queue.push("a");
    /// queue.push("b");
    /// queue.push("c");
    /// assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec!["c", "b"]);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert a record at the front, evicting the oldest past capacity
    pub fn push(&mut self, item: T) {
        self.items.push_front(item);
        self.enforce_capacity();
    }

    fn enforce_capacity(&mut self) {
        while self.items.len() > self.capacity {
            self.items.pop_back();
        }
    }

    /// Records from newest to oldest
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Newest record, if any
    pub fn newest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> BoundedQueue<T> {
    /// Up to `n` most recent records, newest first
    pub fn recent(&self, n: usize) -> Vec<T> {
        self.items.iter().take(n).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_first() {
        let mut queue = BoundedQueue::new(10);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.recent(10), vec![3, 2, 1]);
        assert_eq!(queue.newest(), Some(&3));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut queue = BoundedQueue::new(3);
        for i in 0..10 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.recent(5), vec![9, 8, 7]);
    }

    #[test]
    fn test_recent_limits_count() {
        let mut queue = BoundedQueue::new(5);
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.recent(2), vec![4, 3]);
    }

    #[test]
    fn test_clear() {
        let mut queue = BoundedQueue::new(2);
        queue.push("x");
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 2);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn prop_never_exceeds_capacity(capacity: u8, items: Vec<u32>) -> bool {
        let mut queue = BoundedQueue::new(capacity as usize);
        for item in items {
            queue.push(item);
            if queue.len() > queue.capacity() {
                return false;
            }
        }
        true
    }
}
