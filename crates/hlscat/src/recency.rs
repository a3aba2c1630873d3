//! Bounded recency window over segment identifiers.
//!
//! Only the latest `capacity` keys are remembered. A key that scrolls out of
//! the window and shows up again is treated as new.

use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct RecencySet {
    capacity: usize,
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl RecencySet {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
        }
    }

    /// Records `key` as the newest entry, evicting the oldest one when full.
    ///
    /// Re-adding a key that is already present leaves the window untouched.
    pub fn add(&mut self, key: &str) {
        if self.set.contains(key) {
            return;
        }

        if self.order.len() >= self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.set.remove(&oldest);
        }

        let key = key.to_string();
        self.set.insert(key.clone());
        self.order.push_back(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.set.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_after_capacity_plus_one() {
        let mut set = RecencySet::new(3);
        for key in ["a", "b", "c", "d"] {
            set.add(key);
        }

        assert!(!set.contains("a"));
        assert!(set.contains("b"));
        assert!(set.contains("c"));
        assert!(set.contains("d"));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn re_adding_does_not_change_order_or_size() {
        let mut set = RecencySet::new(2);
        set.add("a");
        set.add("b");
        set.add("a");
        assert_eq!(set.len(), 2);

        // "a" keeps its original slot, so it is still the first one evicted.
        set.add("c");
        assert!(!set.contains("a"));
        assert!(set.contains("b"));
        assert!(set.contains("c"));
    }

    #[test]
    fn evicted_key_is_new_again() {
        let mut set = RecencySet::new(1);
        set.add("seg1.ts");
        set.add("seg2.ts");
        assert!(!set.contains("seg1.ts"));

        set.add("seg1.ts");
        assert!(set.contains("seg1.ts"));
        assert!(!set.contains("seg2.ts"));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut set = RecencySet::new(0);
        assert_eq!(set.capacity(), 1);
        set.add("x");
        assert!(set.contains("x"));
        assert!(!set.is_empty());
    }
}
