//! Fixed-capacity ring buffer that overwrites its oldest entry

use heapless::Deque;

/// Bounded history of the last `N` items
///
/// Pushing into a full buffer evicts the oldest item and hands it back.
#[derive(Debug)]
pub struct RingLog<T, const N: usize> {
    items: Deque<T, N>,
}

impl<T, const N: usize> RingLog<T, N> {
    pub const fn new() -> Self {
        Self {
            items: Deque::new(),
        }
    }

    /// Append `item`, returning the evicted oldest item when full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.is_full() {
            self.items.pop_front()
        } else {
            None
        };
        // Cannot fail: a slot was freed above if the deque was full
        let _ = self.items.push_back(item);
        evicted
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn newest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T, const N: usize> Default for RingLog<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order_below_capacity() {
        let mut ring: RingLog<u32, 4> = RingLog::new();
        assert!(ring.is_empty());
        for i in 0..3 {
            assert_eq!(ring.push(i), None);
        }
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(ring.newest(), Some(&2));
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let mut ring: RingLog<u32, 3> = RingLog::new();
        for i in 0..3 {
            ring.push(i);
        }
        assert_eq!(ring.push(3), Some(0));
        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.capacity(), 3);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn clear_empties_the_buffer() {
        let mut ring: RingLog<&str, 2> = RingLog::new();
        ring.push("a");
        ring.push("b");
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.newest(), None);
    }
}
