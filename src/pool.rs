use std::collections::VecDeque;

/// Fixed-capacity FIFO of in-flight probes owned by one worker.
///
/// The oldest entry is always the next one resolved, and a vacated slot is
/// refilled at the back. `push` refuses to grow past capacity, which is what
/// bounds the number of sockets a worker holds open.
#[derive(Debug)]
pub struct SlotPool<T> {
    capacity: usize,
    slots: VecDeque<T>,
    peak: usize,
}

impl<T> SlotPool<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: VecDeque::with_capacity(capacity),
            peak: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Most entries ever held at once.
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Add to the back. Hands the value back if the pool is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.slots.push_back(item);
        self.peak = self.peak.max(self.slots.len());
        Ok(())
    }

    /// Take the least recently filled slot.
    pub fn pop_oldest(&mut self) -> Option<T> {
        self.slots.pop_front()
    }

    /// Empty the pool, dropping every entry.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycles_in_fifo_order() {
        let mut pool = SlotPool::new(3);
        for p in [10u16, 11, 12] {
            pool.push(p).unwrap();
        }
        assert!(pool.is_full());
        assert_eq!(pool.pop_oldest(), Some(10));
        pool.push(13).unwrap();
        assert_eq!(pool.pop_oldest(), Some(11));
        assert_eq!(pool.pop_oldest(), Some(12));
        assert_eq!(pool.pop_oldest(), Some(13));
        assert_eq!(pool.pop_oldest(), None);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut pool = SlotPool::new(2);
        pool.push(1).unwrap();
        pool.push(2).unwrap();
        assert_eq!(pool.push(3), Err(3));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.peak(), 2);

        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.peak(), 2);
    }

    #[test]
    fn zero_capacity_is_bumped_to_one() {
        let mut pool = SlotPool::new(0);
        assert_eq!(pool.capacity(), 1);
        pool.push('a').unwrap();
        assert!(pool.push('b').is_err());
    }
}
