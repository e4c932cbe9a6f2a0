use std::collections::VecDeque;

/// Number of recently emitted block identities a block watcher remembers.
pub(crate) const RECENT_BLOCKS_CAPACITY: usize = 64;

/// Fixed-size FIFO that evicts its oldest element once full.
#[derive(Clone, Debug)]
pub(crate) struct RingBuffer<T> {
    inner: VecDeque<T>,
    capacity: usize,
}

impl<T: PartialEq> RingBuffer<T> {
    /// Creates an empty [`RingBuffer`] holding at most `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        Self { inner: VecDeque::with_capacity(capacity), capacity }
    }

    /// Adds a new element to the buffer.
    ///
    /// If the buffer is full, the oldest element is removed to make space. A zero-capacity buffer
    /// stores nothing.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.inner.len() == self.capacity {
            self.inner.pop_front();
        }
        self.inner.push_back(item);
    }

    pub fn contains(&self, item: &T) -> bool {
        self.inner.contains(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_should_ignore_elements() {
        let mut buf = RingBuffer::<u32>::new(0);
        buf.push(1);
        assert!(buf.inner.is_empty());
        assert!(!buf.contains(&1));
    }

    #[test]
    fn full_buffer_evicts_oldest() {
        let mut buf = RingBuffer::new(2);
        buf.push(1);
        buf.push(2);
        buf.push(3);

        assert!(!buf.contains(&1));
        assert!(buf.contains(&2));
        assert_eq!(buf.inner.back(), Some(&3));
    }
}
